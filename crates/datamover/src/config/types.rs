//! Configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `name -> environment -> entry`
pub type Environments<T> = BTreeMap<String, BTreeMap<String, T>>;

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine settings.
    #[serde(default)]
    pub settings: Settings,

    /// Datasource catalogue keyed by type, then name, then environment.
    #[serde(default)]
    pub datasources: Datasources,
}

/// Engine settings handed to the transfer orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory whose `*.asc` files are imported before any gpg call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring_path: Option<PathBuf>,

    /// Scratch directory for warehouse-bound temp files.
    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,

    /// Object storage area used to stage data ahead of warehouse loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<StagingSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keyring_path: None,
            temp_path: default_temp_path(),
            staging: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSettings {
    /// Name of an `s3` datasource.
    pub datasource: String,

    /// Key prefix placed before `to_<kind>/...`.
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Datasources {
    #[serde(default)]
    pub s3: Environments<S3Config>,
    #[serde(default)]
    pub postgres: Environments<PgConfig>,
    #[serde(default)]
    pub redshift: Environments<PgConfig>,
    #[serde(default)]
    pub sqlserver: Environments<SqlServerConfig>,
    #[serde(default)]
    pub sftp: Environments<SftpConfig>,
    #[serde(default)]
    pub ftp: Environments<FtpConfig>,
}

/// S3 (or S3-compatible) bucket.
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    pub bucket_name: String,

    /// Custom endpoint for S3-compatible stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub path_style: bool,

    /// Gzip stream writes.
    #[serde(default)]
    pub compress: bool,

    /// Gunzip stream reads.
    #[serde(default)]
    pub decompress: bool,
}

/// PostgreSQL or Redshift connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct PgConfig {
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    pub login: String,

    #[serde(default)]
    pub password: String,

    pub database_name: String,

    /// disable, require, verify-ca or verify-full.
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

/// SQL Server connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct SqlServerConfig {
    pub host: String,

    #[serde(default = "default_mssql_port")]
    pub port: u16,

    pub login: String,

    #[serde(default)]
    pub password: String,

    pub database_name: String,

    #[serde(default = "default_true")]
    pub encrypt: bool,

    #[serde(default)]
    pub trust_server_cert: bool,
}

/// SFTP server reached through curl.
#[derive(Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    pub login: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,

    #[serde(default)]
    pub decompress: bool,
}

/// FTP server reached through curl.
#[derive(Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    pub host: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    pub login: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub decompress: bool,
}

const REDACTED: &str = "[REDACTED]";

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &REDACTED)
            .field("region", &self.region)
            .field("bucket_name", &self.bucket_name)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("compress", &self.compress)
            .field("decompress", &self.decompress)
            .finish()
    }
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &REDACTED)
            .field("database_name", &self.database_name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl fmt::Debug for SqlServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &REDACTED)
            .field("database_name", &self.database_name)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

impl fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("ssh_key", &self.ssh_key)
            .field("decompress", &self.decompress)
            .finish()
    }
}

impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &REDACTED)
            .field("decompress", &self.decompress)
            .finish()
    }
}

fn default_temp_path() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_sftp_port() -> u16 {
    22
}

fn default_ftp_port() -> u16 {
    21
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_true() -> bool {
    true
}
