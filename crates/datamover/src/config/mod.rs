//! Configuration loading and validation.
//!
//! This is the only module that reads process environment variables.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use tracing::{info, warn};

use crate::error::{MoverError, Result};

/// Environment variable naming the datasource YAML file.
pub const DATASOURCE_PATH_VAR: &str = "DATAMOVER_DATASOURCE_PATH";

/// Environment variable naming the active environment.
pub const ENV_VAR: &str = "DATAMOVER_ENV";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::from_yaml_unchecked(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_yaml_unchecked(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Locate configuration and environment through the process environment.
    ///
    /// Missing variables are warned about and yield an empty catalogue and no
    /// environment.
    pub fn discover() -> Result<(Self, Option<String>)> {
        let env = match std::env::var(ENV_VAR) {
            Ok(env) if !env.trim().is_empty() => Some(env),
            _ => {
                warn!("Missing ENV['{}']", ENV_VAR);
                None
            }
        };

        let path = std::env::var(DATASOURCE_PATH_VAR).unwrap_or_default();
        if path.is_empty() || !Path::new(&path).exists() {
            warn!("Missing ENV['{}']", DATASOURCE_PATH_VAR);
            return Ok((Self::default(), env));
        }

        let config = Self::load(&path)?;
        info!("Loaded datasource configuration from {}", path);
        Ok((config, env))
    }

    pub fn s3(&self, name: &str, env: &str) -> Result<&S3Config> {
        lookup(&self.datasources.s3, "s3", name, env)
    }

    pub fn postgres(&self, name: &str, env: &str) -> Result<&PgConfig> {
        lookup(&self.datasources.postgres, "postgres", name, env)
    }

    pub fn redshift(&self, name: &str, env: &str) -> Result<&PgConfig> {
        lookup(&self.datasources.redshift, "redshift", name, env)
    }

    pub fn sqlserver(&self, name: &str, env: &str) -> Result<&SqlServerConfig> {
        lookup(&self.datasources.sqlserver, "sqlserver", name, env)
    }

    pub fn sftp(&self, name: &str, env: &str) -> Result<&SftpConfig> {
        lookup(&self.datasources.sftp, "sftp", name, env)
    }

    pub fn ftp(&self, name: &str, env: &str) -> Result<&FtpConfig> {
        lookup(&self.datasources.ftp, "ftp", name, env)
    }
}

fn lookup<'a, T>(map: &'a Environments<T>, kind: &str, name: &str, env: &str) -> Result<&'a T> {
    map.get(name).and_then(|envs| envs.get(env)).ok_or_else(|| {
        MoverError::Config(format!(
            "no {} datasource named '{}' for environment '{}'",
            kind, name, env
        ))
    })
}
