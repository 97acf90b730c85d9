//! FTP and SFTP datasources driven through the `curl` binary.
//!
//! Every operation spawns one curl process and waits for its exit status; a
//! non-zero exit is a transport failure even when some bytes were moved.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{gunzip_on_read, write_stream};
use crate::config::{FtpConfig, SftpConfig};
use crate::core::{
    ensure_exists, Datasource, DatasourceKind, Location, OperationLog, Payload, RecordStream,
    Transforming, WriteOptions,
};
use crate::error::{MoverError, Result};
use crate::process::{capture, child_stdout_chunks, failure_message, Captured};
use crate::transformer::{decode_records, default_transformer, SharedTransformer};

/// curl exit codes meaning the remote path does not exist.
const MISSING_PATH_CODES: [i32; 2] = [9, 78];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    Ftp,
    Sftp,
}

impl RemoteProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            RemoteProtocol::Ftp => "ftp",
            RemoteProtocol::Sftp => "sftp",
        }
    }
}

pub struct RemoteDatasource {
    protocol: RemoteProtocol,
    host: String,
    port: u16,
    login: String,
    password: Option<String>,
    ssh_key: Option<PathBuf>,
    decompress: bool,
    program: String,
    location: Location,
    transformer: SharedTransformer,
    log: OperationLog,
}

impl RemoteDatasource {
    pub fn from_ftp(config: &FtpConfig) -> Self {
        Self::new(
            RemoteProtocol::Ftp,
            &config.host,
            config.port,
            &config.login,
            Some(config.password.clone()),
            None,
            config.decompress,
        )
    }

    pub fn from_sftp(config: &SftpConfig) -> Self {
        Self::new(
            RemoteProtocol::Sftp,
            &config.host,
            config.port,
            &config.login,
            config.password.clone(),
            config.ssh_key.clone(),
            config.decompress,
        )
    }

    fn new(
        protocol: RemoteProtocol,
        host: &str,
        port: u16,
        login: &str,
        password: Option<String>,
        ssh_key: Option<PathBuf>,
        decompress: bool,
    ) -> Self {
        Self {
            protocol,
            host: host.to_string(),
            port,
            login: login.to_string(),
            password,
            ssh_key,
            decompress,
            program: "curl".to_string(),
            location: Location::default(),
            transformer: default_transformer(),
            log: OperationLog::new(),
        }
    }

    /// Use a different curl binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn protocol(&self) -> RemoteProtocol {
        self.protocol
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_filepath(&mut self, filepath: &str) {
        let split = Location::from_filepath(filepath);
        self.location
            .set_remote_directory(split.remote_directory(), &mut self.log);
        self.location.set_filename(split.filename(), &mut self.log);
    }

    pub fn set_remote_directory(&mut self, remote_directory: &str) {
        self.location
            .set_remote_directory(remote_directory, &mut self.log);
    }

    pub fn set_filename(&mut self, filename: &str) {
        self.location.set_filename(filename, &mut self.log);
    }

    /// Full URL of the current file, port included.
    pub fn url(&self) -> String {
        self.url_for(&self.location.filepath())
    }

    /// URL of the remote directory, with the trailing slash curl needs to list it.
    pub fn directory_url(&self) -> String {
        let dir = self.location.remote_directory().trim_end_matches('/');
        if dir.is_empty() {
            self.url_for("")
        } else {
            format!("{}/", self.url_for(dir))
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}://{}:{}/{}",
            self.protocol.scheme(),
            self.host,
            self.port,
            path.trim_start_matches('/')
        )
    }

    /// Names in the remote directory.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let url = self.directory_url();
        self.log.record(format!("Listing {}", url));
        let mut command = self.command();
        command.arg("--list-only").arg(&url);
        let captured = self.run(command, None).await?;
        self.check(&captured)?;
        Ok(parse_listing(&captured.stdout))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--silent")
            .arg("--show-error")
            .arg("--no-buffer")
            .arg("--user")
            .arg(format!(
                "{}:{}",
                self.login,
                self.password.as_deref().unwrap_or_default()
            ));
        if let Some(key) = &self.ssh_key {
            command.arg("--key").arg(key);
        }
        command
    }

    async fn run(&self, command: Command, input: Option<&[u8]>) -> Result<Captured> {
        capture(command, input)
            .await
            .map_err(|e| MoverError::transport(self.display_name(), format!("cannot run {}: {}", self.program, e)))
    }

    fn check(&mut self, captured: &Captured) -> Result<()> {
        match captured.failure(&self.program) {
            Some(failure) => {
                self.log.record(failure.clone());
                Err(MoverError::transport(self.display_name(), failure))
            }
            None => Ok(()),
        }
    }

    async fn upload(&mut self, payload: Payload<'_>) -> Result<()> {
        let mut command = self.command();
        command.arg("--ftp-create-dirs");
        let captured = match payload {
            Payload::Buffer(buffer) => {
                self.log.record(format!(
                    "Uploading {} bytes to {}",
                    buffer.len(),
                    self.display_name()
                ));
                command.arg("--upload-file").arg("-").arg(self.url());
                self.run(command, Some(buffer)).await?
            }
            Payload::LocalPath(local) => {
                self.log.record(format!(
                    "Uploading {} to {}",
                    local.display(),
                    self.display_name()
                ));
                command.arg("--upload-file").arg(local).arg(self.url());
                self.run(command, None).await?
            }
        };
        self.check(&captured)
    }
}

fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty() && *line != "." && *line != "..")
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Datasource for RemoteDatasource {
    fn kind(&self) -> DatasourceKind {
        match self.protocol {
            RemoteProtocol::Ftp => DatasourceKind::Ftp,
            RemoteProtocol::Sftp => DatasourceKind::Sftp,
        }
    }

    fn display_name(&self) -> String {
        format!(
            "{}://{}/{}",
            self.protocol.scheme(),
            self.host,
            self.location.filepath().trim_start_matches('/')
        )
    }

    fn log(&self) -> &OperationLog {
        &self.log
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    fn filename(&self) -> String {
        self.location.filename().to_string()
    }

    fn remote_directory(&self) -> String {
        self.location.remote_directory().to_string()
    }

    async fn records(&mut self) -> Result<RecordStream<'_>> {
        let target = self.display_name();
        self.log.record(format!("Opening {} for reading", target));

        let mut command = self.command();
        command
            .arg(self.url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|e| MoverError::transport(&target, format!("cannot run {}: {}", self.program, e)))?;

        let chunks = child_stdout_chunks(child, &self.program, target)?;
        let gunzip = gunzip_on_read(self.decompress, self.location.filename());
        Ok(decode_records(chunks, gunzip, self.transformer.clone()))
    }

    async fn stream_write(&mut self, source: &mut dyn Datasource) -> Result<u64> {
        let target = self.display_name();

        let mut command = self.command();
        command
            .arg("--ftp-create-dirs")
            .arg("--upload-file")
            .arg("-")
            .arg(self.url())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| MoverError::transport(&target, format!("cannot run {}: {}", self.program, e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MoverError::transport(&target, "child stdin is not piped"))?;

        let transformer = self.transformer.clone();
        let pumped = write_stream(
            &target,
            &mut self.log,
            source,
            transformer.as_ref(),
            &mut stdin,
        )
        .await;
        let count = match pumped {
            Ok(count) => count,
            Err(e) => {
                drop(stdin);
                let _ = child.kill().await;
                return Err(e);
            }
        };
        stdin.shutdown().await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let failure = failure_message(&self.program, output.status, &output.stderr);
            self.log.record(failure.clone());
            return Err(MoverError::transport(target, failure));
        }
        debug!("{} exited cleanly after {} records", self.program, count);
        Ok(count)
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        ensure_exists(self).await?;
        self.log.record(format!("Downloading {}", self.display_name()));
        let mut command = self.command();
        command.arg(self.url());
        let captured = self.run(command, None).await?;
        self.check(&captured)?;
        info!("Downloaded {} bytes from {}", captured.stdout.len(), self.display_name());
        Ok(captured.stdout)
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        ensure_exists(self).await?;
        self.log.record(format!(
            "Downloading {} to {}",
            self.display_name(),
            path.display()
        ));
        let mut command = self.command();
        command.arg("--output").arg(path).arg(self.url());
        let captured = self.run(command, None).await?;
        self.check(&captured)?;
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn bulk_write(&mut self, payload: Payload<'_>, options: &WriteOptions) -> Result<()> {
        if let Some(name) = &options.response_target {
            self.location.set_filename(name, &mut self.log);
        }
        self.upload(payload).await
    }

    async fn exists(&mut self) -> Result<bool> {
        let url = self.directory_url();
        let mut command = self.command();
        command.arg("--list-only").arg(&url);
        let captured = self.run(command, None).await?;

        if captured
            .status
            .code()
            .is_some_and(|code| MISSING_PATH_CODES.contains(&code))
        {
            return Ok(false);
        }
        self.check(&captured)?;
        let filename = self.location.filename();
        Ok(parse_listing(&captured.stdout)
            .iter()
            .any(|name| name == filename))
    }

    fn as_transforming(&mut self) -> Option<&mut dyn Transforming> {
        Some(self)
    }
}

impl Transforming for RemoteDatasource {
    fn set_transformer(&mut self, transformer: SharedTransformer) {
        self.transformer = transformer;
    }
}
