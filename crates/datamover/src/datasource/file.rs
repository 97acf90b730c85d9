//! Local filesystem datasource.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::{gunzip_on_read, write_stream};
use crate::core::{
    ensure_exists, Datasource, DatasourceKind, OperationLog, Payload, RecordStream,
    Transforming, WriteOptions,
};
use crate::error::Result;
use crate::transformer::{decode_records, default_transformer, reader_chunks, SharedTransformer};

pub struct FileDatasource {
    path: PathBuf,
    decompress: bool,
    transformer: SharedTransformer,
    log: OperationLog,
}

impl FileDatasource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            decompress: false,
            transformer: default_transformer(),
            log: OperationLog::new(),
        }
    }

    /// Inflate on read even when the name does not end in `.gz`.
    pub fn with_decompress(mut self, decompress: bool) -> Self {
        self.decompress = decompress;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.log
            .record(format!("Setting filename...{}", self.path.display()));
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Datasource for FileDatasource {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::File
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    fn log(&self) -> &OperationLog {
        &self.log
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn remote_directory(&self) -> String {
        self.path
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    async fn records(&mut self) -> Result<RecordStream<'_>> {
        ensure_exists(self).await?;
        self.log
            .record(format!("Opening {} for reading", self.path.display()));
        let file = File::open(&self.path).await?;
        let gunzip = gunzip_on_read(self.decompress, &self.filename());
        Ok(decode_records(
            reader_chunks(file),
            gunzip,
            self.transformer.clone(),
        ))
    }

    async fn stream_write(&mut self, source: &mut dyn Datasource) -> Result<u64> {
        self.ensure_parent(&self.path).await?;
        let file = File::create(&self.path).await?;
        let mut writer = BufWriter::new(file);

        let target = self.display_name();
        let transformer = self.transformer.clone();
        let count = write_stream(
            &target,
            &mut self.log,
            source,
            transformer.as_ref(),
            &mut writer,
        )
        .await?;
        writer.shutdown().await?;
        Ok(count)
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        ensure_exists(self).await?;
        self.log.record(format!("Reading {}", self.path.display()));
        Ok(tokio::fs::read(&self.path).await?)
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        ensure_exists(self).await?;
        self.log.record(format!(
            "Copying {} to {}",
            self.path.display(),
            path.display()
        ));
        Ok(tokio::fs::copy(&self.path, path).await?)
    }

    async fn bulk_write(&mut self, payload: Payload<'_>, options: &WriteOptions) -> Result<()> {
        if let Some(name) = &options.response_target {
            let renamed = match self.path.parent() {
                Some(dir) => dir.join(name),
                None => PathBuf::from(name),
            };
            self.set_path(renamed);
        }
        self.ensure_parent(&self.path).await?;

        match payload {
            Payload::Buffer(buffer) => {
                self.log.record(format!(
                    "Writing {} bytes to {}",
                    buffer.len(),
                    self.path.display()
                ));
                tokio::fs::write(&self.path, buffer).await?;
            }
            Payload::LocalPath(local) => {
                self.log.record(format!(
                    "Copying {} to {}",
                    local.display(),
                    self.path.display()
                ));
                let bytes = tokio::fs::copy(local, &self.path).await?;
                debug!("Copied {} bytes", bytes);
            }
        }
        Ok(())
    }

    async fn exists(&mut self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.path).await?)
    }

    fn as_transforming(&mut self) -> Option<&mut dyn Transforming> {
        Some(self)
    }
}

impl Transforming for FileDatasource {
    fn set_transformer(&mut self, transformer: SharedTransformer) {
        self.transformer = transformer;
    }
}
