//! The endpoint abstraction used by both transfer pipelines.
//!
//! - [`Datasource`]: one physical location that can produce and/or consume data
//! - [`Transforming`]: optional capability for adapters that frame lines through a codec
//! - [`Warehouse`](crate::warehouse::Warehouse): optional capability for SQL bulk-load sinks
//!
//! Every operation has a provided implementation that fails with
//! [`MoverError::NotImplemented`] after writing a fatal trace to the adapter's
//! log. Adapters override only what their backend supports.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use futures::TryStreamExt;

use crate::error::{MoverError, Result};
use crate::transformer::SharedTransformer;
use crate::warehouse::Warehouse;

use super::log::OperationLog;
use super::record::{Record, RecordStream};

/// Backend family of a datasource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasourceKind {
    File,
    Console,
    S3,
    Ftp,
    Sftp,
    Postgres,
    Redshift,
    SqlServer,
}

impl DatasourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceKind::File => "file",
            DatasourceKind::Console => "console",
            DatasourceKind::S3 => "s3",
            DatasourceKind::Ftp => "ftp",
            DatasourceKind::Sftp => "sftp",
            DatasourceKind::Postgres => "postgres",
            DatasourceKind::Redshift => "redshift",
            DatasourceKind::SqlServer => "sqlserver",
        }
    }

    /// Object storage can feed a warehouse's native bulk loader directly.
    pub fn is_object_storage(&self) -> bool {
        matches!(self, DatasourceKind::S3)
    }
}

impl fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content handed to [`Datasource::bulk_write`].
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Buffer(&'a [u8]),
    LocalPath(&'a Path),
}

impl Payload<'_> {
    /// Materialize the payload in memory.
    pub async fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Buffer(buffer) => Ok(buffer.to_vec()),
            Payload::LocalPath(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// Options for [`Datasource::bulk_write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Name to store the payload under, replacing the adapter's filename.
    pub response_target: Option<String>,
}

impl WriteOptions {
    pub fn response_target(name: impl Into<String>) -> Self {
        Self {
            response_target: Some(name.into()),
        }
    }
}

/// An object a warehouse can bulk-load from without going through this process.
#[derive(Clone)]
pub struct ObjectLocation {
    /// `s3://bucket/key`
    pub url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl ObjectLocation {
    pub fn is_gzip(&self) -> bool {
        self.url.ends_with(".gz")
    }
}

impl fmt::Debug for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLocation")
            .field("url", &self.url)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Adapters whose records are framed by a [`Transformer`](crate::transformer::Transformer).
pub trait Transforming {
    fn set_transformer(&mut self, transformer: SharedTransformer);
}

/// Object storage that can hold payloads for warehouses loading from it.
pub trait StagingArea: Datasource {
    /// Point at `directory/filename`, logging both halves.
    fn point_at(&mut self, directory: &str, filename: &str);

    /// Key of the object currently pointed at.
    fn key(&self) -> String;
}

/// One physical endpoint.
///
/// An instance owns its connection, its [`OperationLog`] and, for warehouses,
/// its staging suffix. It is not meant to be shared by concurrent transfers.
#[async_trait]
pub trait Datasource: Send {
    fn kind(&self) -> DatasourceKind;

    /// Endpoint identity derived from location fields.
    fn display_name(&self) -> String;

    fn log(&self) -> &OperationLog;

    fn log_mut(&mut self) -> &mut OperationLog;

    fn filename(&self) -> String {
        String::new()
    }

    fn remote_directory(&self) -> String {
        String::new()
    }

    // ===== Streaming =====

    /// Open the resource and decode it into records, in source order.
    async fn records(&mut self) -> Result<RecordStream<'_>> {
        Err(self.unsupported("stream read"))
    }

    /// Invoke `emit` once per record until the source is exhausted.
    async fn stream_read(
        &mut self,
        emit: &mut (dyn FnMut(Record) -> Result<()> + Send),
    ) -> Result<u64> {
        let mut records = self.records().await?;
        let mut count = 0u64;
        while let Some(record) = records.try_next().await? {
            emit(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Pull every record from `source`, encode and append it, then finalize.
    /// Returns the number of records written.
    async fn stream_write(&mut self, _source: &mut dyn Datasource) -> Result<u64> {
        Err(self.unsupported("stream write"))
    }

    // ===== Bulk =====

    /// Fetch the whole resource into memory.
    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        Err(self.unsupported("bulk read"))
    }

    /// Fetch the whole resource straight to a local file. Returns bytes written.
    async fn bulk_read_to(&mut self, _path: &Path) -> Result<u64> {
        Err(self.unsupported("bulk read to path"))
    }

    /// Write an entire payload to the resource in one shot.
    async fn bulk_write(&mut self, _payload: Payload<'_>, _options: &WriteOptions) -> Result<()> {
        Err(self.unsupported("bulk write"))
    }

    async fn exists(&mut self) -> Result<bool> {
        Err(self.unsupported("exists"))
    }

    // ===== Capabilities =====

    fn as_transforming(&mut self) -> Option<&mut dyn Transforming> {
        None
    }

    fn as_warehouse(&mut self) -> Option<&mut dyn Warehouse> {
        None
    }

    /// Native bulk-load location, for object storage adapters.
    fn object_location(&self) -> Option<ObjectLocation> {
        None
    }

    /// Log a fatal trace and build the NotImplemented error for `operation`.
    fn unsupported(&mut self, operation: &str) -> MoverError {
        let name = self.display_name();
        self.log_mut()
            .fatal(format!("{} does not implement {}", name, operation));
        MoverError::not_implemented(name, operation)
    }
}

/// Fail with `SourceEmpty` when the probe comes back negative.
pub async fn ensure_exists(datasource: &mut dyn Datasource) -> Result<()> {
    if datasource.exists().await? {
        return Ok(());
    }
    let message = format!("no data returned from {}", datasource.display_name());
    datasource
        .log_mut()
        .record(format!("SourceIsEmpty: {}", message));
    Err(MoverError::SourceEmpty(message))
}
