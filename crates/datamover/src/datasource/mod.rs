//! Concrete datasource adapters.
//!
//! | adapter | module |
//! |---|---|
//! | local file | [`file`] |
//! | stdout (or any writer) | [`console`] |
//! | S3-compatible object storage | [`s3`] |
//! | FTP / SFTP through curl | [`remote`] |
//! | PostgreSQL | [`postgres`] |
//! | Redshift | [`redshift`] |
//! | SQL Server | [`sqlserver`] |
//!
//! [`factory`] builds any of them from a config catalogue and an endpoint spec.

pub mod console;
pub mod factory;
pub mod file;
pub mod postgres;
pub mod redshift;
pub mod remote;
pub mod s3;
pub mod sqlserver;
pub mod tls;

use futures::TryStreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::core::{Datasource, OperationLog};
use crate::error::Result;
use crate::format::gzip;
use crate::transformer::Transformer;

pub use console::ConsoleDatasource;
pub use factory::{build, parse_delimiter, EndpointSpec};
pub use file::FileDatasource;
pub use postgres::PostgresDatasource;
pub use redshift::RedshiftDatasource;
pub use remote::{RemoteDatasource, RemoteProtocol};
pub use s3::S3Datasource;
pub use sqlserver::SqlServerDatasource;

/// Pull every record out of `source`, encode it and append it to `writer`.
///
/// The writer is flushed but not shut down. Returns the number of records.
pub async fn pump_records<W>(
    source: &mut dyn Datasource,
    transformer: &dyn Transformer,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut records = source.records().await?;
    let mut count = 0u64;
    while let Some(record) = records.try_next().await? {
        writer.write_all(&transformer.encode(&record)?).await?;
        count += 1;
    }
    writer.flush().await?;
    Ok(count)
}

/// Whether a reader should inflate its input: either configured, or the name
/// carries the gzip extension.
pub(crate) fn gunzip_on_read(configured: bool, name: &str) -> bool {
    configured || name.ends_with(gzip::EXTENSION)
}

/// Stream `source` into `writer`, recording start and end in `log`.
pub(crate) async fn write_stream<W>(
    target: &str,
    log: &mut OperationLog,
    source: &mut dyn Datasource,
    transformer: &dyn Transformer,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    log.record(format!("Starting write stream to {}", target));
    let count = pump_records(source, transformer, writer).await?;
    log.record(format!("Completed write stream to {}", target));
    info!("Streamed {} records from {} to {}", count, source.display_name(), target);
    Ok(count)
}
