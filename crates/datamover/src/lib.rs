//! # datamover
//!
//! Move tabular data between heterogeneous endpoints.
//!
//! Every endpoint (local file, stdout, S3, FTP/SFTP, PostgreSQL, Redshift,
//! SQL Server) implements one [`Datasource`] trait and supports the subset of
//! operations its backend allows. A [`Datamover`] pairs a source with a sink
//! and moves the data in one of two modes:
//!
//! - **Streaming**: the sink pulls decoded records from the source one at a
//!   time, re-encoding them with a shared [`Transformer`]
//! - **Buffered**: the whole payload is fetched, then optionally decrypted,
//!   decompressed, re-delimited, compressed and encrypted before delivery
//!
//! Warehouse sinks load through a staging table that is dropped whether or
//! not the load succeeds.
//!
//! ## Example
//!
//! ```rust,no_run
//! use datamover::{Compression, Datamover, FileDatasource, Settings};
//!
//! #[tokio::main]
//! async fn main() -> datamover::Result<()> {
//!     let mut source = FileDatasource::new("exports/orders.csv");
//!     let mut sink = FileDatasource::new("outbox/orders.csv");
//!     let mut mover = Datamover::new(Settings::default());
//!     let report = mover
//!         .from(&mut source)
//!         .to(&mut sink)
//!         .compression(Compression::Gzip)
//!         .run()
//!         .await?;
//!     println!("stored as {:?}", report.response_target);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod datasource;
pub mod error;
pub mod format;
pub mod process;
pub mod transfer;
pub mod transformer;
pub mod warehouse;

// Re-exports for convenient access
pub use config::{Config, Settings};
pub use crate::core::{Datasource, DatasourceKind, OperationLog, Payload, Record, WriteOptions};
pub use datasource::{
    ConsoleDatasource, EndpointSpec, FileDatasource, PostgresDatasource, RedshiftDatasource,
    RemoteDatasource, S3Datasource, SqlServerDatasource,
};
pub use error::{MoverError, Result};
pub use transfer::{Compression, Datamover, TransferMode, TransferReport};
pub use transformer::{CsvTransformer, Transformer};
pub use warehouse::{LoadOptions, LoadReport, LoadStrategy, Warehouse};
