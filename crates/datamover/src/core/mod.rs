//! Core abstractions shared by adapters and pipelines.
//!
//! - [`record`]: the decoded row type and stream aliases
//! - [`log`]: per-datasource operation trace
//! - [`location`]: directory + filename bookkeeping
//! - [`traits`]: the [`Datasource`] capability interface

pub mod location;
pub mod log;
pub mod record;
pub mod traits;

pub use location::Location;
pub use log::OperationLog;
pub use record::{ChunkStream, Record, RecordStream};
pub use traits::{
    ensure_exists, Datasource, DatasourceKind, ObjectLocation, Payload, StagingArea,
    Transforming, WriteOptions,
};
