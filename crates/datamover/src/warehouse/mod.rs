//! SQL warehouse bulk loads through a staging table.
//!
//! A warehouse sink is configured with [`Warehouse::set_copy`] and then fed by
//! [`Warehouse::upload`]. Every upload creates `<table>_<suffix>` next to the
//! main table, populates it, merges it with one [`LoadStrategy`] and drops it
//! again whether or not the merge succeeded.

pub mod commands;
pub mod load;
pub mod session;
pub mod staging;
pub mod strategy;

use async_trait::async_trait;

use crate::error::{MoverError, Result};

pub use commands::TableNames;
pub use load::{run_load, LoadReport, StagingFeed};
pub use session::SqlSession;
pub use staging::{staging_suffix, StagingTable};
pub use strategy::{LoadOptions, LoadStrategy};

/// How a warehouse populates its staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Rows are streamed through this process (COPY FROM STDIN).
    Records,
    /// The warehouse reads an object from storage itself.
    Object,
}

/// Capability of datasources that load through a staging table.
#[async_trait]
pub trait Warehouse: Send {
    fn feed_kind(&self) -> FeedKind;

    /// Configure the destination and load options used by later uploads.
    fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions);

    /// Run one staging-table load.
    async fn upload(&mut self, feed: StagingFeed<'_>) -> Result<LoadReport>;

    /// Report of the most recent successful upload.
    fn last_load(&self) -> Option<&LoadReport>;
}

/// Destination configured through `set_copy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub schema: String,
    pub table: String,
    pub options: LoadOptions,
}

/// Load bookkeeping shared by warehouse adapters.
///
/// The staging suffix is fixed at construction, so every upload issued by one
/// adapter instance uses the same staging name.
#[derive(Debug, Clone)]
pub struct WarehouseState {
    suffix: String,
    target: Option<CopyTarget>,
    last: Option<LoadReport>,
}

impl Default for WarehouseState {
    fn default() -> Self {
        Self::new()
    }
}

impl WarehouseState {
    pub fn new() -> Self {
        Self {
            suffix: staging_suffix(),
            target: None,
            last: None,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions) {
        self.target = Some(CopyTarget {
            schema: schema.to_string(),
            table: table.to_string(),
            options,
        });
    }

    pub fn target(&self) -> Option<&CopyTarget> {
        self.target.as_ref()
    }

    /// Names and options for the next upload.
    pub fn plan(&self) -> Result<(TableNames, LoadOptions)> {
        let target = self.target.as_ref().ok_or_else(|| {
            MoverError::Config("warehouse upload requires set_copy(schema, table, ...)".into())
        })?;
        Ok((
            TableNames::new(&target.schema, &target.table, &self.suffix),
            target.options.clone(),
        ))
    }

    pub fn finish(&mut self, report: LoadReport) -> LoadReport {
        self.last = Some(report.clone());
        report
    }

    pub fn last(&self) -> Option<&LoadReport> {
        self.last.as_ref()
    }

    pub fn rows_deleted(&self) -> u64 {
        self.last.as_ref().map_or(0, |r| r.rows_deleted)
    }

    pub fn rows_inserted(&self) -> u64 {
        self.last.as_ref().map_or(0, |r| r.rows_inserted)
    }
}
