//! The transfer orchestrator.
//!
//! ```no_run
//! # async fn demo() -> datamover::Result<()> {
//! use datamover::{ConsoleDatasource, Datamover, FileDatasource, Settings};
//!
//! let mut source = FileDatasource::new("orders.tsv");
//! let mut sink = ConsoleDatasource::new();
//! let mut mover = Datamover::new(Settings::default());
//! let report = mover
//!     .from(&mut source)
//!     .delimiter(b'\t')
//!     .to(&mut sink)
//!     .delimiter(b',')
//!     .stream()
//!     .await?;
//! println!("{} records", report.records.unwrap_or(0));
//! # Ok(())
//! # }
//! ```

mod buffered;
pub mod directive;
mod stream;

use serde::Serialize;

use crate::config::Settings;
use crate::core::{Datasource, StagingArea};
use crate::transformer::SharedTransformer;
use crate::warehouse::LoadReport;

pub use directive::{Compression, SinkOptions, SourceDirective, SourceOptions, Transfer};

/// How a transfer moved its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Stream,
    Buffered,
}

/// Outcome of one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub mode: TransferMode,
    /// Records written, for streaming transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    /// Bytes delivered or staged, for buffered transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Name the payload was stored under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadReport>,
    /// Merged source and sink trace.
    pub logs: Vec<String>,
}

/// Runs transfers between datasources, one at a time.
///
/// After every transfer, successful or not, [`Datamover::logs`] holds the
/// merged trace of the source, the staging area (if used) and the sink.
/// The staging area outlives transfers, so its trace is reset by each one.
pub struct Datamover {
    settings: Settings,
    transformer: Option<SharedTransformer>,
    staging: Option<Box<dyn StagingArea>>,
    logs: Vec<String>,
}

impl Datamover {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            transformer: None,
            staging: None,
            logs: Vec::new(),
        }
    }

    /// Object storage used to stage data for warehouses that load from it.
    pub fn with_staging(mut self, staging: impl StagingArea + 'static) -> Self {
        self.staging = Some(Box::new(staging));
        self
    }

    /// Use `transformer` for streaming transfers instead of one built from
    /// the directive's delimiters.
    pub fn with_transformer(mut self, transformer: SharedTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Merged trace of the most recent transfer.
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Start a directive reading from `source`.
    pub fn from<'a>(&'a mut self, source: &'a mut dyn Datasource) -> SourceDirective<'a> {
        self.logs.clear();
        if let Some(staging) = self.staging.as_mut() {
            staging.log_mut().clear();
        }
        SourceDirective::new(self, source)
    }
}
