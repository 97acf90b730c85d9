//! Transfer directives: `mover.from(source)...to(sink)...run()`.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::{buffered, stream, Datamover, TransferMode, TransferReport};
use crate::core::{Datasource, OperationLog};
use crate::error::{MoverError, Result};
use crate::transformer::{CsvTransformer, SharedTransformer};

/// Compression applied by the buffered pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
}

impl FromStr for Compression {
    type Err = MoverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gzip" | "gz" => Ok(Compression::Gzip),
            other => Err(MoverError::Config(format!(
                "unsupported compression '{}' (gzip)",
                other
            ))),
        }
    }
}

/// How the source side is read.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Column separator of the source data. Unset means comma.
    pub delimiter: Option<u8>,
    /// The source payload is gpg-enveloped.
    pub decrypt: bool,
    /// Passphrase for the secret key.
    pub password: Option<String>,
}

/// How the sink side is written.
#[derive(Debug, Clone, Default)]
pub struct SinkOptions {
    /// Column separator written to the sink. Unset means comma.
    pub delimiter: Option<u8>,
    pub compression: Option<Compression>,
    /// Encrypt for these recipients when non-empty.
    pub recipients: Vec<String>,
    /// Deliver under this name instead of the derived one.
    pub response_target: Option<String>,
}

impl SinkOptions {
    fn buffered_only(&self) -> Option<&'static str> {
        if self.compression.is_some() {
            Some("compression")
        } else if !self.recipients.is_empty() {
            Some("encryption")
        } else if self.response_target.is_some() {
            Some("response target")
        } else {
            None
        }
    }
}

/// A source picked, sink not yet chosen.
pub struct SourceDirective<'a> {
    mover: &'a mut Datamover,
    source: &'a mut dyn Datasource,
    options: SourceOptions,
}

impl<'a> SourceDirective<'a> {
    pub(super) fn new(mover: &'a mut Datamover, source: &'a mut dyn Datasource) -> Self {
        Self {
            mover,
            source,
            options: SourceOptions::default(),
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.options.delimiter = Some(delimiter);
        self
    }

    /// Treat the source as encrypted, unlocking the key with `password`.
    pub fn decrypt(mut self, password: Option<String>) -> Self {
        self.options.decrypt = true;
        self.options.password = password;
        self
    }

    pub fn options(mut self, options: SourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn to(self, sink: &'a mut dyn Datasource) -> Transfer<'a> {
        Transfer {
            mover: self.mover,
            source: self.source,
            sink,
            source_options: self.options,
            sink_options: SinkOptions::default(),
        }
    }
}

/// A fully specified transfer, ready to run in either mode.
pub struct Transfer<'a> {
    mover: &'a mut Datamover,
    source: &'a mut dyn Datasource,
    sink: &'a mut dyn Datasource,
    source_options: SourceOptions,
    sink_options: SinkOptions,
}

impl<'a> Transfer<'a> {
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.sink_options.delimiter = Some(delimiter);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.sink_options.compression = Some(compression);
        self
    }

    pub fn encrypt_for(mut self, recipients: Vec<String>) -> Self {
        self.sink_options.recipients = recipients;
        self
    }

    pub fn response_target(mut self, name: impl Into<String>) -> Self {
        self.sink_options.response_target = Some(name.into());
        self
    }

    pub fn options(mut self, options: SinkOptions) -> Self {
        self.sink_options = options;
        self
    }

    fn transformer(&self) -> SharedTransformer {
        match &self.mover.transformer {
            Some(transformer) => transformer.clone(),
            None => Arc::new(CsvTransformer::new(
                self.source_options.delimiter.unwrap_or(b','),
                self.sink_options.delimiter.unwrap_or(b','),
            )),
        }
    }

    /// Move records one at a time from source to sink.
    pub async fn stream(self) -> Result<TransferReport> {
        if self.source_options.decrypt {
            return Err(MoverError::Config(
                "decryption requires a buffered transfer".into(),
            ));
        }
        if let Some(option) = self.sink_options.buffered_only() {
            return Err(MoverError::Config(format!(
                "{} requires a buffered transfer",
                option
            )));
        }

        let transformer = self.transformer();
        let Transfer {
            mover,
            source,
            sink,
            ..
        } = self;

        let outcome = stream::run(&mut *source, &mut *sink, transformer).await;
        mover.logs = OperationLog::merged([source.log(), sink.log()]);

        let records = outcome?;
        let load = sink
            .as_warehouse()
            .and_then(|warehouse| warehouse.last_load().cloned());
        Ok(TransferReport {
            mode: TransferMode::Stream,
            records: Some(records),
            bytes: None,
            response_target: None,
            load,
            logs: mover.logs.clone(),
        })
    }

    /// Materialize the source and deliver it through the buffered stages.
    pub async fn run(self) -> Result<TransferReport> {
        let Transfer {
            mover,
            source,
            sink,
            source_options,
            sink_options,
        } = self;

        let mut pipeline = buffered::Pipeline {
            settings: &mover.settings,
            staging: mover.staging.as_deref_mut(),
            source_options: &source_options,
            sink_options: &sink_options,
        };
        let outcome = pipeline.run(&mut *source, &mut *sink).await;

        // staging entries are only ever from this transfer, see Datamover::from
        let staging_log = mover.staging.as_ref().map(|staging| staging.log());
        mover.logs = OperationLog::merged(
            std::iter::once(source.log())
                .chain(staging_log)
                .chain(std::iter::once(sink.log())),
        );

        let delivered = outcome?;
        Ok(TransferReport {
            mode: TransferMode::Buffered,
            records: None,
            bytes: delivered.bytes,
            response_target: delivered.response_target,
            load: delivered.load,
            logs: mover.logs.clone(),
        })
    }
}
