//! One-shot transfers over a fully materialized buffer.
//!
//! Stages run in a fixed order, each only when it applies:
//!
//! ```text
//! fetch -> decrypt -> decompress -> delimiter -> compress -> encrypt -> deliver
//! ```
//!
//! Warehouse sinks replace delivery with a staging-table load. Warehouses that
//! read object storage themselves are fed a staged object; the others get the
//! rows streamed back out of a temp file.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::{ensure_exists, Datasource, DatasourceKind, Payload, StagingArea, WriteOptions};
use crate::error::{MoverError, Result};
use crate::format::{convert_delimiter, delimiter, gpg, gzip, Gpg, ResponseName};
use crate::transformer::{decode_records, reader_chunks, CsvTransformer};
use crate::warehouse::{FeedKind, LoadReport, StagingFeed};

use super::directive::{Compression, SinkOptions, SourceOptions};

/// What a buffered run delivered.
#[derive(Debug, Default)]
pub(super) struct Delivered {
    pub bytes: Option<u64>,
    pub response_target: Option<String>,
    pub load: Option<LoadReport>,
}

/// Buffer plus the name bookkeeping that went with it.
struct Prepared {
    buffer: Vec<u8>,
    /// Source filename with every stage's extension change applied.
    name: ResponseName,
    /// Extensions added by compress/encrypt, for names chosen by the caller.
    appended: String,
}

pub(super) struct Pipeline<'a> {
    pub settings: &'a Settings,
    pub staging: Option<&'a mut (dyn StagingArea + 'static)>,
    pub source_options: &'a SourceOptions,
    pub sink_options: &'a SinkOptions,
}

impl Pipeline<'_> {
    pub async fn run(
        &mut self,
        source: &mut dyn Datasource,
        sink: &mut dyn Datasource,
    ) -> Result<Delivered> {
        info!(
            "Buffered transfer {} -> {}",
            source.display_name(),
            sink.display_name()
        );

        let warehouse_kind = sink.kind();
        let feed_kind = sink.as_warehouse().map(|warehouse| warehouse.feed_kind());
        match feed_kind {
            Some(FeedKind::Object) => self.load_from_object(source, sink, warehouse_kind).await,
            Some(FeedKind::Records) => self.load_from_records(source, sink).await,
            None => self.deliver(source, sink).await,
        }
    }

    fn target_delimiter(&self) -> u8 {
        self.sink_options.delimiter.unwrap_or(b',')
    }

    async fn deliver(
        &mut self,
        source: &mut dyn Datasource,
        sink: &mut dyn Datasource,
    ) -> Result<Delivered> {
        let compress = self.sink_options.compression == Some(Compression::Gzip);
        let prepared = self
            .prepare(source, compress, &self.sink_options.recipients)
            .await?;

        let sink_filename = sink.filename();
        let delivered_name = match &self.sink_options.response_target {
            Some(name) => name.clone(),
            None if !sink_filename.is_empty() => format!("{}{}", sink_filename, prepared.appended),
            None => prepared.name.into_string(),
        };
        let options = if !delivered_name.is_empty() && delivered_name != sink_filename {
            WriteOptions::response_target(delivered_name.clone())
        } else {
            WriteOptions::default()
        };

        sink.bulk_write(Payload::Buffer(&prepared.buffer), &options)
            .await?;
        info!(
            "Delivered {} bytes to {}",
            prepared.buffer.len(),
            sink.display_name()
        );

        Ok(Delivered {
            bytes: Some(prepared.buffer.len() as u64),
            response_target: Some(delivered_name).filter(|name| !name.is_empty()),
            load: None,
        })
    }

    /// Postgres-style load: rows go through a temp file into COPY FROM STDIN.
    async fn load_from_records(
        &mut self,
        source: &mut dyn Datasource,
        sink: &mut dyn Datasource,
    ) -> Result<Delivered> {
        let prepared = self.prepare(source, false, &[]).await?;

        tokio::fs::create_dir_all(&self.settings.temp_path).await?;
        let temp = tempfile::Builder::new()
            .prefix("datamover-")
            .suffix(delimiter::extension_for(self.target_delimiter()))
            .tempfile_in(&self.settings.temp_path)?;
        tokio::fs::write(temp.path(), &prepared.buffer).await?;
        debug!(
            "Wrote {} bytes to {}",
            prepared.buffer.len(),
            temp.path().display()
        );

        let file = tokio::fs::File::open(temp.path()).await?;
        let transformer = Arc::new(CsvTransformer::with_delimiter(self.target_delimiter()));
        let records = decode_records(reader_chunks(file), false, transformer);

        let warehouse = sink
            .as_warehouse()
            .ok_or_else(|| MoverError::Config("sink is not a warehouse".into()))?;
        let report = warehouse.upload(StagingFeed::Records(records)).await?;

        Ok(Delivered {
            bytes: Some(prepared.buffer.len() as u64),
            response_target: None,
            load: Some(report),
        })
    }

    /// Redshift-style load from an object in storage, staging it first unless
    /// the source already is one.
    async fn load_from_object(
        &mut self,
        source: &mut dyn Datasource,
        sink: &mut dyn Datasource,
        warehouse_kind: DatasourceKind,
    ) -> Result<Delivered> {
        let (location, bytes, staged_name) = if source.kind().is_object_storage() {
            ensure_exists(source).await?;
            let location = source.object_location().ok_or_else(|| {
                MoverError::Config(format!(
                    "{} has no object location to load from",
                    source.display_name()
                ))
            })?;
            info!("Loading {} directly from {}", sink.display_name(), location.url);
            (location, None, None)
        } else {
            let remote_directory = source.remote_directory();
            let Some(staging) = self.staging.as_deref_mut() else {
                return Err(MoverError::Config(format!(
                    "loading {} from {} needs a staging area (settings.staging)",
                    sink.display_name(),
                    source.display_name()
                )));
            };
            let prefix = self
                .settings
                .staging
                .as_ref()
                .map(|staging| staging.prefix.clone())
                .unwrap_or_default();

            let prepared = Self::prepare_with(
                self.settings,
                self.source_options,
                self.sink_options,
                source,
                true,
                &[],
            )
            .await?;

            let directory =
                staging_directory(&prefix, warehouse_kind, &remote_directory, Utc::now());
            staging.point_at(&directory, prepared.name.as_str());
            staging
                .bulk_write(Payload::Buffer(&prepared.buffer), &WriteOptions::default())
                .await?;
            let location = staging.object_location().ok_or_else(|| {
                MoverError::Config(format!(
                    "{} has no object location to load from",
                    staging.display_name()
                ))
            })?;
            info!("Staged {} bytes at {}", prepared.buffer.len(), location.url);
            (
                location,
                Some(prepared.buffer.len() as u64),
                Some(staging.key()),
            )
        };

        let warehouse = sink
            .as_warehouse()
            .ok_or_else(|| MoverError::Config("sink is not a warehouse".into()))?;
        let report = warehouse.upload(StagingFeed::Object(location)).await?;

        Ok(Delivered {
            bytes,
            response_target: staged_name,
            load: Some(report),
        })
    }

    async fn prepare(
        &self,
        source: &mut dyn Datasource,
        compress: bool,
        recipients: &[String],
    ) -> Result<Prepared> {
        Self::prepare_with(
            self.settings,
            self.source_options,
            self.sink_options,
            source,
            compress,
            recipients,
        )
        .await
    }

    /// Fetch the source and run every stage up to delivery.
    async fn prepare_with(
        settings: &Settings,
        source_options: &SourceOptions,
        sink_options: &SinkOptions,
        source: &mut dyn Datasource,
        compress: bool,
        recipients: &[String],
    ) -> Result<Prepared> {
        let mut name = ResponseName::new(source.filename());
        let mut appended = String::new();

        let mut buffer = source.bulk_read().await?;
        debug!("Fetched {} bytes from {}", buffer.len(), source.display_name());

        if source_options.decrypt {
            let gpg = keyring(settings)?;
            buffer = gpg
                .decrypt(&buffer, source_options.password.as_deref())
                .await?;
            name.strip_extension();
            debug!("Decrypted to {} bytes", buffer.len());
        }

        if name.has_extension(gzip::EXTENSION) {
            buffer = gzip::decompress(&buffer)?;
            name.strip_extension();
        }

        let target = sink_options.delimiter.unwrap_or(b',');
        if let Some(source_delimiter) = source_options.delimiter {
            if source_delimiter != target {
                buffer = convert_delimiter(&buffer, source_delimiter, target)?.into_owned();
                name.strip_extension();
                name.push_extension(delimiter::extension_for(target));
            }
        }

        if compress && !gzip::is_gzip(&buffer) {
            buffer = gzip::compress(&buffer)?;
            name.push_extension(gzip::EXTENSION);
            appended.push_str(gzip::EXTENSION);
        }

        if !recipients.is_empty() {
            let gpg = keyring(settings)?;
            buffer = gpg.encrypt(&buffer, recipients).await?;
            name.push_extension(gpg::EXTENSION);
            appended.push_str(gpg::EXTENSION);
            debug!("Encrypted for {} recipients", recipients.len());
        }

        Ok(Prepared {
            buffer,
            name,
            appended,
        })
    }
}

fn keyring(settings: &Settings) -> Result<Gpg> {
    settings
        .keyring_path
        .as_ref()
        .map(Gpg::new)
        .ok_or_else(|| MoverError::Config("gpg stages need settings.keyring_path".into()))
}

/// `[prefix/]to_<kind>/<remote dir>/<YYYY/MM/DD/HH/MM>`, skipping empty parts.
fn staging_directory(
    prefix: &str,
    warehouse: DatasourceKind,
    remote_directory: &str,
    at: DateTime<Utc>,
) -> String {
    let kind = format!("to_{}", warehouse);
    let stamp = at.format("%Y/%m/%d/%H/%M").to_string();
    [
        prefix.trim_matches('/'),
        kind.as_str(),
        remote_directory.trim_matches('/'),
        stamp.as_str(),
    ]
    .iter()
    .filter(|segment| !segment.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join("/")
}
