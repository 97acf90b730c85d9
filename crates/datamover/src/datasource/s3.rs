//! S3-compatible object storage datasource.
//!
//! Streaming writes go through a multipart upload so the object is never held
//! in memory as a whole; an upload that fails midway is aborted.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use super::gunzip_on_read;
use crate::config::S3Config;
use crate::core::{
    ensure_exists, Datasource, DatasourceKind, Location, ObjectLocation, OperationLog, Payload,
    RecordStream, StagingArea, Transforming, WriteOptions,
};
use crate::error::{MoverError, Result};
use crate::transformer::{decode_records, default_transformer, reader_chunks, SharedTransformer};

/// Multipart part size. S3 requires at least 5 MiB for every part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;

pub struct S3Datasource {
    client: Client,
    bucket: String,
    access_key_id: String,
    secret_access_key: String,
    location: Location,
    compress: bool,
    decompress: bool,
    transformer: SharedTransformer,
    log: OperationLog,
}

impl S3Datasource {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "datamover",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        debug!("S3 client initialized for bucket: {}", config.bucket_name);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            location: Location::default(),
            compress: config.compress,
            decompress: config.decompress,
            transformer: default_transformer(),
            log: OperationLog::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Object key: remote directory joined with filename.
    pub fn key(&self) -> String {
        self.location.filepath()
    }

    /// Point at `key`, logging both halves.
    pub fn set_object_key(&mut self, key: &str) {
        let split = Location::from_filepath(key);
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

    /// Gzip streaming writes.
    pub fn set_compress(&mut self, compress: bool) {
        self.compress = compress;
    }

    /// Size of the object in bytes.
    pub async fn content_length(&self) -> Result<u64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await
            .map_err(|e| MoverError::transport(self.display_name(), DisplayErrorContext(e)))?;
        Ok(output.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn get_body(&self) -> Result<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await
            .map_err(|e| MoverError::transport(self.display_name(), DisplayErrorContext(e)))?;
        Ok(output.body)
    }
}

#[async_trait]
impl Datasource for S3Datasource {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::S3
    }

    fn display_name(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key())
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
        self.log
            .record(format!("Opening {} for reading", self.display_name()));
        let body = self.get_body().await?;
        let gunzip = gunzip_on_read(self.decompress, self.location.filename());
        Ok(decode_records(
            reader_chunks(body.into_async_read()),
            gunzip,
            self.transformer.clone(),
        ))
    }

    async fn stream_write(&mut self, source: &mut dyn Datasource) -> Result<u64> {
        let target = self.display_name();
        self.log.record(format!("Starting write stream to {}", target));

        let mut upload = MultipartWriter::new(
            self.client.clone(),
            self.bucket.clone(),
            self.key(),
            target.clone(),
            self.compress,
        );
        let transformer = self.transformer.clone();

        let pumped = pump_into(&mut upload, source, transformer.as_ref()).await;
        let count = match pumped {
            Ok(count) => count,
            Err(e) => {
                upload.abort().await;
                return Err(e);
            }
        };
        upload.finish().await?;

        self.log
            .record(format!("Completed write stream to {}", target));
        info!("Streamed {} records to {}", count, target);
        Ok(count)
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        ensure_exists(self).await?;
        self.log.record(format!("Downloading {}", self.display_name()));
        let body = self.get_body().await?;
        let data = body
            .collect()
            .await
            .map_err(|e| MoverError::transport(self.display_name(), e))?
            .into_bytes()
            .to_vec();
        debug!("Downloaded {} bytes from {}", data.len(), self.display_name());
        Ok(data)
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        ensure_exists(self).await?;
        self.log.record(format!(
            "Downloading {} to {}",
            self.display_name(),
            path.display()
        ));
        let body = self.get_body().await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut reader = Box::pin(body.into_async_read());
        Ok(tokio::io::copy(&mut reader, &mut file).await?)
    }

    async fn bulk_write(&mut self, payload: Payload<'_>, options: &WriteOptions) -> Result<()> {
        if let Some(name) = &options.response_target {
            self.location.set_filename(name, &mut self.log);
        }
        let target = self.display_name();

        let body = match payload {
            Payload::Buffer(buffer) => {
                self.log
                    .record(format!("Uploading {} bytes to {}", buffer.len(), target));
                ByteStream::from(buffer.to_vec())
            }
            Payload::LocalPath(local) => {
                self.log
                    .record(format!("Uploading {} to {}", local.display(), target));
                ByteStream::from_path(local)
                    .await
                    .map_err(|e| MoverError::transport(&target, e))?
            }
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key())
            .body(body)
            .send()
            .await
            .map_err(|e| MoverError::transport(&target, DisplayErrorContext(e)))?;
        info!("Uploaded {}", target);
        Ok(())
    }

    async fn exists(&mut self) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key())
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(MoverError::transport(
                self.display_name(),
                DisplayErrorContext(e),
            )),
        }
    }

    fn as_transforming(&mut self) -> Option<&mut dyn Transforming> {
        Some(self)
    }

    fn object_location(&self) -> Option<ObjectLocation> {
        Some(ObjectLocation {
            url: self.display_name(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
        })
    }
}

impl StagingArea for S3Datasource {
    fn point_at(&mut self, directory: &str, filename: &str) {
        self.set_remote_directory(directory);
        self.set_filename(filename);
    }

    fn key(&self) -> String {
        self.location.filepath()
    }
}

impl Transforming for S3Datasource {
    fn set_transformer(&mut self, transformer: SharedTransformer) {
        self.transformer = transformer;
    }
}

async fn pump_into(
    upload: &mut MultipartWriter,
    source: &mut dyn Datasource,
    transformer: &dyn crate::transformer::Transformer,
) -> Result<u64> {
    let mut records = source.records().await?;
    let mut count = 0u64;
    while let Some(record) = records.try_next().await? {
        upload.write(&transformer.encode(&record)?).await?;
        count += 1;
    }
    Ok(count)
}

/// Buffers encoded lines into multipart parts, optionally through gzip.
struct MultipartWriter {
    client: Client,
    bucket: String,
    key: String,
    endpoint: String,
    encoder: Option<GzEncoder<Vec<u8>>>,
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl MultipartWriter {
    fn new(client: Client, bucket: String, key: String, endpoint: String, compress: bool) -> Self {
        Self {
            client,
            bucket,
            key,
            endpoint,
            encoder: compress.then(|| GzEncoder::new(Vec::new(), Compression::default())),
            buffer: Vec::with_capacity(PART_SIZE),
            upload_id: None,
            parts: Vec::new(),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(data)?;
                self.buffer.append(encoder.get_mut());
            }
            None => self.buffer.extend_from_slice(data),
        }
        if self.buffer.len() >= PART_SIZE {
            let part = std::mem::replace(&mut self.buffer, Vec::with_capacity(PART_SIZE));
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            let tail = encoder.finish()?;
            self.buffer.extend_from_slice(&tail);
        }

        let Some(upload_id) = self.upload_id.clone() else {
            // Everything fit in one part.
            let body = std::mem::take(&mut self.buffer);
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| MoverError::transport(&self.endpoint, DisplayErrorContext(e)))?;
            return Ok(());
        };

        if !self.buffer.is_empty() {
            let part = std::mem::take(&mut self.buffer);
            if let Err(e) = self.upload_part(part).await {
                self.abort().await;
                return Err(e);
            }
        }

        let parts = std::mem::take(&mut self.parts);
        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;
        if let Err(e) = completed {
            self.abort().await;
            return Err(MoverError::transport(&self.endpoint, DisplayErrorContext(e)));
        }
        Ok(())
    }

    async fn upload_part(&mut self, part: Vec<u8>) -> Result<()> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let output = self
                    .client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&self.key)
                    .send()
                    .await
                    .map_err(|e| MoverError::transport(&self.endpoint, DisplayErrorContext(e)))?;
                let id = output
                    .upload_id()
                    .ok_or_else(|| {
                        MoverError::transport(&self.endpoint, "multipart upload without an id")
                    })?
                    .to_string();
                self.upload_id = Some(id.clone());
                id
            }
        };

        let part_number = self.parts.len() as i32 + 1;
        debug!(
            "Uploading part {} ({} bytes) of {}",
            part_number,
            part.len(),
            self.endpoint
        );
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(part))
            .send()
            .await
            .map_err(|e| MoverError::transport(&self.endpoint, DisplayErrorContext(e)))?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn abort(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = aborted {
            warn!(
                "Failed to abort multipart upload to {}: {}",
                self.endpoint,
                DisplayErrorContext(e)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            region: "us-east-1".into(),
            bucket_name: "archive".into(),
            endpoint: Some("http://127.0.0.1:9".into()),
            path_style: true,
            compress: false,
            decompress: false,
        }
    }

    #[test]
    fn test_display_name_and_key() {
        let mut s3 = S3Datasource::new(&config());
        s3.set_object_key("exports/2024/orders.csv");
        assert_eq!(s3.key(), "exports/2024/orders.csv");
        assert_eq!(s3.display_name(), "s3://archive/exports/2024/orders.csv");
        assert_eq!(s3.filename(), "orders.csv");
        assert_eq!(
            s3.log().entries(),
            vec![
                "Setting remote directory...exports/2024",
                "Setting filename...orders.csv"
            ]
        );
    }

    #[test]
    fn test_object_location_carries_credentials() {
        let mut s3 = S3Datasource::new(&config());
        s3.set_object_key("to_redshift/in/a.csv.gz");
        let object = s3.object_location().unwrap();
        assert_eq!(object.url, "s3://archive/to_redshift/in/a.csv.gz");
        assert_eq!(object.access_key_id, "AKIDEXAMPLE");
        assert!(object.is_gzip());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let mut s3 = S3Datasource::new(&config());
        s3.set_object_key("missing.csv");
        let err = s3.exists().await.unwrap_err();
        assert!(matches!(err, MoverError::Transport { .. }));
    }
}
