//! Redshift datasource.
//!
//! Shares the Postgres connection and export path; loads only from objects in
//! S3 through Redshift's own COPY, never through this process.

use std::path::Path;

use async_trait::async_trait;

use super::postgres::PostgresDatasource;
use crate::config::PgConfig;
use crate::core::{Datasource, DatasourceKind, OperationLog};
use crate::error::Result;
use crate::warehouse::{FeedKind, LoadOptions, LoadReport, StagingFeed, Warehouse};

pub struct RedshiftDatasource {
    inner: PostgresDatasource,
}

impl RedshiftDatasource {
    pub fn new(config: &PgConfig) -> Self {
        Self {
            inner: PostgresDatasource::with_kind(config, DatasourceKind::Redshift),
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.inner.set_query(query);
    }

    pub fn set_filepath(&mut self, filepath: impl Into<String>) {
        self.inner.set_filepath(filepath);
    }

    pub fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions) {
        self.inner.set_copy(schema, table, options);
    }

    pub fn staging_suffix(&self) -> &str {
        self.inner.staging_suffix()
    }

    pub fn row_count(&self) -> u64 {
        self.inner.row_count()
    }

    pub fn rows_deleted(&self) -> u64 {
        self.inner.rows_deleted()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.inner.rows_inserted()
    }
}

#[async_trait]
impl Datasource for RedshiftDatasource {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::Redshift
    }

    fn display_name(&self) -> String {
        self.inner.display_name()
    }

    fn log(&self) -> &OperationLog {
        self.inner.log()
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        self.inner.log_mut()
    }

    fn filename(&self) -> String {
        self.inner.filename()
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        self.inner.bulk_read().await
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        self.inner.bulk_read_to(path).await
    }

    async fn exists(&mut self) -> Result<bool> {
        self.inner.exists().await
    }

    fn as_warehouse(&mut self) -> Option<&mut dyn Warehouse> {
        Some(self)
    }
}

#[async_trait]
impl Warehouse for RedshiftDatasource {
    fn feed_kind(&self) -> FeedKind {
        FeedKind::Object
    }

    fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions) {
        self.inner.set_copy(schema, table, options);
    }

    async fn upload(&mut self, feed: StagingFeed<'_>) -> Result<LoadReport> {
        if matches!(feed, StagingFeed::Records(_)) {
            return Err(self.unsupported("upload from streamed records"));
        }
        self.inner.load(feed).await
    }

    fn last_load(&self) -> Option<&LoadReport> {
        Warehouse::last_load(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::{self, StreamExt};

    use super::*;
    use crate::datasource::FileDatasource;
    use crate::error::MoverError;

    fn redshift() -> RedshiftDatasource {
        RedshiftDatasource::new(&PgConfig {
            host: "dw.example.com".into(),
            port: 5439,
            login: "loader".into(),
            password: "pw".into(),
            database_name: "warehouse".into(),
            ssl_mode: "require".into(),
        })
    }

    #[tokio::test]
    async fn test_stream_write_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "1\n").unwrap();

        let mut source = FileDatasource::new(&path);
        let mut sink = redshift();
        sink.set_copy("s", "t", LoadOptions::new("insert"));
        let err = sink.stream_write(&mut source).await.unwrap_err();
        assert!(matches!(err, MoverError::NotImplemented { .. }));
        assert_eq!(
            sink.log().entries().last().unwrap(),
            "dw.example.com/warehouse/s.t does not implement stream write"
        );
    }

    #[tokio::test]
    async fn test_records_feed_rejected() {
        let mut sink = redshift();
        sink.set_copy("s", "t", LoadOptions::new("insert"));
        let err = sink
            .upload(StagingFeed::Records(stream::empty().boxed()))
            .await
            .unwrap_err();
        assert!(matches!(err, MoverError::NotImplemented { .. }));
    }

    #[test]
    fn test_kind_and_feed() {
        let mut sink = redshift();
        assert_eq!(sink.kind(), DatasourceKind::Redshift);
        assert_eq!(sink.as_warehouse().unwrap().feed_kind(), FeedKind::Object);
        assert_ne!(sink.staging_suffix(), "");
    }
}
