//! PostgreSQL datasource: query export and staging-table loads over COPY.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::stream::{self, StreamExt};
use futures::{SinkExt, TryStreamExt};
use tokio_postgres::SimpleQueryMessage;
use tracing::{info, warn};

use super::tls::{self, SslMode};
use crate::config::PgConfig;
use crate::core::{
    ChunkStream, Datasource, DatasourceKind, ObjectLocation, OperationLog, Payload, Record, RecordStream,
    WriteOptions,
};
use crate::error::{MoverError, Result};
use crate::transformer::{decode_records, default_transformer, reader_chunks, CsvTransformer};
use crate::warehouse::commands::{copy_from_object, copy_from_stdin};
use crate::warehouse::{
    run_load, FeedKind, LoadOptions, LoadReport, SqlSession, StagingFeed, Warehouse,
    WarehouseState,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// COPY payload is flushed to the server in chunks of about this size.
const COPY_CHUNK: usize = 1024 * 1024;

/// Lazily opened connection to a Postgres-protocol server.
pub struct PgConnection {
    config: PgConfig,
    pool: Option<Pool>,
}

impl PgConnection {
    pub fn new(config: &PgConfig) -> Self {
        Self {
            config: config.clone(),
            pool: None,
        }
    }

    /// `host/database`
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.config.host, self.config.database_name)
    }

    fn build_pool(&self) -> Result<Pool> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.config.host);
        pg_config.port(self.config.port);
        pg_config.dbname(&self.config.database_name);
        pg_config.user(&self.config.login);
        pg_config.password(&self.config.password);
        pg_config.keepalives(true);
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match tls::connector(SslMode::parse(&self.config.ssl_mode)?)? {
            None => {
                warn!("TLS is disabled for {}. Credentials will be transmitted in plaintext.", self.endpoint());
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
            Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
        };

        Pool::builder(mgr)
            .max_size(1)
            .build()
            .map_err(|e| MoverError::pool(e.to_string(), format!("creating pool for {}", self.endpoint())))
    }

    /// Check out the connection, opening it on first use.
    pub async fn session(&mut self) -> Result<PgSession> {
        if self.pool.is_none() {
            self.pool = Some(self.build_pool()?);
        }
        let endpoint = self.endpoint();
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| MoverError::pool("pool not initialized", endpoint.clone()))?;
        let client = pool
            .get()
            .await
            .map_err(|e| MoverError::pool(e.to_string(), format!("connecting to {}", endpoint)))?;
        Ok(PgSession { client, endpoint })
    }
}

/// One checked-out connection.
pub struct PgSession {
    client: Object,
    endpoint: String,
}

impl PgSession {
    /// Run `sql` and return every row as text fields, NULL as empty.
    pub async fn query_rows(&mut self, sql: &str) -> Result<Vec<Record>> {
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|idx| row.get(idx).unwrap_or_default().to_string())
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn first_value(&mut self, sql: &str) -> Result<Option<String>> {
        let rows = self.query_rows(sql).await?;
        Ok(rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let messages = self.client.simple_query(sql).await?;
        Ok(messages
            .iter()
            .rev()
            .find_map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
                _ => None,
            })
            .unwrap_or(0))
    }

    async fn query_count(&mut self, sql: &str) -> Result<i64> {
        let value = self.first_value(sql).await?.ok_or_else(|| {
            MoverError::transport(&self.endpoint, format!("no rows returned by {}", sql))
        })?;
        value.trim().parse().map_err(|e| {
            MoverError::transport(&self.endpoint, format!("non-numeric count {:?}: {}", value, e))
        })
    }

    async fn copy_records(&mut self, table: &str, mut records: RecordStream<'_>) -> Result<u64> {
        let sink = self.client.copy_in(&copy_from_stdin(table)).await?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(COPY_CHUNK);
        while let Some(record) = records.try_next().await? {
            push_copy_line(&mut buf, &record);
            if buf.len() >= COPY_CHUNK {
                sink.send(buf.split().freeze()).await?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.split().freeze()).await?;
        }

        Ok(sink.finish().await?)
    }

    async fn copy_object(
        &mut self,
        table: &str,
        object: &ObjectLocation,
        delimiter: Option<u8>,
    ) -> Result<u64> {
        self.execute(&copy_from_object(table, object, delimiter))
            .await
    }
}

/// Append one COPY text-format line. Empty fields are sent as NULL.
fn push_copy_line(buf: &mut BytesMut, record: &Record) {
    for (idx, field) in record.iter().enumerate() {
        if idx > 0 {
            buf.put_u8(b'\t');
        }
        if field.is_empty() {
            buf.extend_from_slice(b"\\N");
        } else {
            buf.extend_from_slice(escape_copy_text(field).as_bytes());
        }
    }
    buf.put_u8(b'\n');
}

fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

pub struct PostgresDatasource {
    conn: PgConnection,
    kind: DatasourceKind,
    state: WarehouseState,
    query: Option<String>,
    filepath: Option<String>,
    row_count: u64,
    log: OperationLog,
}

impl PostgresDatasource {
    pub fn new(config: &PgConfig) -> Self {
        Self::with_kind(config, DatasourceKind::Postgres)
    }

    pub(crate) fn with_kind(config: &PgConfig, kind: DatasourceKind) -> Self {
        Self {
            conn: PgConnection::new(config),
            kind,
            state: WarehouseState::new(),
            query: None,
            filepath: None,
            row_count: 0,
            log: OperationLog::new(),
        }
    }

    /// Query exported by bulk reads and probed by `exists`.
    pub fn set_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        self.log.record(format!("Setting query...{}", query));
        self.query = Some(query);
    }

    /// Label used in the display name instead of the copy target.
    pub fn set_filepath(&mut self, filepath: impl Into<String>) {
        let filepath = filepath.into();
        self.log.record(format!("Setting filename...{}", filepath));
        self.filepath = Some(filepath);
    }

    pub fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions) {
        self.log
            .record(format!("Setting copy target...{}.{}", schema, table));
        self.state.set_copy(schema, table, options);
    }

    /// Staging suffix fixed for this instance.
    pub fn staging_suffix(&self) -> &str {
        self.state.suffix()
    }

    /// Rows returned by the last bulk read.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn rows_deleted(&self) -> u64 {
        self.state.rows_deleted()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.state.rows_inserted()
    }

    fn require_query(&mut self) -> Result<String> {
        match &self.query {
            Some(query) => Ok(query.clone()),
            None => Err(self.missing_query()),
        }
    }

    fn missing_query(&mut self) -> MoverError {
        let err = MoverError::Config(format!(
            "{} has no query; call set_query first",
            self.display_name()
        ));
        self.log.fatal(err.to_string());
        err
    }

    /// Existence probe: the query when set, otherwise the copy target table.
    fn probe_sql(&self) -> Option<String> {
        if let Some(query) = &self.query {
            return Some(format!("SELECT exists({})", query.trim_end_matches(';')));
        }
        self.state.target().map(|target| {
            format!(
                "SELECT to_regclass('{}.{}') IS NOT NULL",
                target.schema, target.table
            )
        })
    }

    /// Validate, then run the staging state machine with `feed`.
    pub(crate) async fn load(&mut self, feed: StagingFeed<'_>) -> Result<LoadReport> {
        let (names, options) = self.state.plan()?;
        if let Err(e) = options.strategy() {
            self.log.fatal(e.to_string());
            return Err(e);
        }

        let mut session = self.conn.session().await?;
        let report = run_load(&mut session, &names, &options, feed, &mut self.log).await?;
        Ok(self.state.finish(report))
    }

    async fn export(&mut self) -> Result<Vec<u8>> {
        let query = self.require_query()?;
        self.log.record(query.clone());

        let mut session = self.conn.session().await?;
        let rows = session.query_rows(&query).await?;
        self.row_count = rows.len() as u64;
        if rows.is_empty() {
            let message = format!("no data returned from {}", self.display_name());
            self.log.record(format!("SourceIsEmpty: {}", message));
            return Err(MoverError::SourceEmpty(message));
        }

        let transformer = default_transformer();
        let mut buffer = Vec::new();
        for row in &rows {
            buffer.extend_from_slice(&transformer.encode(row)?);
        }
        info!("Exported {} rows from {}", self.row_count, self.display_name());
        Ok(buffer)
    }

    async fn records_from_payload<'a>(
        payload: Payload<'a>,
        delimiter: u8,
    ) -> Result<RecordStream<'a>> {
        let transformer = std::sync::Arc::new(CsvTransformer::with_delimiter(delimiter));
        let chunks: ChunkStream<'a> = match payload {
            Payload::Buffer(buffer) => {
                stream::iter(vec![Ok::<_, MoverError>(Bytes::copy_from_slice(buffer))]).boxed()
            }
            Payload::LocalPath(path) => reader_chunks(tokio::fs::File::open(path).await?),
        };
        Ok(decode_records(chunks, false, transformer))
    }
}

#[async_trait]
impl Datasource for PostgresDatasource {
    fn kind(&self) -> DatasourceKind {
        self.kind
    }

    fn display_name(&self) -> String {
        let endpoint = self.conn.endpoint();
        if let Some(filepath) = &self.filepath {
            return format!("{}/{}", endpoint, filepath);
        }
        match self.state.target() {
            Some(target) => format!("{}/{}.{}", endpoint, target.schema, target.table),
            None => endpoint,
        }
    }

    fn log(&self) -> &OperationLog {
        &self.log
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    fn filename(&self) -> String {
        match (&self.filepath, self.state.target()) {
            (Some(filepath), _) => filepath.rsplit('/').next().unwrap_or_default().to_string(),
            (None, Some(target)) => format!("{}.csv", target.table),
            (None, None) => String::new(),
        }
    }

    async fn stream_write(&mut self, source: &mut dyn Datasource) -> Result<u64> {
        let target = self.display_name();
        self.log.record(format!("Starting write stream to {}", target));
        let records = source.records().await?;
        let report = self.load(StagingFeed::Records(records)).await?;
        self.log
            .record(format!("Completed write stream to {}", target));
        Ok(report.rows_staged)
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        self.export().await
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        let buffer = self.export().await?;
        tokio::fs::write(path, &buffer).await?;
        Ok(buffer.len() as u64)
    }

    async fn bulk_write(&mut self, payload: Payload<'_>, _options: &WriteOptions) -> Result<()> {
        let delimiter = self
            .state
            .target()
            .and_then(|target| target.options.delimiter)
            .unwrap_or(b',');
        let records = Self::records_from_payload(payload, delimiter).await?;
        self.load(StagingFeed::Records(records)).await?;
        Ok(())
    }

    async fn exists(&mut self) -> Result<bool> {
        let Some(sql) = self.probe_sql() else {
            return Err(self.missing_query());
        };
        self.log.record(sql.clone());
        let mut session = self.conn.session().await?;
        Ok(session.first_value(&sql).await?.as_deref() == Some("t"))
    }

    fn as_warehouse(&mut self) -> Option<&mut dyn Warehouse> {
        Some(self)
    }
}

#[async_trait]
impl Warehouse for PostgresDatasource {
    fn feed_kind(&self) -> FeedKind {
        FeedKind::Records
    }

    fn set_copy(&mut self, schema: &str, table: &str, options: LoadOptions) {
        PostgresDatasource::set_copy(self, schema, table, options);
    }

    async fn upload(&mut self, feed: StagingFeed<'_>) -> Result<LoadReport> {
        self.load(feed).await
    }

    fn last_load(&self) -> Option<&LoadReport> {
        self.state.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PgConfig {
        PgConfig {
            host: "127.0.0.1".into(),
            port: 9,
            login: "loader".into(),
            password: "pw".into(),
            database_name: "analytics".into(),
            ssl_mode: "disable".into(),
        }
    }

    #[test]
    fn test_copy_line_escapes_and_nulls() {
        let mut buf = BytesMut::new();
        push_copy_line(
            &mut buf,
            &vec!["1".into(), "".into(), "a\tb\\c\nd".into()],
        );
        assert_eq!(&buf[..], b"1\t\\N\ta\\tb\\\\c\\nd\n");
    }

    #[test]
    fn test_display_name_variants() {
        let mut pg = PostgresDatasource::new(&config());
        assert_eq!(pg.display_name(), "127.0.0.1/analytics");
        pg.set_copy("public", "orders", LoadOptions::new("insert"));
        assert_eq!(pg.display_name(), "127.0.0.1/analytics/public.orders");
        assert_eq!(pg.filename(), "orders.csv");
        pg.set_filepath("exports/orders.csv");
        assert_eq!(pg.display_name(), "127.0.0.1/analytics/exports/orders.csv");
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails_before_connecting() {
        let mut pg = PostgresDatasource::new(&config());
        pg.set_copy("s", "t", LoadOptions::new("merge"));
        let err = pg
            .upload(StagingFeed::Records(stream::empty().boxed()))
            .await
            .unwrap_err();
        assert!(matches!(err, MoverError::Config(_)));
        assert!(pg.log().entries().iter().any(|e| e.contains("merge")));
    }

    #[tokio::test]
    async fn test_upload_without_set_copy_is_config_error() {
        let mut pg = PostgresDatasource::new(&config());
        let err = pg
            .upload(StagingFeed::Records(stream::empty().boxed()))
            .await
            .unwrap_err();
        assert!(matches!(err, MoverError::Config(_)));
    }

    #[tokio::test]
    async fn test_bulk_read_requires_query() {
        let mut pg = PostgresDatasource::new(&config());
        let err = pg.bulk_read().await.unwrap_err();
        assert!(matches!(err, MoverError::Config(_)));
    }

    #[tokio::test]
    async fn test_stream_read_not_implemented() {
        let mut pg = PostgresDatasource::new(&config());
        let err = pg.records().await.err().unwrap();
        assert!(matches!(err, MoverError::NotImplemented { .. }));
    }

    #[tokio::test]
    async fn test_payload_records_use_delimiter() {
        let records: Vec<_> =
            PostgresDatasource::records_from_payload(Payload::Buffer(b"1|a\n2|b\n"), b'|')
                .await
                .unwrap()
                .try_collect()
                .await
                .unwrap();
        assert_eq!(records, vec![vec!["1", "a"], vec!["2", "b"]]);
    }
}
