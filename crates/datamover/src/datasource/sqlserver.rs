//! SQL Server datasource: query export only.

use std::path::Path;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::SqlServerConfig;
use crate::core::{Datasource, DatasourceKind, OperationLog, Record, RecordStream};
use crate::error::{MoverError, Result};
use crate::transformer::default_transformer;

type TdsClient = Client<Compat<TcpStream>>;

pub struct SqlServerDatasource {
    config: SqlServerConfig,
    client: Option<TdsClient>,
    query: Option<String>,
    filepath: Option<String>,
    row_count: u64,
    log: OperationLog,
}

impl SqlServerDatasource {
    pub fn new(config: &SqlServerConfig) -> Self {
        Self {
            config: config.clone(),
            client: None,
            query: None,
            filepath: None,
            row_count: 0,
            log: OperationLog::new(),
        }
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        self.log.record(format!("Setting query...{}", query));
        self.query = Some(query);
    }

    pub fn set_filepath(&mut self, filepath: impl Into<String>) {
        let filepath = filepath.into();
        self.log.record(format!("Setting filename...{}", filepath));
        self.filepath = Some(filepath);
    }

    /// Rows produced by the last read.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database_name);
        config.authentication(AuthMethod::sql_server(
            &self.config.login,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        config
    }

    /// Open the connection on first use.
    async fn client(&mut self) -> Result<&mut TdsClient> {
        if self.client.is_none() {
            let config = self.build_config();
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| MoverError::transport(self.display_name(), e))?;
            tcp.set_nodelay(true).ok();
            let client = Client::connect(config, tcp.compat_write()).await?;
            info!(
                "Connected to SQL Server: {}:{}/{}",
                self.config.host, self.config.port, self.config.database_name
            );
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| MoverError::pool("connection not initialized", "sqlserver"))
    }

    fn require_query(&mut self) -> Result<String> {
        if let Some(query) = &self.query {
            return Ok(query.clone());
        }
        let err = MoverError::Config(format!(
            "{} has no query; call set_query first",
            self.display_name()
        ));
        self.log.fatal(err.to_string());
        Err(err)
    }

    async fn export(&mut self) -> Result<Vec<u8>> {
        let transformer = default_transformer();
        let mut buffer = Vec::new();
        let mut records = self.records().await?;
        let mut count = 0u64;
        while let Some(record) = records.try_next().await? {
            buffer.extend_from_slice(&transformer.encode(&record)?);
            count += 1;
        }
        drop(records);

        self.row_count = count;
        if count == 0 {
            let message = format!("no data returned from {}", self.display_name());
            self.log.record(format!("SourceIsEmpty: {}", message));
            return Err(MoverError::SourceEmpty(message));
        }
        info!("Exported {} rows from {}", count, self.display_name());
        Ok(buffer)
    }
}

/// Render one column as text. NULL is empty, line breaks in text become spaces.
pub fn column_text(data: ColumnData<'static>) -> Result<String> {
    let text = match &data {
        ColumnData::U8(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I16(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::I64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F32(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::F64(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Bit(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::String(v) => v.as_deref().map(flatten_newlines),
        ColumnData::Guid(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Binary(v) => v.as_deref().map(hex::encode),
        ColumnData::Numeric(v) => v.as_ref().map(|v| v.to_string()),
        ColumnData::Xml(v) => v.as_deref().map(|xml| flatten_newlines(&xml.to_string())),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(&data)?.map(|v| v.to_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(&data)?.map(|v| v.to_string())
        }
        ColumnData::DateTimeOffset(_) => {
            chrono::DateTime::<chrono::FixedOffset>::from_sql(&data)?.map(|v| v.to_string())
        }
    };
    Ok(text.unwrap_or_default())
}

fn flatten_newlines(s: &str) -> String {
    s.replace("\r\n", " ").replace('\n', " ")
}

#[async_trait]
impl Datasource for SqlServerDatasource {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::SqlServer
    }

    fn display_name(&self) -> String {
        let endpoint = format!("{}/{}", self.config.host, self.config.database_name);
        match &self.filepath {
            Some(filepath) => format!("{}/{}", endpoint, filepath),
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
        self.filepath
            .as_deref()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string()
    }

    async fn records(&mut self) -> Result<RecordStream<'_>> {
        let query = self.require_query()?;
        self.log.record(query.clone());
        let client = self.client().await?;
        debug!("Streaming rows for: {}", query);

        let rows = client.simple_query(query).await?.into_row_stream();
        Ok(rows
            .map_err(MoverError::from)
            .and_then(|row| async move {
                row.into_iter().map(column_text).collect::<Result<Record>>()
            })
            .boxed())
    }

    async fn bulk_read(&mut self) -> Result<Vec<u8>> {
        self.export().await
    }

    async fn bulk_read_to(&mut self, path: &Path) -> Result<u64> {
        let buffer = self.export().await?;
        tokio::fs::write(path, &buffer).await?;
        Ok(buffer.len() as u64)
    }

    async fn exists(&mut self) -> Result<bool> {
        let query = self.require_query()?;
        let sql = format!(
            "SELECT CASE WHEN EXISTS({}) THEN 't' ELSE 'f' END",
            query.trim_end_matches(';')
        );
        self.log.record(sql.clone());
        let client = self.client().await?;
        let row = client.simple_query(sql).await?.into_row().await?;
        Ok(row.and_then(|row| row.get::<&str, _>(0).map(|v| v == "t")).unwrap_or(false))
    }
}
