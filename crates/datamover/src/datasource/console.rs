//! Write-only datasource printing to stdout, or to any injected writer.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use super::write_stream;
use crate::core::{Datasource, DatasourceKind, OperationLog, Payload, Transforming, WriteOptions};
use crate::error::Result;
use crate::transformer::{default_transformer, SharedTransformer};

const NAME: &str = "stdout";

pub struct ConsoleDatasource<W = Stdout> {
    writer: W,
    transformer: SharedTransformer,
    log: OperationLog,
}

impl ConsoleDatasource<Stdout> {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for ConsoleDatasource<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> ConsoleDatasource<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer,
            transformer: default_transformer(),
            log: OperationLog::new(),
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> Datasource for ConsoleDatasource<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::Console
    }

    fn display_name(&self) -> String {
        NAME.to_string()
    }

    fn log(&self) -> &OperationLog {
        &self.log
    }

    fn log_mut(&mut self) -> &mut OperationLog {
        &mut self.log
    }

    async fn stream_write(&mut self, source: &mut dyn Datasource) -> Result<u64> {
        let transformer = self.transformer.clone();
        write_stream(
            NAME,
            &mut self.log,
            source,
            transformer.as_ref(),
            &mut self.writer,
        )
        .await
    }

    async fn bulk_write(&mut self, payload: Payload<'_>, _options: &WriteOptions) -> Result<()> {
        let buffer = payload.to_bytes().await?;
        self.log
            .record(format!("Writing {} bytes to {}", buffer.len(), NAME));
        self.writer.write_all(&buffer).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn as_transforming(&mut self) -> Option<&mut dyn Transforming> {
        Some(self)
    }
}

impl<W> Transforming for ConsoleDatasource<W> {
    fn set_transformer(&mut self, transformer: SharedTransformer) {
        self.transformer = transformer;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::FileDatasource;
    use crate::error::MoverError;

    #[tokio::test]
    async fn test_streams_file_lines_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.csv");
        std::fs::write(&path, "id,name\n1,\"a \"\"quoted\"\" word\"\n2,plain\n").unwrap();

        let mut source = FileDatasource::new(&path);
        let mut sink = ConsoleDatasource::with_writer(Vec::new());
        let count = sink.stream_write(&mut source).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            String::from_utf8(sink.into_inner()).unwrap(),
            "id,name\n1,\"a \"\"quoted\"\" word\"\n2,plain\n"
        );
    }

    #[tokio::test]
    async fn test_reads_are_not_implemented() {
        let mut console = ConsoleDatasource::with_writer(Vec::new());
        let err = console.bulk_read().await.unwrap_err();
        assert!(matches!(err, MoverError::NotImplemented { .. }));
        let err = console.exists().await.unwrap_err();
        assert!(matches!(err, MoverError::NotImplemented { .. }));
        assert_eq!(
            console.log().entries(),
            vec![
                "stdout does not implement bulk read",
                "stdout does not implement exists"
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_write_prints_buffer() {
        let mut console = ConsoleDatasource::with_writer(Vec::new());
        console
            .bulk_write(Payload::Buffer(b"hello\n"), &WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(console.writer(), b"hello\n");
    }
}
