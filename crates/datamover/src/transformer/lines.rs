//! Framing raw byte chunks into logical lines and decoding them.

use std::io::Write;

use flate2::write::GzDecoder;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use super::SharedTransformer;
use crate::core::{ChunkStream, Record, RecordStream};
use crate::error::{MoverError, Result};

/// Turn any async reader into a chunk stream.
pub fn reader_chunks<'a, R>(reader: R) -> ChunkStream<'a>
where
    R: AsyncRead + Send + 'a,
{
    ReaderStream::new(reader).map_err(MoverError::from).boxed()
}

/// Decode a chunk stream into records, one per logical line.
///
/// With `decompress` set the chunks are inflated as a gzip stream first.
/// Physical lines are joined while a quoted field is still open; blank lines
/// are skipped. An open quote at end of input is a decode failure.
pub fn decode_records<'a>(
    chunks: ChunkStream<'a>,
    decompress: bool,
    transformer: SharedTransformer,
) -> RecordStream<'a> {
    let framer = LineFramer::new(chunks, decompress, transformer);
    stream::try_unfold(framer, next_record).boxed()
}

async fn next_record(mut framer: LineFramer<'_>) -> Result<Option<(Record, LineFramer<'_>)>> {
    match framer.next_line().await? {
        Some(line) => {
            let record = framer.transformer.decode(&line)?;
            Ok(Some((record, framer)))
        }
        None => Ok(None),
    }
}

struct LineFramer<'a> {
    chunks: ChunkStream<'a>,
    inflater: Option<GzDecoder<Vec<u8>>>,
    transformer: SharedTransformer,
    pending: Vec<u8>,
    scanned: usize,
    logical: Vec<u8>,
    exhausted: bool,
}

impl<'a> LineFramer<'a> {
    fn new(chunks: ChunkStream<'a>, decompress: bool, transformer: SharedTransformer) -> Self {
        Self {
            chunks,
            inflater: decompress.then(|| GzDecoder::new(Vec::new())),
            transformer,
            pending: Vec::new(),
            scanned: 0,
            logical: Vec::new(),
            exhausted: false,
        }
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + offset + 1;
                self.logical.extend(self.pending.drain(..end));
                self.scanned = 0;

                if !self.transformer.is_complete(&self.logical) {
                    continue;
                }
                let line = std::mem::take(&mut self.logical);
                if is_blank(&line) {
                    continue;
                }
                return Ok(Some(line));
            }
            self.scanned = self.pending.len();

            if self.exhausted {
                self.logical.append(&mut self.pending);
                self.scanned = 0;
                if is_blank(&self.logical) {
                    self.logical.clear();
                    return Ok(None);
                }
                if !self.transformer.is_complete(&self.logical) {
                    return Err(MoverError::Decode(format!(
                        "unterminated quoted field at end of input: {:?}",
                        String::from_utf8_lossy(&self.logical)
                    )));
                }
                return Ok(Some(std::mem::take(&mut self.logical)));
            }

            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        match self.chunks.try_next().await? {
            Some(chunk) => match self.inflater.as_mut() {
                Some(inflater) => {
                    inflater
                        .write_all(&chunk)
                        .map_err(|e| MoverError::Decode(format!("gzip: {}", e)))?;
                    self.pending.append(inflater.get_mut());
                }
                None => self.pending.extend_from_slice(&chunk),
            },
            None => {
                if let Some(inflater) = self.inflater.as_mut() {
                    inflater
                        .try_finish()
                        .map_err(|e| MoverError::Decode(format!("gzip: {}", e)))?;
                    self.pending.append(inflater.get_mut());
                }
                self.exhausted = true;
            }
        }
        Ok(())
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|&b| b == b'\n' || b == b'\r')
}
