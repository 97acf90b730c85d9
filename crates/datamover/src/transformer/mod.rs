//! Record codec: one logical line of bytes to a [`Record`] and back.
//!
//! A single [`SharedTransformer`] is attached to both ends of a transfer. The
//! source decodes with the transformer's input convention and the sink encodes
//! with its output convention, so a streaming transfer converts delimiters
//! without ever materializing the dataset.

pub mod csv;
pub mod lines;

use std::sync::Arc;

use crate::core::Record;
use crate::error::Result;

pub use self::csv::CsvTransformer;
pub use lines::{decode_records, reader_chunks};

/// Stateless decode/encode policy applied to individual lines.
pub trait Transformer: Send + Sync {
    /// Decode one logical line, including its terminator if present.
    fn decode(&self, line: &[u8]) -> Result<Record>;

    /// Encode a record as one line, terminator included.
    fn encode(&self, record: &Record) -> Result<Vec<u8>>;

    /// Whether `line` is a complete logical line. A newline inside an open
    /// quoted field does not end the line.
    fn is_complete(&self, line: &[u8]) -> bool {
        line.iter().filter(|&&b| b == b'"').count() % 2 == 0
    }
}

pub type SharedTransformer = Arc<dyn Transformer>;

/// The comma-in, comma-out transformer every adapter starts with.
pub fn default_transformer() -> SharedTransformer {
    Arc::new(CsvTransformer::default())
}
