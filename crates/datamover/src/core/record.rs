//! Record and stream aliases shared by every adapter.

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// One decoded row: ordered string fields, arity not fixed across rows.
pub type Record = Vec<String>;

/// Pull-based stream of decoded records in source order.
pub type RecordStream<'a> = BoxStream<'a, Result<Record>>;

/// Raw byte chunks read from an endpoint before line framing.
pub type ChunkStream<'a> = BoxStream<'a, Result<Bytes>>;
