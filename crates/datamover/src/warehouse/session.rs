//! The SQL surface a warehouse load needs.

use async_trait::async_trait;

use crate::core::{ObjectLocation, RecordStream};
use crate::error::Result;

/// One open warehouse connection.
///
/// Implemented over tokio-postgres for Postgres and Redshift; tests drive the
/// load state machine with an in-memory implementation.
#[async_trait]
pub trait SqlSession: Send {
    /// Execute one statement and return the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query returning a single integer in the first column of the first row.
    async fn query_count(&mut self, sql: &str) -> Result<i64>;

    /// Stream records into `table` through the native row-copy path.
    async fn copy_records(&mut self, table: &str, records: RecordStream<'_>) -> Result<u64>;

    /// Load `table` straight from an object in storage.
    async fn copy_object(
        &mut self,
        table: &str,
        object: &ObjectLocation,
        delimiter: Option<u8>,
    ) -> Result<u64>;
}
