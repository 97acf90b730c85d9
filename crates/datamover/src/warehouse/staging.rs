//! Staging table naming and the drop-on-release guard.

use tracing::warn;

use super::commands::TableNames;
use super::session::SqlSession;
use crate::core::OperationLog;
use crate::error::{MoverError, Result};

/// `<unix-epoch-seconds>_<5-digit-random>`, computed once per adapter.
pub fn staging_suffix() -> String {
    let epoch = chrono::Utc::now().timestamp();
    let random = uuid::Uuid::new_v4().as_u128() % 100_000;
    format!("{}_{:05}", epoch, random)
}

/// Handle for a staging table whose release drops it.
///
/// Acquiring issues no SQL. [`StagingTable::release`] must be awaited on every
/// path out of a load; a guard dropped without release only logs a warning
/// because the drop statement cannot run outside an async context.
#[derive(Debug)]
pub struct StagingTable {
    names: TableNames,
    released: bool,
}

impl StagingTable {
    pub fn acquire(names: &TableNames) -> Self {
        Self {
            names: names.clone(),
            released: false,
        }
    }

    pub fn name(&self) -> String {
        self.names.staging()
    }

    /// `DROP TABLE IF EXISTS` the staging table.
    pub async fn release(mut self, session: &mut dyn SqlSession, log: &mut OperationLog) -> Result<()> {
        self.released = true;
        let sql = self.names.drop_staging();
        log.record(sql.clone());
        session.execute(&sql).await.map(|_| ())
    }
}

impl Drop for StagingTable {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "staging table {} was not released; it may need to be dropped by hand",
                self.names.staging()
            );
        }
    }
}

/// Combine a load outcome with its cleanup outcome, primary failure first.
pub fn settle<T>(outcome: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(cleanup)) => Err(MoverError::with_cleanup(primary, cleanup)),
    }
}
