//! The staging-table load state machine.
//!
//! `Idle -> StagingCreated -> StagingPopulated -> {strategy} -> StagingDropped`.
//! The strategy is validated before any statement runs. Once validation
//! passes, the staging drop runs on every path out of the load.

use serde::Serialize;
use tracing::info;

use super::commands::{copy_from_stdin, TableNames};
use super::session::SqlSession;
use super::staging::{settle, StagingTable};
use super::strategy::{LoadOptions, LoadStrategy};
use crate::core::{ObjectLocation, OperationLog, RecordStream};
use crate::error::Result;

/// Data used to populate the staging table.
pub enum StagingFeed<'a> {
    /// Rows streamed through this process.
    Records(RecordStream<'a>),
    /// An object the warehouse reads directly.
    Object(ObjectLocation),
}

/// Outcome of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub strategy: LoadStrategy,
    pub rows_staged: u64,
    pub rows_deleted: u64,
    pub rows_inserted: u64,
}

/// Run one full upload against `session`.
pub async fn run_load(
    session: &mut dyn SqlSession,
    names: &TableNames,
    options: &LoadOptions,
    feed: StagingFeed<'_>,
    log: &mut OperationLog,
) -> Result<LoadReport> {
    let strategy = match options.strategy() {
        Ok(strategy) => strategy,
        Err(e) => {
            log.fatal(e.to_string());
            return Err(e);
        }
    };

    let staging = StagingTable::acquire(names);
    let outcome = load_into(session, names, strategy, options, feed, log).await;
    let cleanup = staging.release(session, log).await;
    let report = settle(outcome, cleanup)?;

    info!(
        "{} load into {}: {} staged, {} deleted, {} inserted",
        report.strategy,
        names.main(),
        report.rows_staged,
        report.rows_deleted,
        report.rows_inserted
    );
    Ok(report)
}

async fn load_into(
    session: &mut dyn SqlSession,
    names: &TableNames,
    strategy: LoadStrategy,
    options: &LoadOptions,
    feed: StagingFeed<'_>,
    log: &mut OperationLog,
) -> Result<LoadReport> {
    execute(session, log, &names.create_staging()).await?;

    let staging = names.staging();
    let rows_staged = match feed {
        StagingFeed::Records(records) => {
            log.record(format!("{};", copy_from_stdin(&staging)));
            session.copy_records(&staging, records).await?
        }
        StagingFeed::Object(object) => {
            log.record(format!("COPY {} FROM '{}'", staging, object.url));
            session
                .copy_object(&staging, &object, options.delimiter)
                .await?
        }
    };

    let mut report = LoadReport {
        strategy,
        rows_staged,
        rows_deleted: 0,
        rows_inserted: 0,
    };

    match strategy {
        LoadStrategy::Insert => {
            report.rows_inserted = execute(session, log, &names.insert_from_staging()).await?;
        }
        LoadStrategy::Upsert => {
            if let Some(delete) = names.delete_matching_staging(options.primary_key.as_deref()) {
                report.rows_deleted = execute(session, log, &delete).await?;
            }
            report.rows_inserted = execute(session, log, &names.insert_from_staging()).await?;
        }
        LoadStrategy::BulkDeleteAppend => {
            if let Some(delete) = names.bulk_delete(&options.bulk_delete) {
                report.rows_deleted = execute(session, log, &delete).await?;
            }
            report.rows_inserted = execute(session, log, &names.insert_from_staging()).await?;
        }
        LoadStrategy::Truncate => {
            execute(session, log, &names.drop_main()).await?;
            execute(session, log, &names.rename_staging_to_main()).await?;
            let count_sql = names.count_main();
            log.record(count_sql.clone());
            report.rows_inserted = session.query_count(&count_sql).await?.max(0) as u64;
        }
    }

    execute(session, log, &names.analyze()).await?;
    Ok(report)
}

async fn execute(session: &mut dyn SqlSession, log: &mut OperationLog, sql: &str) -> Result<u64> {
    log.record(sql);
    session.execute(sql).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use futures::stream::{self, StreamExt, TryStreamExt};

    use super::*;
    use crate::core::Record;
    use crate::error::MoverError;

    /// In-memory warehouse that tracks which tables exist and their row counts.
    #[derive(Default)]
    struct FakeWarehouse {
        statements: Vec<String>,
        tables: HashMap<String, i64>,
        fail_on: Option<&'static str>,
        fail_drop: bool,
    }

    impl FakeWarehouse {
        fn with_main(rows: i64) -> Self {
            let mut fake = Self::default();
            fake.tables.insert("s.t".into(), rows);
            fake
        }

        fn failing_on(mut self, prefix: &'static str) -> Self {
            self.fail_on = Some(prefix);
            self
        }

        fn check(&self, sql: &str) -> Result<()> {
            if let Some(prefix) = self.fail_on {
                if sql.starts_with(prefix) {
                    return Err(MoverError::transport("fake", format!("forced failure: {}", sql)));
                }
            }
            Ok(())
        }

        fn staging_exists(&self) -> bool {
            self.tables.keys().any(|name| name.starts_with("s.t_"))
        }

        fn issued(&self, prefix: &str) -> bool {
            self.statements.iter().any(|s| s.starts_with(prefix))
        }
    }

    #[async_trait]
    impl SqlSession for FakeWarehouse {
        async fn execute(&mut self, sql: &str) -> Result<u64> {
            self.statements.push(sql.to_string());
            if sql.starts_with("DROP TABLE IF EXISTS s.t_") && self.fail_drop {
                return Err(MoverError::transport("fake", "drop failed"));
            }
            self.check(sql)?;

            let words: Vec<&str> = sql.trim_end_matches(';').split_whitespace().collect();
            match words.as_slice() {
                ["CREATE", "TABLE", name, ..] => {
                    self.tables.insert(name.to_string(), 0);
                    Ok(0)
                }
                ["DROP", "TABLE", "IF", "EXISTS", name] => {
                    self.tables.remove(*name);
                    Ok(0)
                }
                ["ALTER", "TABLE", from, "RENAME", "TO", to] => {
                    let rows = self.tables.remove(*from).unwrap_or(0);
                    self.tables.insert(format!("s.{}", to), rows);
                    Ok(0)
                }
                ["INSERT", "INTO", main, "SELECT", "*", "FROM", staging] => {
                    let staged = self.tables.get(*staging).copied().unwrap_or(0);
                    *self.tables.entry(main.to_string()).or_insert(0) += staged;
                    Ok(staged as u64)
                }
                ["DELETE", ..] => Ok(1),
                _ => Ok(0),
            }
        }

        async fn query_count(&mut self, sql: &str) -> Result<i64> {
            self.statements.push(sql.to_string());
            self.check(sql)?;
            Ok(self.tables.get("s.t").copied().unwrap_or(0))
        }

        async fn copy_records(&mut self, table: &str, records: RecordStream<'_>) -> Result<u64> {
            let copy = format!("COPY {} FROM STDIN", table);
            self.statements.push(copy.clone());
            self.check(&copy)?;
            let rows: Vec<Record> = records.try_collect().await?;
            self.tables.insert(table.to_string(), rows.len() as i64);
            Ok(rows.len() as u64)
        }

        async fn copy_object(
            &mut self,
            table: &str,
            object: &ObjectLocation,
            _delimiter: Option<u8>,
        ) -> Result<u64> {
            let copy = format!("COPY {} FROM '{}'", table, object.url);
            self.statements.push(copy.clone());
            self.check(&copy)?;
            self.tables.insert(table.to_string(), 4);
            Ok(4)
        }
    }

    fn names() -> TableNames {
        TableNames::new("s", "t", "1700000000_00042")
    }

    fn rows(n: usize) -> StagingFeed<'static> {
        let records: Vec<Result<Record>> = (0..n)
            .map(|i| Ok(vec![i.to_string(), format!("row {}", i)]))
            .collect();
        StagingFeed::Records(stream::iter(records).boxed())
    }

    async fn load(fake: &mut FakeWarehouse, options: LoadOptions, n: usize) -> Result<LoadReport> {
        let mut log = OperationLog::new();
        run_load(fake, &names(), &options, rows(n), &mut log).await
    }

    #[tokio::test]
    async fn test_unknown_strategy_issues_no_sql() {
        let mut fake = FakeWarehouse::with_main(10);
        let err = load(&mut fake, LoadOptions::new("merge"), 3).await.unwrap_err();
        assert!(matches!(err, MoverError::Config(_)));
        assert!(fake.statements.is_empty());
    }

    #[tokio::test]
    async fn test_insert_sequence() {
        let mut fake = FakeWarehouse::with_main(10);
        let report = load(&mut fake, LoadOptions::new("insert"), 3).await.unwrap();
        assert_eq!(report.rows_staged, 3);
        assert_eq!(report.rows_inserted, 3);
        assert_eq!(report.rows_deleted, 0);
        assert_eq!(
            fake.statements,
            vec![
                "CREATE TABLE s.t_1700000000_00042 ( LIKE s.t );",
                "COPY s.t_1700000000_00042 FROM STDIN",
                "INSERT INTO s.t SELECT * FROM s.t_1700000000_00042;",
                "ANALYZE s.t;",
                "DROP TABLE IF EXISTS s.t_1700000000_00042;",
            ]
        );
        assert!(!fake.staging_exists());
    }

    #[tokio::test]
    async fn test_upsert_composite_key_deletes_then_inserts() {
        let mut fake = FakeWarehouse::with_main(10);
        let options = LoadOptions::new("upsert").with_primary_key("id,style_id");
        let report = load(&mut fake, options, 2).await.unwrap();
        assert_eq!(report.rows_deleted, 1);
        assert!(fake.statements.iter().any(|s| s.contains(
            "WHERE s.t.id = s.t_1700000000_00042.id AND s.t.style_id = s.t_1700000000_00042.style_id"
        )));
    }

    #[tokio::test]
    async fn test_upsert_without_key_only_inserts() {
        let mut fake = FakeWarehouse::with_main(10);
        load(&mut fake, LoadOptions::new("upsert"), 2).await.unwrap();
        assert!(!fake.issued("DELETE"));
        assert!(fake.issued("INSERT INTO s.t"));
        assert!(fake.issued("ANALYZE s.t"));
    }

    #[tokio::test]
    async fn test_upsert_leaves_orphaned_main_rows() {
        // Main held 10 rows; only 2 keys arrive. The 8 unmatched rows survive
        // alongside the reinserted ones.
        let mut fake = FakeWarehouse::with_main(10);
        let options = LoadOptions::new("upsert").with_primary_key("id");
        load(&mut fake, options, 2).await.unwrap();
        assert_eq!(fake.tables["s.t"], 12);
    }

    #[tokio::test]
    async fn test_bulk_delete_append_predicate() {
        let mut fake = FakeWarehouse::with_main(10);
        let options = LoadOptions::new("bulk_delete_append").with_bulk_delete("color", "blue");
        load(&mut fake, options, 2).await.unwrap();
        assert!(fake
            .statements
            .contains(&"DELETE FROM s.t WHERE color LIKE 'blue';".to_string()));
    }

    #[tokio::test]
    async fn test_bulk_delete_append_without_predicates() {
        let mut fake = FakeWarehouse::with_main(10);
        load(&mut fake, LoadOptions::new("bulk_delete_append"), 2)
            .await
            .unwrap();
        assert!(!fake.issued("DELETE"));
    }

    #[tokio::test]
    async fn test_truncate_count_matches_staging() {
        let mut fake = FakeWarehouse::with_main(10);
        let report = load(&mut fake, LoadOptions::new("truncate"), 7).await.unwrap();
        assert_eq!(report.rows_inserted, 7);
        assert_eq!(fake.tables["s.t"], 7);
        assert!(fake.issued("ALTER TABLE s.t_1700000000_00042 RENAME TO t;"));
        assert!(!fake.staging_exists());
    }

    #[tokio::test]
    async fn test_staging_dropped_when_any_step_fails() {
        let failures: [(&str, &str); 6] = [
            ("insert", "COPY"),
            ("insert", "INSERT"),
            ("upsert", "DELETE"),
            ("bulk_delete_append", "INSERT"),
            ("truncate", "ALTER"),
            ("truncate", "ANALYZE"),
        ];
        for (strategy, step) in failures {
            let mut fake = FakeWarehouse::with_main(10).failing_on(step);
            let options = LoadOptions::new(strategy)
                .with_primary_key("id")
                .with_bulk_delete("color", "blue");
            let err = load(&mut fake, options, 3).await.unwrap_err();
            assert!(
                matches!(err, MoverError::Transport { .. }),
                "{strategy}/{step}: {err}"
            );
            assert!(!fake.staging_exists(), "{strategy}/{step} left staging behind");
            assert_eq!(
                fake.statements.last().map(String::as_str),
                Some("DROP TABLE IF EXISTS s.t_1700000000_00042;")
            );
        }
    }

    #[tokio::test]
    async fn test_staging_dropped_when_create_fails() {
        let mut fake = FakeWarehouse::with_main(10).failing_on("CREATE");
        load(&mut fake, LoadOptions::new("insert"), 1).await.unwrap_err();
        assert!(fake.issued("DROP TABLE IF EXISTS s.t_1700000000_00042;"));
    }

    #[tokio::test]
    async fn test_record_decode_failure_still_drops_staging() {
        let mut fake = FakeWarehouse::with_main(0);
        let records: Vec<Result<Record>> = vec![
            Ok(vec!["1".into()]),
            Err(MoverError::Decode("bad line".into())),
        ];
        let feed = StagingFeed::Records(stream::iter(records).boxed());
        let mut log = OperationLog::new();
        let err = run_load(&mut fake, &names(), &LoadOptions::new("insert"), feed, &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, MoverError::Decode(_)));
        assert!(!fake.staging_exists());
        assert!(log
            .entries()
            .contains(&"DROP TABLE IF EXISTS s.t_1700000000_00042;".to_string()));
    }

    #[tokio::test]
    async fn test_primary_and_cleanup_failures_both_surface() {
        let mut fake = FakeWarehouse::with_main(10).failing_on("INSERT");
        fake.fail_drop = true;
        let err = load(&mut fake, LoadOptions::new("insert"), 1).await.unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, MoverError::Cleanup { .. }));
        assert!(text.find("forced failure").unwrap() < text.find("drop failed").unwrap());
    }

    #[tokio::test]
    async fn test_object_feed() {
        let mut fake = FakeWarehouse::with_main(0);
        let feed = StagingFeed::Object(ObjectLocation {
            url: "s3://bucket/key.csv.gz".into(),
            access_key_id: "AK".into(),
            secret_access_key: "SECRET".into(),
        });
        let mut log = OperationLog::new();
        let report = run_load(&mut fake, &names(), &LoadOptions::new("insert"), feed, &mut log)
            .await
            .unwrap();
        assert_eq!(report.rows_staged, 4);
        assert!(log.entries().iter().all(|entry| !entry.contains("SECRET")));
    }
}
