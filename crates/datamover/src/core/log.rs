//! Per-datasource operation trace.

use std::collections::HashSet;

use tracing::{debug, error};

/// Ordered, human-readable trace of the steps a datasource performed.
///
/// Entries are kept in insertion order and are never cleared by a failed
/// operation. Reading them through [`OperationLog::entries`] drops repeated
/// lines while keeping the first occurrence of each.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<String>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the trace.
    pub fn record(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!("{}", entry);
        self.entries.push(entry);
    }

    /// Append a fatal step, mirrored to the process log at error level.
    pub fn fatal(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        error!("{}", entry);
        self.entries.push(entry);
    }

    /// De-duplicated view of the trace.
    pub fn entries(&self) -> Vec<String> {
        dedup(self.entries.iter())
    }

    /// Raw trace including repeats.
    pub fn raw(&self) -> &[String] {
        &self.entries
    }

    /// Forget every entry, before reusing the owner for another transfer.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Merge several traces in order, de-duplicated.
    pub fn merged<'a>(logs: impl IntoIterator<Item = &'a OperationLog>) -> Vec<String> {
        dedup(logs.into_iter().flat_map(|log| log.entries.iter()))
    }
}

fn dedup<'a>(entries: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    entries
        .filter(|entry| seen.insert(*entry))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_dedup_keeps_first() {
        let mut log = OperationLog::new();
        log.record("a");
        log.record("b");
        log.record("a");
        assert_eq!(log.entries(), vec!["a", "b"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_merged_source_then_sink() {
        let mut source = OperationLog::new();
        source.record("Setting filename...x.csv");
        source.record("download");
        let mut sink = OperationLog::new();
        sink.record("Setting filename...x.csv");
        sink.fatal("upload failed");

        let merged = OperationLog::merged([&source, &sink]);
        assert_eq!(
            merged,
            vec!["Setting filename...x.csv", "download", "upload failed"]
        );
    }
}
