//! Load strategies and per-upload options.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{MoverError, Result};

/// How staged rows are merged into the main table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    /// Append staged rows.
    Insert,
    /// Delete main rows whose key matches a staged row, then append.
    ///
    /// Main rows whose key is absent from staging are left in place, so a
    /// staging batch smaller than the main table leaves orphaned rows behind.
    Upsert,
    /// Delete main rows matching fixed column predicates, then append.
    BulkDeleteAppend,
    /// Drop the main table and rename staging into its place.
    Truncate,
}

impl LoadStrategy {
    pub const ALL: [LoadStrategy; 4] = [
        LoadStrategy::Insert,
        LoadStrategy::Upsert,
        LoadStrategy::BulkDeleteAppend,
        LoadStrategy::Truncate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStrategy::Insert => "insert",
            LoadStrategy::Upsert => "upsert",
            LoadStrategy::BulkDeleteAppend => "bulk_delete_append",
            LoadStrategy::Truncate => "truncate",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStrategy {
    type Err = MoverError;

    fn from_str(s: &str) -> Result<Self> {
        LoadStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = LoadStrategy::ALL.iter().map(|s| s.as_str()).collect();
                MoverError::Config(format!(
                    "{{load_options: {}}} is not a valid configuration. {{load_options: ({})}}",
                    s,
                    valid.join("|")
                ))
            })
    }
}

/// Options a warehouse sink is configured with before `upload`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Raw strategy name; validated when the upload starts.
    pub load_option: String,
    /// Comma-separated key columns for `upsert`. Blank means no delete step.
    pub primary_key: Option<String>,
    /// `column LIKE 'value'` predicates for `bulk_delete_append`, in order.
    pub bulk_delete: Vec<(String, String)>,
    /// Column separator of the staged data, for loaders that need it.
    pub delimiter: Option<u8>,
}

impl LoadOptions {
    pub fn new(load_option: impl Into<String>) -> Self {
        Self {
            load_option: load_option.into(),
            ..Self::default()
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    pub fn with_bulk_delete(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.bulk_delete.push((column.into(), value.into()));
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn strategy(&self) -> Result<LoadStrategy> {
        self.load_option.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known() {
        for strategy in LoadStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<LoadStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn test_parse_unknown_message() {
        let err = "merge".parse::<LoadStrategy>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: {load_options: merge} is not a valid configuration. \
             {load_options: (insert|upsert|bulk_delete_append|truncate)}"
        );
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!("Insert".parse::<LoadStrategy>().is_err());
        assert!("".parse::<LoadStrategy>().is_err());
    }
}
