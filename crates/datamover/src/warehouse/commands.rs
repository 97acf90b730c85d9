//! SQL statements issued during a warehouse load.
//!
//! Schema, table and key names come from configuration and are interpolated
//! as given. Predicate values have single quotes doubled.

use crate::core::ObjectLocation;

/// Main and staging relation names for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    schema: String,
    table: String,
    staging_table: String,
}

impl TableNames {
    pub fn new(schema: &str, table: &str, suffix: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            staging_table: format!("{}_{}", table, suffix),
        }
    }

    pub fn main(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn staging(&self) -> String {
        format!("{}.{}", self.schema, self.staging_table)
    }

    pub fn create_staging(&self) -> String {
        format!("CREATE TABLE {} ( LIKE {} );", self.staging(), self.main())
    }

    pub fn drop_staging(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.staging())
    }

    pub fn drop_main(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.main())
    }

    pub fn rename_staging_to_main(&self) -> String {
        format!("ALTER TABLE {} RENAME TO {};", self.staging(), self.table)
    }

    pub fn insert_from_staging(&self) -> String {
        format!("INSERT INTO {} SELECT * FROM {};", self.main(), self.staging())
    }

    pub fn analyze(&self) -> String {
        format!("ANALYZE {};", self.main())
    }

    pub fn count_main(&self) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", self.main())
    }

    /// Delete main rows whose key columns match a staged row.
    /// `None` when the key is unset or blank.
    pub fn delete_matching_staging(&self, primary_key: Option<&str>) -> Option<String> {
        let keys: Vec<&str> = primary_key
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .collect();
        if keys.is_empty() {
            return None;
        }

        let (main, staging) = (self.main(), self.staging());
        let compare = keys
            .iter()
            .map(|key| format!("{main}.{key} = {staging}.{key}"))
            .collect::<Vec<_>>()
            .join(" AND ");

        Some(format!("DELETE FROM {main} USING {staging} WHERE {compare};"))
    }

    /// Delete main rows matching every `column LIKE 'value'` predicate.
    /// `None` when there are no predicates.
    pub fn bulk_delete(&self, predicates: &[(String, String)]) -> Option<String> {
        let compare: Vec<String> = predicates
            .iter()
            .filter(|(column, _)| !column.trim().is_empty())
            .map(|(column, value)| {
                format!(
                    "{} LIKE '{}'",
                    column.trim(),
                    value.trim().replace('\'', "''")
                )
            })
            .collect();
        if compare.is_empty() {
            return None;
        }

        Some(format!(
            "DELETE FROM {} WHERE {};",
            self.main(),
            compare.join(" AND ")
        ))
    }
}

/// `COPY ... FROM STDIN` in text format.
pub fn copy_from_stdin(table: &str) -> String {
    format!("COPY {} FROM STDIN", table)
}

/// Redshift COPY from object storage.
///
/// `GZIP` is added when the object key ends in `.gz`.
pub fn copy_from_object(table: &str, object: &ObjectLocation, delimiter: Option<u8>) -> String {
    let mut sql = format!(
        "COPY {} FROM '{}' CREDENTIALS 'aws_access_key_id={};aws_secret_access_key={}' \
         CSV ACCEPTANYDATE BLANKSASNULL EMPTYASNULL TRUNCATECOLUMNS",
        table, object.url, object.access_key_id, object.secret_access_key
    );
    if object.is_gzip() {
        sql.push_str(" GZIP");
    }
    sql.push_str(" COMPUPDATE ON");
    if let Some(delimiter) = delimiter {
        sql.push_str(&format!(" DELIMITER '{}'", escape_delimiter(delimiter)));
    }
    sql.push(';');
    sql
}

fn escape_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        b'\'' => "\\'".to_string(),
        other => (other as char).to_string(),
    }
}
