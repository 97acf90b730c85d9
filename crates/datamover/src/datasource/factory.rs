//! Build adapters from endpoint specs and the datasource catalogue.
//!
//! Endpoint grammar:
//!
//! ```text
//! file:PATH
//! console:
//! s3:NAME:KEY
//! sftp:NAME:PATH
//! ftp:NAME:PATH
//! postgres:NAME:SCHEMA.TABLE
//! redshift:NAME:SCHEMA.TABLE
//! sqlserver:NAME
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

use super::{
    ConsoleDatasource, FileDatasource, PostgresDatasource, RedshiftDatasource, RemoteDatasource,
    S3Datasource, SqlServerDatasource,
};
use crate::config::Config;
use crate::core::Datasource;
use crate::error::{MoverError, Result};

/// A parsed endpoint reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    File(PathBuf),
    Console,
    S3 { name: String, key: String },
    Sftp { name: String, path: String },
    Ftp { name: String, path: String },
    Postgres { name: String, schema: String, table: String },
    Redshift { name: String, schema: String, table: String },
    SqlServer { name: String },
}

impl EndpointSpec {
    /// `(schema, table)` for warehouse endpoints.
    pub fn table(&self) -> Option<(&str, &str)> {
        match self {
            EndpointSpec::Postgres { schema, table, .. }
            | EndpointSpec::Redshift { schema, table, .. } => Some((schema.as_str(), table.as_str())),
            _ => None,
        }
    }

    /// Whether building this endpoint needs the datasource catalogue.
    pub fn is_named(&self) -> bool {
        !matches!(self, EndpointSpec::File(_) | EndpointSpec::Console)
    }
}

impl FromStr for EndpointSpec {
    type Err = MoverError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        let invalid = |expected: &str| {
            MoverError::Config(format!(
                "invalid endpoint '{}': expected {}",
                s, expected
            ))
        };
        let named = |expected: &str| -> Result<(String, String)> {
            match rest.split_once(':') {
                Some((name, target)) if !name.is_empty() && !target.is_empty() => {
                    Ok((name.to_string(), target.to_string()))
                }
                _ => Err(invalid(expected)),
            }
        };
        let table = |expected: &str| -> Result<(String, String, String)> {
            let (name, qualified) = named(expected)?;
            match qualified.split_once('.') {
                Some((schema, table)) if !schema.is_empty() && !table.is_empty() => {
                    Ok((name, schema.to_string(), table.to_string()))
                }
                _ => Err(invalid(expected)),
            }
        };

        match kind {
            "file" if !rest.is_empty() => Ok(EndpointSpec::File(PathBuf::from(rest))),
            "file" => Err(invalid("file:PATH")),
            "console" | "stdout" if rest.is_empty() => Ok(EndpointSpec::Console),
            "console" | "stdout" => Err(invalid("console:")),
            "s3" => {
                let (name, key) = named("s3:NAME:KEY")?;
                Ok(EndpointSpec::S3 { name, key })
            }
            "sftp" => {
                let (name, path) = named("sftp:NAME:PATH")?;
                Ok(EndpointSpec::Sftp { name, path })
            }
            "ftp" => {
                let (name, path) = named("ftp:NAME:PATH")?;
                Ok(EndpointSpec::Ftp { name, path })
            }
            "postgres" => {
                let (name, schema, table) = table("postgres:NAME:SCHEMA.TABLE")?;
                Ok(EndpointSpec::Postgres { name, schema, table })
            }
            "redshift" => {
                let (name, schema, table) = table("redshift:NAME:SCHEMA.TABLE")?;
                Ok(EndpointSpec::Redshift { name, schema, table })
            }
            "sqlserver" if !rest.is_empty() && !rest.contains(':') => Ok(EndpointSpec::SqlServer {
                name: rest.to_string(),
            }),
            "sqlserver" => Err(invalid("sqlserver:NAME")),
            other => Err(MoverError::Config(format!(
                "unknown endpoint type '{}' in '{}' \
                 (file, console, s3, sftp, ftp, postgres, redshift, sqlserver)",
                other, s
            ))),
        }
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSpec::File(path) => write!(f, "file:{}", path.display()),
            EndpointSpec::Console => f.write_str("console:"),
            EndpointSpec::S3 { name, key } => write!(f, "s3:{}:{}", name, key),
            EndpointSpec::Sftp { name, path } => write!(f, "sftp:{}:{}", name, path),
            EndpointSpec::Ftp { name, path } => write!(f, "ftp:{}:{}", name, path),
            EndpointSpec::Postgres { name, schema, table } => {
                write!(f, "postgres:{}:{}.{}", name, schema, table)
            }
            EndpointSpec::Redshift { name, schema, table } => {
                write!(f, "redshift:{}:{}.{}", name, schema, table)
            }
            EndpointSpec::SqlServer { name } => write!(f, "sqlserver:{}", name),
        }
    }
}

/// Build the adapter for `spec`.
///
/// `query` is applied to SQL endpoints; a table endpoint without one reads
/// the whole table.
pub fn build(
    spec: &EndpointSpec,
    config: &Config,
    env: Option<&str>,
    query: Option<&str>,
) -> Result<Box<dyn Datasource>> {
    debug!("Building datasource for {}", spec);
    let require_env = || {
        env.ok_or_else(|| {
            MoverError::Config(format!(
                "endpoint '{}' needs an environment (--env or DATAMOVER_ENV)",
                spec
            ))
        })
    };

    let datasource: Box<dyn Datasource> = match spec {
        EndpointSpec::File(path) => Box::new(FileDatasource::new(path)),
        EndpointSpec::Console => Box::new(ConsoleDatasource::new()),
        EndpointSpec::S3 { name, key } => {
            let mut s3 = S3Datasource::new(config.s3(name, require_env()?)?);
            s3.set_object_key(key);
            Box::new(s3)
        }
        EndpointSpec::Sftp { name, path } => {
            let mut remote = RemoteDatasource::from_sftp(config.sftp(name, require_env()?)?);
            remote.set_filepath(path);
            Box::new(remote)
        }
        EndpointSpec::Ftp { name, path } => {
            let mut remote = RemoteDatasource::from_ftp(config.ftp(name, require_env()?)?);
            remote.set_filepath(path);
            Box::new(remote)
        }
        EndpointSpec::Postgres { name, schema, table } => {
            let mut pg = PostgresDatasource::new(config.postgres(name, require_env()?)?);
            pg.set_query(table_query(query, schema, table));
            Box::new(pg)
        }
        EndpointSpec::Redshift { name, schema, table } => {
            let mut redshift = RedshiftDatasource::new(config.redshift(name, require_env()?)?);
            redshift.set_query(table_query(query, schema, table));
            Box::new(redshift)
        }
        EndpointSpec::SqlServer { name } => {
            let mut sqlserver = SqlServerDatasource::new(config.sqlserver(name, require_env()?)?);
            if let Some(query) = query {
                sqlserver.set_query(query);
            }
            Box::new(sqlserver)
        }
    };
    Ok(datasource)
}

fn table_query(query: Option<&str>, schema: &str, table: &str) -> String {
    match query {
        Some(query) => query.to_string(),
        None => format!("SELECT * FROM {}.{}", schema, table),
    }
}

/// Parse a delimiter argument: one ASCII character or `\t`, `tab`, `comma`, `pipe`.
pub fn parse_delimiter(s: &str) -> Result<u8> {
    match s {
        "\\t" | "tab" => Ok(b'\t'),
        "comma" => Ok(b','),
        "pipe" => Ok(b'|'),
        _ if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
        _ => Err(MoverError::Config(format!(
            "invalid delimiter '{}': expected one ASCII character, \\t, tab, comma or pipe",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DatasourceKind;

    #[test]
    fn test_parse_specs() {
        assert_eq!(
            "file:/tmp/a.csv".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::File(PathBuf::from("/tmp/a.csv"))
        );
        assert_eq!("console:".parse::<EndpointSpec>().unwrap(), EndpointSpec::Console);
        assert_eq!("console".parse::<EndpointSpec>().unwrap(), EndpointSpec::Console);
        assert_eq!(
            "s3:archive:exports/2024/a.csv".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::S3 {
                name: "archive".into(),
                key: "exports/2024/a.csv".into()
            }
        );
        assert_eq!(
            "redshift:dw:public.orders".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::Redshift {
                name: "dw".into(),
                schema: "public".into(),
                table: "orders".into()
            }
        );
        assert_eq!(
            "sqlserver:erp".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::SqlServer { name: "erp".into() }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "file:",
            "s3:archive",
            "postgres:analytics:orders",
            "sqlserver:",
            "mysql:x:y",
        ] {
            let err = bad.parse::<EndpointSpec>().unwrap_err();
            assert!(matches!(err, MoverError::Config(_)), "{}", bad);
        }
    }

    #[test]
    fn test_display_round_trips() {
        for spec in ["s3:archive:k.csv", "postgres:a:s.t", "file:x.csv", "console:"] {
            assert_eq!(spec.parse::<EndpointSpec>().unwrap().to_string(), spec);
        }
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("pipe").unwrap(), b'|');
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert!(parse_delimiter("||").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[tokio::test]
    async fn test_build_local_without_catalogue() {
        let config = Config::default();
        let file = build(&"file:a.csv".parse().unwrap(), &config, None, None).unwrap();
        assert_eq!(file.kind(), DatasourceKind::File);
        let console = build(&EndpointSpec::Console, &config, None, None).unwrap();
        assert_eq!(console.display_name(), "stdout");
    }

    #[test]
    fn test_build_named_needs_env_and_entry() {
        let config = Config::from_yaml(
            r#"
datasources:
  s3:
    archive:
      production:
        access_key_id: AK
        secret_access_key: SK
        bucket_name: exports
"#,
        )
        .unwrap();
        let spec: EndpointSpec = "s3:archive:in/a.csv".parse().unwrap();

        let err = build(&spec, &config, None, None).err().unwrap();
        assert!(err.to_string().contains("needs an environment"));

        let err = build(&spec, &config, Some("staging"), None).err().unwrap();
        assert!(err.to_string().contains("'archive'"));

        let s3 = build(&spec, &config, Some("production"), None).unwrap();
        assert_eq!(s3.display_name(), "s3://exports/in/a.csv");
    }

    #[test]
    fn test_table_query_default() {
        assert_eq!(table_query(None, "s", "t"), "SELECT * FROM s.t");
        assert_eq!(table_query(Some("SELECT 1"), "s", "t"), "SELECT 1");
    }
}
