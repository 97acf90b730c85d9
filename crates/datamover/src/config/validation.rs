//! Configuration validation.

use super::Config;
use crate::datasource::tls::SslMode;
use crate::error::{MoverError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let ds = &config.datasources;

    for (name, env, entry) in entries(&ds.s3) {
        let at = format!("datasources.s3.{}.{}", name, env);
        required(&entry.bucket_name, &at, "bucket_name")?;
        required(&entry.access_key_id, &at, "access_key_id")?;
        required(&entry.region, &at, "region")?;
    }

    for (kind, map) in [("postgres", &ds.postgres), ("redshift", &ds.redshift)] {
        for (name, env, entry) in entries(map) {
            let at = format!("datasources.{}.{}.{}", kind, name, env);
            required(&entry.host, &at, "host")?;
            required(&entry.login, &at, "login")?;
            required(&entry.database_name, &at, "database_name")?;
            SslMode::parse(&entry.ssl_mode)?;
        }
    }

    for (name, env, entry) in entries(&ds.sqlserver) {
        let at = format!("datasources.sqlserver.{}.{}", name, env);
        required(&entry.host, &at, "host")?;
        required(&entry.login, &at, "login")?;
        required(&entry.database_name, &at, "database_name")?;
    }

    for (name, env, entry) in entries(&ds.sftp) {
        let at = format!("datasources.sftp.{}.{}", name, env);
        required(&entry.host, &at, "host")?;
        required(&entry.login, &at, "login")?;
        if entry.password.is_none() && entry.ssh_key.is_none() {
            return Err(MoverError::Config(format!(
                "{} needs a password or an ssh_key",
                at
            )));
        }
    }

    for (name, env, entry) in entries(&ds.ftp) {
        let at = format!("datasources.ftp.{}.{}", name, env);
        required(&entry.host, &at, "host")?;
        required(&entry.login, &at, "login")?;
    }

    if let Some(staging) = &config.settings.staging {
        if !ds.s3.contains_key(&staging.datasource) {
            return Err(MoverError::Config(format!(
                "settings.staging.datasource '{}' is not an s3 datasource",
                staging.datasource
            )));
        }
    }

    Ok(())
}

fn entries<T>(map: &super::Environments<T>) -> impl Iterator<Item = (&String, &String, &T)> {
    map.iter()
        .flat_map(|(name, envs)| envs.iter().map(move |(env, entry)| (name, env, entry)))
}

fn required(value: &str, at: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MoverError::Config(format!("{}.{} is required", at, field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::from_yaml_unchecked(
            r#"
settings:
  keyring_path: /etc/keys
  staging:
    datasource: archive
datasources:
  s3:
    archive:
      production:
        access_key_id: AK
        secret_access_key: SK
        bucket_name: archive-bucket
  redshift:
    dw:
      production:
        host: dw.example.com
        port: 5439
        login: loader
        password: pw
        database_name: analytics
  sftp:
    partner:
      production:
        host: sftp.example.com
        login: partner
        password: pw
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_bucket() {
        let mut config = valid_config();
        config
            .datasources
            .s3
            .get_mut("archive")
            .unwrap()
            .get_mut("production")
            .unwrap()
            .bucket_name = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err
            .to_string()
            .contains("datasources.s3.archive.production.bucket_name is required"));
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        config
            .datasources
            .redshift
            .get_mut("dw")
            .unwrap()
            .get_mut("production")
            .unwrap()
            .ssl_mode = "sometimes".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sftp_needs_credentials() {
        let mut config = valid_config();
        config
            .datasources
            .sftp
            .get_mut("partner")
            .unwrap()
            .get_mut("production")
            .unwrap()
            .password = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_staging_must_be_s3() {
        let mut config = valid_config();
        config.settings.staging.as_mut().unwrap().datasource = "nowhere".into();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = valid_config();
        let redshift = &config.datasources.redshift["dw"]["production"];
        let debug_output = format!("{:?}", redshift);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("\"pw\""));

        let s3 = format!("{:?}", config.datasources.s3["archive"]["production"]);
        assert!(s3.contains("access_key_id: \"AK\""));
        assert!(!s3.contains("SK"));
    }
}
