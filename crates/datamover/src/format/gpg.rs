//! GPG envelope stages, driven through the `gpg` binary.
//!
//! Every call runs against a throwaway home directory into which all `*.asc`
//! files under the keyring path are imported first. Keys are trusted as
//! imported.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MoverError, Result};
use crate::process::{capture, program_name};

/// Extension token appended to encrypted payloads.
pub const EXTENSION: &str = ".gpg";

/// gpg diagnostics that mean the input was not a readable envelope.
const MALFORMED_INPUT: &[&str] = &[
    "no valid OpenPGP data",
    "invalid packet",
    "invalid armor",
    "unexpected end of file",
];

#[derive(Debug, Clone)]
pub struct Gpg {
    program: String,
    keyring_path: PathBuf,
}

impl Gpg {
    pub fn new(keyring_path: impl Into<PathBuf>) -> Self {
        Self {
            program: "gpg".to_string(),
            keyring_path: keyring_path.into(),
        }
    }

    /// Use a different gpg binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn keyring_path(&self) -> &Path {
        &self.keyring_path
    }

    /// Key files that will be imported, sorted.
    pub fn key_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.keyring_path.join("*.asc");
        let pattern = pattern.to_string_lossy();
        let mut files = glob::glob(&pattern)
            .map_err(|e| MoverError::Config(format!("invalid keyring path {}: {}", pattern, e)))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    /// Decrypt an enveloped buffer, unlocking the secret key with `password`.
    pub async fn decrypt(&self, buffer: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
        let home = self.load_keys().await?;

        let mut command = self.command(home.path());
        if let Some(password) = password {
            let passphrase = home.path().join("passphrase");
            tokio::fs::write(&passphrase, password).await?;
            command
                .arg("--pinentry-mode")
                .arg("loopback")
                .arg("--passphrase-file")
                .arg(&passphrase);
        }
        command.arg("--decrypt");

        let plain = self.run(command, buffer, "decrypt").await?;
        debug!("Decrypted {} -> {} bytes", buffer.len(), plain.len());
        Ok(plain)
    }

    /// Encrypt for every recipient. At least one recipient is required.
    pub async fn encrypt(&self, buffer: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(MoverError::Encryption(
                "encryption requested without recipients".into(),
            ));
        }
        let home = self.load_keys().await?;

        let mut command = self.command(home.path());
        command.arg("--encrypt");
        for recipient in recipients {
            command.arg("--recipient").arg(recipient);
        }

        let sealed = self.run(command, buffer, "encrypt").await?;
        debug!("Encrypted {} -> {} bytes", buffer.len(), sealed.len());
        Ok(sealed)
    }

    async fn load_keys(&self) -> Result<TempDir> {
        let home = tempfile::Builder::new().prefix("datamover-gpg").tempdir()?;

        for key in self.key_files()? {
            info!("import: {}", key.display());
            let mut command = self.command(home.path());
            command.arg("--import").arg(&key);
            let captured = capture(command, None)
                .await
                .map_err(|e| self.spawn_error(e))?;
            if let Some(failure) = captured.failure(&self.program) {
                return Err(MoverError::Encryption(format!(
                    "cannot import {}: {}",
                    key.display(),
                    failure
                )));
            }
        }

        Ok(home)
    }

    fn command(&self, home: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--homedir")
            .arg(home)
            .arg("--batch")
            .arg("--yes")
            .arg("--quiet")
            .arg("--no-tty")
            .arg("--trust-model")
            .arg("always");
        command
    }

    async fn run(&self, command: Command, input: &[u8], operation: &str) -> Result<Vec<u8>> {
        let program = program_name(&command);
        let captured = capture(command, Some(input))
            .await
            .map_err(|e| self.spawn_error(e))?;
        match captured.failure(&program) {
            Some(failure) => Err(failure_error(operation, failure)),
            None => Ok(captured.stdout),
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> MoverError {
        MoverError::Encryption(format!("cannot run {}: {}", self.program, e))
    }
}

/// Bad envelopes handed to decrypt are decode failures; the rest are gpg's.
fn failure_error(operation: &str, failure: String) -> MoverError {
    let message = format!("{} failed: {}", operation, failure);
    if operation == "decrypt" && MALFORMED_INPUT.iter().any(|marker| failure.contains(marker)) {
        MoverError::Decode(message)
    } else {
        MoverError::Encryption(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_encrypt_requires_recipients() {
        let gpg = Gpg::new("/nonexistent");
        let err = gpg.encrypt(b"secret", &[]).await.unwrap_err();
        assert!(matches!(err, MoverError::Encryption(_)));
    }

    #[tokio::test]
    async fn test_decrypt_rejects_plain_buffer() {
        let keys = tempfile::tempdir().unwrap();
        let gpg = Gpg::new(keys.path());
        let err = gpg.decrypt(b"not an envelope", None).await.unwrap_err();
        match err {
            MoverError::Decode(_) => {}
            // no gpg binary on this machine
            MoverError::Encryption(message) => {
                assert!(message.contains("cannot run"), "{}", message)
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_encryption_error() {
        let keys = tempfile::tempdir().unwrap();
        let gpg = Gpg::new(keys.path()).with_program("datamover-no-such-gpg");
        let err = gpg
            .encrypt(b"x", &["ops@example.com".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot run"));
    }

    #[test]
    fn test_malformed_envelope_is_decode_error() {
        let failure = "gpg exited with status 2: gpg: no valid OpenPGP data found.".to_string();
        assert!(matches!(
            failure_error("decrypt", failure.clone()),
            MoverError::Decode(_)
        ));
        assert!(matches!(
            failure_error("encrypt", failure),
            MoverError::Encryption(_)
        ));
        let wrong_key = "gpg exited with status 2: gpg: decryption failed: No secret key".to_string();
        assert!(matches!(
            failure_error("decrypt", wrong_key),
            MoverError::Encryption(_)
        ));
    }

    #[test]
    fn test_key_files_only_asc() {
        let keys = tempfile::tempdir().unwrap();
        std::fs::write(keys.path().join("b.asc"), "key").unwrap();
        std::fs::write(keys.path().join("a.asc"), "key").unwrap();
        std::fs::write(keys.path().join("notes.txt"), "x").unwrap();

        let files = Gpg::new(keys.path()).key_files().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.asc", "b.asc"]);
    }
}
