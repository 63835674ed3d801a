//! External encryption transform used by encrypted cache instances.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// File extension appended to `<key>.json` when a cache is encrypted.
pub const ENCRYPTED_EXTENSION: &str = "gpg";

/// Symmetric pair of external transforms applied around cache files.
pub trait EncryptionCommand: Send + Sync {
    /// Encrypts `plaintext` for `recipient` and writes the artifact to `output`.
    fn encrypt(&self, recipient: &str, plaintext: &[u8], output: &Path) -> Result<(), String>;
    /// Decrypts the artifact at `input` and returns the plaintext bytes.
    fn decrypt(&self, input: &Path) -> Result<Vec<u8>, String>;
}

/// Shells out to the `gpg` binary on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpgCommand;

impl EncryptionCommand for GpgCommand {
    fn encrypt(&self, recipient: &str, plaintext: &[u8], output: &Path) -> Result<(), String> {
        let mut child = Command::new("gpg")
            .arg("--encrypt")
            .arg("--recipient")
            .arg(recipient)
            .arg("--output")
            .arg(output)
            .arg("--yes")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| format!("failed to start gpg: {error}"))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| "gpg stdin unavailable".to_string())?;
            stdin
                .write_all(plaintext)
                .map_err(|error| format!("failed to write gpg stdin: {error}"))?;
        }
        let result = child
            .wait_with_output()
            .map_err(|error| format!("failed waiting for gpg: {error}"))?;
        if !result.status.success() {
            return Err(format!(
                "gpg encryption failed ({}): {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }
        Ok(())
    }

    fn decrypt(&self, input: &Path) -> Result<Vec<u8>, String> {
        let result = Command::new("gpg")
            .arg("--decrypt")
            .arg("--quiet")
            .arg(input)
            .stdin(Stdio::inherit())
            .output()
            .map_err(|error| format!("failed to start gpg: {error}"))?;
        if !result.status.success() {
            return Err(format!(
                "gpg decryption failed ({}): {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }
        Ok(result.stdout)
    }
}
