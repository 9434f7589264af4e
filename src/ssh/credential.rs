// ABOUTME: Ephemeral key/certificate credentials and their on-disk projection.
// ABOUTME: Materialized files live in a private temp directory that is removed on every exit path.

use super::error::{Error, Result};
use crate::types::UserName;
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// File name of the private key; `ssh` looks for `<identity>-cert.pub` next to it.
pub const PRIVATE_KEY_FILE: &str = "id_rsa";
/// File name of the signed certificate.
pub const CERTIFICATE_FILE: &str = "id_rsa-cert.pub";

const DIR_MODE: u32 = 0o700;
const PRIVATE_KEY_MODE: u32 = 0o400;
const CERTIFICATE_MODE: u32 = 0o644;

/// A short-lived key/certificate pair issued for one portal session.
#[derive(Clone)]
pub struct Credential {
    user_name: UserName,
    private_key: String,
    certificate: String,
    remote_host: String,
    via_gateway: String,
    issued_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential targeting `remote_host` directly.
    ///
    /// The gateway defaults to the remote host; use [`Credential::via_gateway`]
    /// when the host sits behind a login node.
    pub fn new(
        user_name: UserName,
        private_key: impl Into<String>,
        certificate: impl Into<String>,
        remote_host: impl Into<String>,
    ) -> Self {
        let remote_host = remote_host.into();
        Self {
            user_name,
            private_key: private_key.into(),
            certificate: certificate.into(),
            via_gateway: remote_host.clone(),
            remote_host,
            issued_at: Utc::now(),
        }
    }

    pub fn via_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.via_gateway = gateway.into();
        self
    }

    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn user_name(&self) -> &UserName {
        &self.user_name
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Host the `ssh` process actually connects to.
    pub fn gateway(&self) -> &str {
        &self.via_gateway
    }

    pub fn issue_time(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Wall-clock time since the credential was issued (zero if issued in the future).
    pub fn age(&self) -> Duration {
        (Utc::now() - self.issued_at).to_std().unwrap_or_default()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_name", &self.user_name)
            .field("private_key", &"<redacted>")
            .field("certificate", &"<redacted>")
            .field("remote_host", &self.remote_host)
            .field("via_gateway", &self.via_gateway)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// A credential written to disk for the duration of one invocation.
///
/// The directory is created with mode 0700 and holds exactly two files. The
/// handle owns the directory: [`release`](Self::release) removes it, and
/// dropping an unreleased handle does the same, so cancellation or an early
/// return cannot leave key material behind.
pub struct MaterializedCredential {
    dir: Option<TempDir>,
    private_key: PathBuf,
    certificate: PathBuf,
}

impl std::fmt::Debug for MaterializedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializedCredential")
            .field("private_key", &self.private_key)
            .field("released", &self.is_released())
            .finish()
    }
}

impl MaterializedCredential {
    /// Write `credential` into a fresh private directory.
    ///
    /// The directory is created under `temp_root` when given, otherwise under
    /// the OS temp directory. Anything partially written is removed if a later
    /// step fails.
    pub fn create(credential: &Credential, temp_root: Option<&Path>) -> Result<Self> {
        Self::write(credential, temp_root).map_err(|source| Error::Materialize {
            user: credential.user_name().to_string(),
            source,
        })
    }

    fn write(credential: &Credential, temp_root: Option<&Path>) -> std::io::Result<Self> {
        let prefix = format!("ssh-authz-{}-", credential.user_name());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        fs::set_permissions(dir.path(), Permissions::from_mode(DIR_MODE))?;

        let private_key = dir.path().join(PRIVATE_KEY_FILE);
        let certificate = dir.path().join(CERTIFICATE_FILE);
        write_new_file(
            &private_key,
            credential.private_key().as_bytes(),
            PRIVATE_KEY_MODE,
        )?;
        write_new_file(
            &certificate,
            credential.certificate().as_bytes(),
            CERTIFICATE_MODE,
        )?;

        tracing::debug!("Materialized credential in {}", dir.path().display());

        Ok(Self {
            dir: Some(dir),
            private_key,
            certificate,
        })
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key
    }

    pub fn certificate_path(&self) -> &Path {
        &self.certificate
    }

    /// The private directory, or `None` once released.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Delete both files, then the directory. Calling this again is a no-op.
    pub fn release(&mut self) -> std::io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        remove_if_present(&self.private_key)?;
        remove_if_present(&self.certificate)?;
        let path = dir.path().to_path_buf();
        dir.close()?;
        tracing::debug!("Released credential in {}", path.display());
        Ok(())
    }
}

impl Drop for MaterializedCredential {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to remove materialized credential: {}", e);
        }
    }
}

/// Create `path` with `mode` from the start, so the file is never broader than intended.
fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
