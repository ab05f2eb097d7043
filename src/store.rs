//! Single-slot credential persistence.
//!
//! Two backends share the [`CredentialStore`] contract:
//! - [`FileCredentialStore`]: JSON file, replaced atomically via temp file + rename
//! - [`KeyringCredentialStore`]: system keyring entry (Secret Service, Keychain, Credential Manager)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::credential::Credential;
use crate::error::{Error, Result};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the persisted record. `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Replace the persisted record. Readers never observe a partial write.
    async fn save(&self, credential: &Credential) -> Result<()>;
}

pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes saves within the process; last completed write wins
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credential".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }

    async fn write_replace(&self, contents: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        if let Err(e) = write_private(&tmp, contents).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

async fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StoreCorrupt(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        Credential::from_json(&raw).map(Some)
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        let json = credential.to_json()?;

        let _guard = self.write_lock.lock().await;
        self.write_replace(&json)
            .await
            .map_err(|e| Error::StoreWrite(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }
}

/// Keeps the single credential record in the system keyring.
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    pub const ACCOUNT: &'static str = "google_drive";

    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            account: Self::ACCOUNT.to_string(),
        }
    }

    fn entry(service: &str, account: &str) -> std::result::Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(service, account)
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let service = self.service.clone();
        let account = self.account.clone();

        // Keyring access is a blocking platform call
        let raw = tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.get_password() {
                Ok(json) => Ok(Some(json)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| Error::StoreCorrupt(e.to_string()))?
        .map_err(|e| Error::StoreCorrupt(e.to_string()))?;

        match raw {
            Some(json) => Credential::from_json(&json).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        let json = credential.to_json()?;
        let service = self.service.clone();
        let account = self.account.clone();

        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            entry.set_password(&json)
        })
        .await
        .map_err(|e| Error::StoreWrite(e.to_string()))?
        .map_err(|e| Error::StoreWrite(e.to_string()))?;

        debug!(service = %self.service, "credential stored in keyring");
        Ok(())
    }
}
