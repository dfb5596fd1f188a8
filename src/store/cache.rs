//! Filesystem cache tier
//!
//! Layout under the base directory:
//!
//! ```text
//! profiles/<key>.json         profile envelope {user_id, last_updated, profile}
//! conversations/<key>.json    ordered message array
//! ```
//!
//! `<key>` is the user id with every byte outside `[A-Za-z0-9_-]`
//! percent-encoded, so any id maps to a single file inside its directory.
//!
//! Files are replaced with a backup-and-restore protocol: the current file is
//! renamed to `<key>.json.bak`, the new content is written, and the backup is
//! removed. A failed write renames the backup back. Leftovers of an
//! interrupted write are settled on the next access to the same path.

use super::types::{ConversationMessage, ProfileEnvelope};
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const PROFILES_DIR: &str = "profiles";
const CONVERSATIONS_DIR: &str = "conversations";

/// Map a user id to its file stem
pub fn cache_key(user_id: &str) -> Result<String> {
    if user_id.is_empty() {
        return Err(Error::InvalidUserId("user id is empty".to_string()));
    }
    let mut key = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            key.push(byte as char);
        } else {
            key.push_str(&format!("%{:02X}", byte));
        }
    }
    Ok(key)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Bring `path` back to its last complete snapshot after an interrupted write.
async fn settle(path: &Path) -> Result<()> {
    let backup = backup_path(path);
    if !exists(&backup).await {
        return Ok(());
    }

    if !exists(path).await {
        tracing::warn!("Restoring {} from leftover backup", path.display());
        tokio::fs::rename(&backup, path).await?;
        return Ok(());
    }

    let intact = match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes).is_ok(),
        Err(_) => false,
    };
    if intact {
        // Write finished but the backup was never removed
        remove_if_exists(&backup).await?;
    } else {
        tracing::warn!("Replacing unreadable {} with its backup", path.display());
        tokio::fs::rename(&backup, path).await?;
    }
    Ok(())
}

/// Filesystem-backed cache tier
pub struct LocalCache {
    base_dir: PathBuf,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

impl LocalCache {
    /// Create a cache rooted at `base_dir` (directories are created lazily)
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            #[cfg(test)]
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of a user's profile file
    pub fn profile_path(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(PROFILES_DIR)
            .join(format!("{}.json", cache_key(user_id)?)))
    }

    /// Path of a user's conversation file
    pub fn conversation_path(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self
            .base_dir
            .join(CONVERSATIONS_DIR)
            .join(format!("{}.json", cache_key(user_id)?)))
    }

    /// Read the profile envelope, `None` when the user has no profile file
    pub async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileEnvelope>> {
        let path = self.profile_path(user_id)?;
        match self.read_value(&path).await? {
            Some(value) => ProfileEnvelope::from_json(user_id, value)
                .map(Some)
                .map_err(|e| Error::Cache(format!("Invalid profile file {}: {}", path.display(), e))),
            None => Ok(None),
        }
    }

    /// Replace the profile file
    pub async fn save_profile(&self, envelope: &ProfileEnvelope) -> Result<()> {
        let path = self.profile_path(&envelope.user_id)?;
        self.write_json(&path, envelope).await
    }

    /// Read the conversation log in file order, `None` when there is no file
    pub async fn load_conversation(&self, user_id: &str) -> Result<Option<Vec<ConversationMessage>>> {
        let path = self.conversation_path(user_id)?;
        match self.read_value(&path).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                Error::Cache(format!("Invalid conversation file {}: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }

    /// Replace the conversation file
    pub async fn save_conversation(&self, user_id: &str, messages: &[ConversationMessage]) -> Result<()> {
        let path = self.conversation_path(user_id)?;
        self.write_json(&path, messages).await
    }

    /// True when any file (or backup) exists for the user
    pub async fn exists(&self, user_id: &str) -> Result<bool> {
        for path in [self.profile_path(user_id)?, self.conversation_path(user_id)?] {
            if exists(&path).await || exists(&backup_path(&path)).await {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove every file for the user; true when something was removed
    pub async fn delete(&self, user_id: &str) -> Result<bool> {
        let mut removed = false;
        for path in [self.profile_path(user_id)?, self.conversation_path(user_id)?] {
            removed |= remove_if_exists(&path).await?;
            removed |= remove_if_exists(&backup_path(&path)).await?;
        }
        Ok(removed)
    }

    async fn read_value(&self, path: &Path) -> Result<Option<Value>> {
        settle(path).await?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Cache(format!("Corrupt cache file {}: {}", path.display(), e)))
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        settle(path).await?;

        let backup = backup_path(path);
        let had_prior = exists(path).await;
        if had_prior {
            tokio::fs::rename(path, &backup).await?;
        }

        match self.write_bytes(path, &bytes).await {
            Ok(()) => {
                if had_prior {
                    if let Err(e) = remove_if_exists(&backup).await {
                        tracing::warn!("Failed to remove backup {}: {}", backup.display(), e);
                    }
                }
                Ok(())
            }
            Err(write_err) => {
                let restore: Result<()> = if had_prior {
                    tokio::fs::rename(&backup, path).await.map_err(Error::from)
                } else {
                    remove_if_exists(path).await.map(|_| ())
                };
                match restore {
                    Ok(()) => Err(Error::Cache(format!(
                        "Failed to write {}: {} (previous contents kept)",
                        path.display(),
                        write_err
                    ))),
                    Err(restore_err) => {
                        tracing::error!(
                            "Failed to restore {} after write error: {}",
                            path.display(),
                            restore_err
                        );
                        Err(Error::Cache(format!(
                            "Failed to write {}: {}; restore failed: {}",
                            path.display(),
                            write_err,
                            restore_err
                        )))
                    }
                }
            }
        }
    }

    #[cfg(not(test))]
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::write(path, bytes).await
    }

    #[cfg(test)]
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        use std::sync::atomic::Ordering;
        if self.fail_writes.load(Ordering::SeqCst) {
            // Leave a torn file behind, as a crash mid-write would
            tokio::fs::write(path, &bytes[..bytes.len() / 2]).await?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            ));
        }
        tokio::fs::write(path, bytes).await
    }

    #[cfg(test)]
    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}
