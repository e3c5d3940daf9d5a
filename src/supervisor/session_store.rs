//! Persisted session credentials.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Storage for the external session's persisted login.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Remove persisted credentials so the next initialize starts a fresh login.
    async fn clear(&self) -> crate::Result<()>;
}

/// Credentials kept in a directory on disk.
#[derive(Debug, Clone)]
pub struct SessionDirStore {
    dir: PathBuf,
}

impl SessionDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a previous session left credentials behind.
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }
}

#[async_trait]
impl CredentialStore for SessionDirStore {
    async fn clear(&self) -> crate::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                tracing::info!(dir = %self.dir.display(), "cleared session credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::BotError::Credentials(format!(
                "cannot remove {}: {e}",
                self.dir.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn clear_removes_the_session_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session-client");
        std::fs::create_dir_all(dir.join("Default")).unwrap();
        std::fs::write(dir.join("Default/creds.json"), b"{}").unwrap();

        let store = SessionDirStore::new(&dir);
        assert!(store.exists());
        store.clear().await.unwrap();
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn clearing_a_missing_dir_is_ok() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionDirStore::new(root.path().join("never-created"));
        store.clear().await.unwrap();
    }
}
