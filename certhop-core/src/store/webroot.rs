use super::{ChallengeStore, StoreError, is_valid_key};
use crate::challenge::WELL_KNOWN_PREFIX;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Challenge store backed by a web server's document root
///
/// Responses are written to `<root>/.well-known/acme-challenge/<token>`,
/// where any static file server (or `certhop serve`) can hand them to the CA.
#[derive(Debug, Clone)]
pub struct WebrootStore {
    root: PathBuf,
}

impl WebrootStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the challenge files
    pub fn challenge_dir(&self) -> PathBuf {
        self.root.join(WELL_KNOWN_PREFIX.trim_matches('/'))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.challenge_dir().join(key))
    }
}

#[async_trait]
impl ChallengeStore for WebrootStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let dir = self.challenge_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Write(dir, e))?;

        // Write then rename so the responder never serves a partial file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, value)
            .await
            .map_err(|e| StoreError::Write(temp_path.clone(), e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))?;

        debug!(path = %path.display(), "Published challenge response");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed challenge response");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key = %key, "Tried to delete challenge response, but couldn't find it");
                Ok(())
            }
            Err(e) => Err(StoreError::Delete(path, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if !is_valid_key(key) {
            return Ok(None);
        }
        let path = self.challenge_dir().join(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read(path, e)),
        }
    }
}
