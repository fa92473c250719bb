use super::{ChallengeStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// In-process challenge store
///
/// Clones share the same map, so the issuance flow and a responder running
/// in the same process can each hold a handle.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// token -> key authorization
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published challenges
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!(key = %key, "Publishing challenge response");
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            debug!(key = %key, "Removed challenge response");
        } else {
            warn!(key = %key, "Tried to delete challenge response, but couldn't find it");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.entries.get(key).map(|v| v.clone());
        trace!(key = %key, found = value.is_some(), "Challenge lookup");
        Ok(value)
    }
}
