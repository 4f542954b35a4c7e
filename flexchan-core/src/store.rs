//! Durable mapping from workspace id to its list of channel-group records.
//!
//! The store is plain get/set with last-writer-wins semantics. It has no
//! transactions and no compare-and-swap; serialization of read-modify-write
//! sequences is the job of [`crate::registry::Registry`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::record::ChannelGroup;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable per-workspace record list.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Full list for a workspace, or `None` if nothing was ever stored.
    async fn get(&self, workspace_id: &str) -> Result<Option<Vec<ChannelGroup>>, StoreError>;

    /// Replace the full list for a workspace.
    async fn set(&self, workspace_id: &str, records: Vec<ChannelGroup>) -> Result<(), StoreError>;

    /// Every workspace that has a stored list.
    async fn workspaces(&self) -> Result<Vec<String>, StoreError>;
}

/// In-process store. Used by tests and single-shot tooling.
#[derive(Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, Vec<ChannelGroup>>>,
    writes: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn get(&self, workspace_id: &str) -> Result<Option<Vec<ChannelGroup>>, StoreError> {
        Ok(self.lists.lock().get(workspace_id).cloned())
    }

    async fn set(&self, workspace_id: &str, records: Vec<ChannelGroup>) -> Result<(), StoreError> {
        self.lists.lock().insert(workspace_id.to_string(), records);
        *self.writes.lock() += 1;
        Ok(())
    }

    async fn workspaces(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lists.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
