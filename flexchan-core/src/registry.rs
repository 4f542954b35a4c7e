//! Registry access layer.
//!
//! Reads go straight to the store. Every mutation goes through a
//! [`WorkspaceTxn`], which holds the workspace's async mutex for as long as it
//! lives, so two handlers can never interleave their read-modify-write of the
//! same list. The guard is a tokio mutex because callers keep it across remote
//! calls (room creation, member moves).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{FlexError, Result};
use crate::record::{ChannelGroup, SpawnedRoom};
use crate::store::RegistryStore;

/// Record selector. Exactly one key per lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Match on the lobby room id.
    LobbyRoom(&'a str),
    /// Match on the grouping container id.
    Group(&'a str),
}

impl Lookup<'_> {
    pub fn matches(&self, record: &ChannelGroup) -> bool {
        match self {
            Lookup::LobbyRoom(id) => record.is_lobby(id),
            Lookup::Group(id) => record.owns_group(id),
        }
    }
}

pub struct Registry {
    store: Arc<dyn RegistryStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Full list for a workspace; empty when nothing is stored.
    pub async fn get(&self, workspace_id: &str) -> Result<Vec<ChannelGroup>> {
        Ok(self.store.get(workspace_id).await?.unwrap_or_default())
    }

    /// Unlocked lookup. The answer may be stale by the time the caller acts on
    /// it; re-check inside a [`WorkspaceTxn`] before mutating.
    pub async fn find(&self, workspace_id: &str, by: Lookup<'_>) -> Result<Option<ChannelGroup>> {
        let records = self.get(workspace_id).await?;
        Ok(records.into_iter().find(|r| by.matches(r)))
    }

    /// Take the workspace's mutation lock.
    pub async fn lock(&self, workspace_id: &str) -> WorkspaceTxn<'_> {
        let mutex = self
            .locks
            .entry(workspace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        WorkspaceTxn {
            registry: self,
            workspace_id: workspace_id.to_string(),
            _guard: guard,
        }
    }
}

/// Exclusive access to one workspace's record list.
pub struct WorkspaceTxn<'a> {
    registry: &'a Registry,
    workspace_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceTxn<'_> {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub async fn records(&self) -> Result<Vec<ChannelGroup>> {
        self.registry.get(&self.workspace_id).await
    }

    pub async fn find(&self, by: Lookup<'_>) -> Result<Option<ChannelGroup>> {
        Ok(self.records().await?.into_iter().find(|r| by.matches(r)))
    }

    /// Append a new record. Rejects a second record for the same lobby.
    pub async fn insert_record(&self, record: ChannelGroup) -> Result<()> {
        let mut records = self.records().await?;
        if records.iter().any(|r| r.is_lobby(&record.lobby_channel_id)) {
            return Err(FlexError::RegistryInconsistency(format!(
                "lobby {} is already registered",
                record.lobby_channel_id
            )));
        }
        records.push(record);
        self.write(records).await
    }

    /// Add or replace a spawned-room entry on the record owning `lobby_id`.
    pub async fn upsert_spawned_room(&self, lobby_id: &str, entry: SpawnedRoom) -> Result<ChannelGroup> {
        self.modify(lobby_id, |record| {
            match record
                .spawned_rooms
                .iter_mut()
                .find(|r| r.channel_id == entry.channel_id)
            {
                Some(existing) => *existing = entry,
                None => record.spawned_rooms.push(entry),
            }
        })
        .await
    }

    /// Drop the spawned-room entry for `channel_id`. Returns the removed entry,
    /// or `None` if the record no longer listed it.
    pub async fn remove_spawned_room(
        &self,
        lobby_id: &str,
        channel_id: &str,
    ) -> Result<Option<SpawnedRoom>> {
        let mut removed = None;
        self.modify(lobby_id, |record| {
            if let Some(pos) = record
                .spawned_rooms
                .iter()
                .position(|r| r.channel_id == channel_id)
            {
                removed = Some(record.spawned_rooms.remove(pos));
            }
        })
        .await?;
        Ok(removed)
    }

    /// Remove the record for `lobby_id`. The filtered list replaces the stored one.
    pub async fn remove_record(&self, lobby_id: &str) -> Result<ChannelGroup> {
        let records = self.records().await?;
        let (removed, kept): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.is_lobby(lobby_id));
        let removed = removed.into_iter().next().ok_or_else(|| missing(lobby_id))?;
        self.write(kept).await?;
        Ok(removed)
    }

    async fn modify<F>(&self, lobby_id: &str, f: F) -> Result<ChannelGroup>
    where
        F: FnOnce(&mut ChannelGroup),
    {
        let mut records = self.records().await?;
        let record = records
            .iter_mut()
            .find(|r| r.is_lobby(lobby_id))
            .ok_or_else(|| missing(lobby_id))?;
        f(record);
        let updated = record.clone();
        self.write(records).await?;
        Ok(updated)
    }

    async fn write(&self, records: Vec<ChannelGroup>) -> Result<()> {
        self.registry.store.set(&self.workspace_id, records).await?;
        Ok(())
    }
}

fn missing(lobby_id: &str) -> FlexError {
    FlexError::RegistryInconsistency(format!("no record for lobby {lobby_id}"))
}
