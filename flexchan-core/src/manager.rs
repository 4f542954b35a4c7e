//! Flexible-channel lifecycle manager.
//!
//! Turns membership changes into spawn, refresh and reclaim actions, and
//! owns the administrative create/delete operations that establish a record
//! in the first place. Every mutation runs inside the workspace's
//! [`WorkspaceTxn`], held across the remote calls it depends on, so child
//! counts used for naming and the persisted list cannot drift between the
//! read and the write.
//!
//! Live references are never cached: each operation that needs the lobby or
//! grouping re-fetches them through [`LifecycleManager::resolve`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::announce;
use crate::error::{FlexError, Result};
use crate::event::MembershipChange;
use crate::platform::{LiveGroup, LiveRoom, Messenger, Platform, PlatformError};
use crate::record::{ChannelGroup, GroupOptions, SpawnedRoom};
use crate::registry::{Lookup, Registry, WorkspaceTxn};
use crate::store::RegistryStore;

/// Prefix for lobby room names; the group name follows it.
pub const DEFAULT_LOBBY_PREFIX: &str = "Join to create - ";

/// Largest per-room capacity and spawn cap a group may be created with. Voice
/// rooms cannot be limited beyond this.
pub const MAX_LIMIT: u32 = 99;

/// What handling one notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A new room was created and the member relocated into it.
    Spawned { lobby: String, room: String },
    /// A spawned room's occupancy changed; `updated` is false when there was
    /// no announcement to edit.
    Refreshed { room: String, updated: bool },
    /// An empty spawned room was deleted and dropped from the registry.
    Reclaimed { room: String, announcement_closed: bool },
    /// A tracked room had already vanished; its entry was dropped.
    Pruned { room: String },
    /// `max_spawned` rooms are live; the member stays in the lobby.
    SpawnCapped { lobby: String },
}

/// Fresh live handles for a record.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub lobby: LiveRoom,
    pub group: LiveGroup,
}

/// Outcome of a startup sweep over one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub reclaimed: usize,
    pub pruned: usize,
    pub refreshed: usize,
    /// Records whose lobby or grouping could not be resolved.
    pub stale: usize,
    /// Live rooms left alone because their occupancy is not known yet.
    #[serde(default)]
    pub deferred: usize,
}

pub struct LifecycleManager {
    registry: Registry,
    platform: Arc<dyn Platform>,
    messenger: Arc<dyn Messenger>,
    lobby_prefix: String,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        platform: Arc<dyn Platform>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            registry: Registry::new(store),
            platform,
            messenger,
            lobby_prefix: DEFAULT_LOBBY_PREFIX.to_string(),
        }
    }

    pub fn with_lobby_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lobby_prefix = prefix.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ── Administrative operations ──────────────────────────────────────

    /// Allocate a grouping and its lobby, then register an empty record.
    pub async fn create_group(&self, workspace_id: &str, options: GroupOptions) -> Result<ChannelGroup> {
        let name = options.name.trim().to_string();
        if name.is_empty() {
            return Err(FlexError::InvalidRequest("group name must not be empty".into()));
        }
        for (field, limit) in [("capacity", options.capacity), ("maxSpawned", options.max_spawned)] {
            if limit.is_some_and(|n| n > MAX_LIMIT) {
                return Err(FlexError::InvalidRequest(format!("{field} must be at most {MAX_LIMIT}")));
            }
        }
        // A zero limit means "unlimited" on the platform side.
        let options = GroupOptions {
            name: name.clone(),
            capacity: options.capacity.filter(|c| *c > 0),
            max_spawned: options.max_spawned.filter(|m| *m > 0),
            announcement_target_id: options.announcement_target_id,
        };

        let txn = self.registry.lock(workspace_id).await;
        let group_id = self.platform.create_group(workspace_id, &name).await?;
        let lobby_name = format!("{}{name}", self.lobby_prefix);
        let lobby_id = match self
            .platform
            .create_room(workspace_id, &group_id, &lobby_name, None)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = self.platform.delete_group(&group_id).await {
                    tracing::warn!(group = %group_id, error = %cleanup, "Could not remove half-created grouping");
                }
                return Err(e.into());
            }
        };

        let record = ChannelGroup::new(workspace_id, group_id, lobby_id, options);
        txn.insert_record(record.clone()).await?;
        tracing::info!(
            workspace = %workspace_id,
            group = %record.group_id,
            lobby = %record.lobby_channel_id,
            name = %record.name,
            "Created flexible channel group"
        );
        Ok(record)
    }

    /// Tear down a group and forget its record. `Ok(None)` if `lobby_id` is
    /// not a managed lobby.
    pub async fn delete_group(&self, workspace_id: &str, lobby_id: &str) -> Result<Option<ChannelGroup>> {
        let txn = self.registry.lock(workspace_id).await;
        let Some(record) = txn.find(Lookup::LobbyRoom(lobby_id)).await? else {
            return Ok(None);
        };
        let resolved = self.resolve(&record).await?;

        for entry in &record.spawned_rooms {
            ignore_not_found(self.platform.delete_room(&entry.channel_id).await)?;
            announce::close(self.messenger.as_ref(), &record, &entry.channel_id).await;
        }
        self.platform.delete_room(&resolved.lobby.id).await?;
        self.platform.delete_group(&resolved.group.id).await?;

        let removed = txn.remove_record(lobby_id).await?;
        tracing::info!(
            workspace = %workspace_id,
            group = %removed.group_id,
            name = %removed.name,
            "Deleted flexible channel group"
        );
        Ok(Some(removed))
    }

    /// Re-fetch the lobby and grouping behind a record.
    pub async fn resolve(&self, record: &ChannelGroup) -> Result<Resolved> {
        let group = self
            .platform
            .fetch_group(&record.group_id)
            .await?
            .ok_or_else(|| {
                FlexError::StaleReference(format!(
                    "grouping {} of {:?} no longer exists",
                    record.group_id, record.name
                ))
            })?;
        let lobby = self
            .platform
            .fetch_room(&record.lobby_channel_id)
            .await?
            .ok_or_else(|| {
                FlexError::StaleReference(format!(
                    "lobby {} of {:?} no longer exists",
                    record.lobby_channel_id, record.name
                ))
            })?;
        if lobby.group_id.as_deref() != Some(record.group_id.as_str()) {
            return Err(FlexError::StaleReference(format!(
                "lobby {} is no longer inside grouping {}",
                lobby.id, record.group_id
            )));
        }
        Ok(Resolved { lobby, group })
    }

    // ── Membership changes ─────────────────────────────────────────────

    /// Handle one membership change. The join leg runs before the leave leg;
    /// both run even if the first fails, and the first failure is returned.
    pub async fn on_member_moved(&self, change: &MembershipChange) -> Result<Vec<Action>> {
        if change.is_noop() {
            return Ok(Vec::new());
        }
        let txn = self.registry.lock(&change.workspace_id).await;
        if txn.records().await?.is_empty() {
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        let joined = match &change.new_room {
            Some(room) => self.on_join(&txn, &change.member_id, room).await,
            None => Ok(None),
        };
        let left = match &change.previous_room {
            Some(room) => self.on_leave(&txn, room).await,
            None => Ok(None),
        };

        let mut first_err = None;
        for leg in [joined, left] {
            match leg {
                Ok(Some(action)) => actions.push(action),
                Ok(None) => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(actions),
        }
    }

    async fn on_join(&self, txn: &WorkspaceTxn<'_>, member_id: &str, room_id: &str) -> Result<Option<Action>> {
        if let Some(record) = txn.find(Lookup::LobbyRoom(room_id)).await? {
            return self.spawn(txn, &record, member_id).await.map(Some);
        }
        let Some(record) = self.owning_record(txn, room_id).await? else {
            return Ok(None);
        };
        let updated = self.refresh_room(txn.workspace_id(), &record, room_id).await;
        Ok(Some(Action::Refreshed {
            room: room_id.to_string(),
            updated,
        }))
    }

    async fn on_leave(&self, txn: &WorkspaceTxn<'_>, room_id: &str) -> Result<Option<Action>> {
        let Some(room) = self.platform.fetch_room(room_id).await? else {
            // Gone already: drop the entry if we were still tracking it.
            let records = txn.records().await?;
            let Some(record) = records.iter().find(|r| r.spawned(room_id).is_some()) else {
                return Ok(None);
            };
            announce::close(self.messenger.as_ref(), record, room_id).await;
            txn.remove_spawned_room(&record.lobby_channel_id, room_id).await?;
            tracing::info!(room = %room_id, group = %record.group_id, "Pruned vanished room");
            return Ok(Some(Action::Pruned {
                room: room_id.to_string(),
            }));
        };
        let Some(group_id) = room.group_id.as_deref() else {
            return Ok(None);
        };
        let Some(record) = txn.find(Lookup::Group(group_id)).await? else {
            return Ok(None);
        };
        if record.is_lobby(room_id) || record.spawned(room_id).is_none() {
            return Ok(None);
        }

        match self.platform.room_occupants(txn.workspace_id(), room_id).await {
            Ok(0) => return self.reclaim(txn, &record, room_id).await.map(Some),
            Ok(_) => {}
            Err(PlatformError::OccupancyUnknown(_)) => {
                // Not provably empty; the sweep after seeding decides.
                tracing::debug!(room = %room_id, "Occupancy unknown; room kept");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        let updated = self.refresh_room(txn.workspace_id(), &record, room_id).await;
        Ok(Some(Action::Refreshed {
            room: room_id.to_string(),
            updated,
        }))
    }

    async fn spawn(&self, txn: &WorkspaceTxn<'_>, record: &ChannelGroup, member_id: &str) -> Result<Action> {
        let workspace_id = txn.workspace_id();
        if !record.has_spawn_capacity() {
            tracing::info!(
                workspace = %workspace_id,
                lobby = %record.lobby_channel_id,
                max = ?record.max_spawned,
                "Spawn limit reached; member stays in lobby"
            );
            return Ok(Action::SpawnCapped {
                lobby: record.lobby_channel_id.clone(),
            });
        }

        let resolved = self.resolve(record).await?;
        let name = format!("{}-{}", record.name, resolved.group.children.len());
        let room_id = self
            .platform
            .create_room(workspace_id, &record.group_id, &name, record.capacity)
            .await?;

        if let Err(e) = self.platform.move_member(workspace_id, member_id, &room_id).await {
            if let Err(cleanup) = self.platform.delete_room(&room_id).await {
                tracing::warn!(room = %room_id, error = %cleanup, "Could not remove unused room");
            }
            return Err(e.into());
        }

        let announcement_message_id =
            announce::post_recruiting(self.messenger.as_ref(), record, &room_id).await;
        txn.upsert_spawned_room(
            &record.lobby_channel_id,
            SpawnedRoom {
                channel_id: room_id.clone(),
                announcement_message_id,
            },
        )
        .await?;

        tracing::info!(
            workspace = %workspace_id,
            member = %member_id,
            room = %room_id,
            name = %name,
            "Spawned room"
        );
        Ok(Action::Spawned {
            lobby: record.lobby_channel_id.clone(),
            room: room_id,
        })
    }

    async fn reclaim(&self, txn: &WorkspaceTxn<'_>, record: &ChannelGroup, room_id: &str) -> Result<Action> {
        ignore_not_found(self.platform.delete_room(room_id).await)?;
        let announcement_closed = announce::close(self.messenger.as_ref(), record, room_id).await;
        txn.remove_spawned_room(&record.lobby_channel_id, room_id).await?;
        tracing::info!(
            workspace = %txn.workspace_id(),
            room = %room_id,
            group = %record.group_id,
            "Reclaimed empty room"
        );
        Ok(Action::Reclaimed {
            room: room_id.to_string(),
            announcement_closed,
        })
    }

    /// Record whose grouping holds `room_id`, if any.
    async fn owning_record(&self, txn: &WorkspaceTxn<'_>, room_id: &str) -> Result<Option<ChannelGroup>> {
        let Some(room) = self.platform.fetch_room(room_id).await? else {
            return Ok(None);
        };
        match room.group_id.as_deref() {
            Some(group_id) => txn.find(Lookup::Group(group_id)).await,
            None => Ok(None),
        }
    }

    /// Refresh a room's announcement. Any failure only means "not updated".
    async fn refresh_room(&self, workspace_id: &str, record: &ChannelGroup, room_id: &str) -> bool {
        if !announce::has_announcement(record, room_id) {
            return false;
        }
        match self.platform.room_occupants(workspace_id, room_id).await {
            Ok(occupants) => announce::refresh(self.messenger.as_ref(), record, room_id, occupants).await,
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "Could not count occupants");
                false
            }
        }
    }

    // ── Startup reconciliation ─────────────────────────────────────────

    /// Sweep one workspace after downtime: reclaim rooms that emptied or
    /// vanished while no events were seen, and refresh the rest. Rooms whose
    /// occupancy is unknown are only counted as deferred.
    pub async fn reconcile(&self, workspace_id: &str) -> Result<ReconcileReport> {
        let txn = self.registry.lock(workspace_id).await;
        let mut report = ReconcileReport::default();

        for record in txn.records().await? {
            if let Err(e) = self.resolve(&record).await {
                tracing::warn!(workspace = %workspace_id, name = %record.name, error = %e, "Skipping unresolvable group");
                report.stale += 1;
                continue;
            }
            for entry in &record.spawned_rooms {
                let room_id = entry.channel_id.as_str();
                if self.platform.fetch_room(room_id).await?.is_none() {
                    announce::close(self.messenger.as_ref(), &record, room_id).await;
                    txn.remove_spawned_room(&record.lobby_channel_id, room_id).await?;
                    report.pruned += 1;
                    continue;
                }
                match self.platform.room_occupants(workspace_id, room_id).await {
                    Ok(0) => {
                        self.reclaim(&txn, &record, room_id).await?;
                        report.reclaimed += 1;
                    }
                    Ok(_) => {
                        if self.refresh_room(workspace_id, &record, room_id).await {
                            report.refreshed += 1;
                        }
                    }
                    Err(PlatformError::OccupancyUnknown(_)) => report.deferred += 1,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tracing::info!(workspace = %workspace_id, ?report, "Reconciled workspace");
        Ok(report)
    }
}

fn ignore_not_found(result: std::result::Result<(), PlatformError>) -> Result<()> {
    match result {
        Ok(()) | Err(PlatformError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
