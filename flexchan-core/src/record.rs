//! Persisted channel-group records.
//!
//! One [`ChannelGroup`] exists per lobby. The record lists every spawned room
//! that is currently live, in spawn order. Field names are camelCase on the
//! wire so the stored payload stays readable from other tooling.

use serde::{Deserialize, Serialize};

/// A room created on demand next to the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedRoom {
    pub channel_id: String,
    /// Recruitment message mirroring this room's occupancy, if one was posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_message_id: Option<String>,
}

impl SpawnedRoom {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            announcement_message_id: None,
        }
    }
}

/// One lobby → spawned-rooms group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelGroup {
    /// Display label. Immutable after creation; spawned rooms are named after it.
    pub name: String,
    pub workspace_id: String,
    /// Grouping container holding the lobby and every spawned room.
    pub group_id: String,
    /// Entry-point room. Never appears in `spawned_rooms`.
    pub lobby_channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_target_id: Option<String>,
    /// Max occupants per spawned room. Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Max number of simultaneously live spawned rooms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spawned: Option<u32>,
    #[serde(default)]
    pub spawned_rooms: Vec<SpawnedRoom>,
}

impl ChannelGroup {
    /// Build a fresh record with no spawned rooms.
    pub fn new(
        workspace_id: &str,
        group_id: String,
        lobby_channel_id: String,
        options: GroupOptions,
    ) -> Self {
        Self {
            name: options.name,
            workspace_id: workspace_id.to_string(),
            group_id,
            lobby_channel_id,
            announcement_target_id: options.announcement_target_id,
            capacity: options.capacity,
            max_spawned: options.max_spawned,
            spawned_rooms: Vec::new(),
        }
    }

    pub fn is_lobby(&self, room_id: &str) -> bool {
        self.lobby_channel_id == room_id
    }

    pub fn owns_group(&self, group_id: &str) -> bool {
        self.group_id == group_id
    }

    /// The spawned-room entry for `room_id`, if this record tracks it.
    pub fn spawned(&self, room_id: &str) -> Option<&SpawnedRoom> {
        self.spawned_rooms.iter().find(|r| r.channel_id == room_id)
    }

    /// Whether another room may be spawned under `max_spawned`.
    pub fn has_spawn_capacity(&self) -> bool {
        match self.max_spawned {
            Some(max) => self.spawned_rooms.len() < max as usize,
            None => true,
        }
    }
}

/// A create request for a new channel group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOptions {
    pub name: String,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub max_spawned: Option<u32>,
    #[serde(default)]
    pub announcement_target_id: Option<String>,
}

impl GroupOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_max_spawned(mut self, max: u32) -> Self {
        self.max_spawned = Some(max);
        self
    }

    pub fn with_announcements(mut self, target_id: impl Into<String>) -> Self {
        self.announcement_target_id = Some(target_id.into());
        self
    }
}
