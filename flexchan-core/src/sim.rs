//! In-process platform double.
//!
//! Implements [`Platform`] and [`Messenger`] over plain maps so the lifecycle
//! can be driven end to end without a network. Member moves performed by the
//! manager queue the follow-up notification a real platform would emit; tests
//! drain them with [`SimPlatform::drain_followups`].

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::announce::Announcement;
use crate::event::MembershipChange;
use crate::platform::{LiveGroup, LiveRoom, Messenger, Platform, PlatformError};

#[derive(Debug, Clone)]
struct SimRoom {
    workspace_id: String,
    name: String,
    group_id: Option<String>,
    capacity: Option<u32>,
}

#[derive(Debug, Clone)]
struct SimGroup {
    name: String,
}

/// A message posted through the simulated messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimMessage {
    pub destination_id: String,
    pub announcement: Announcement,
    pub edits: u32,
    pub editable: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    workspaces: HashSet<String>,
    groups: BTreeMap<String, SimGroup>,
    rooms: BTreeMap<String, SimRoom>,
    text_channels: HashSet<String>,
    /// (workspace, member) → room.
    presence: HashMap<(String, String), String>,
    messages: BTreeMap<String, SimMessage>,
    followups: Vec<MembershipChange>,
    fail_moves: bool,
    /// Workspaces whose occupancy is reported as unknown.
    blind: HashSet<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn occupants(&self, room_id: &str) -> u32 {
        self.presence.values().filter(|r| r.as_str() == room_id).count() as u32
    }
}

#[derive(Default)]
pub struct SimPlatform {
    state: Mutex<State>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_workspace(&self, workspace_id: &str) {
        self.state.lock().workspaces.insert(workspace_id.to_string());
    }

    /// Create a text destination for announcements.
    pub fn add_text_channel(&self) -> String {
        let mut state = self.state.lock();
        let id = state.id("text");
        state.text_channels.insert(id.clone());
        id
    }

    /// Put `member` into `room_id` the way a user would, returning the
    /// notification the platform emits.
    pub fn connect(&self, workspace_id: &str, member_id: &str, room_id: &str) -> MembershipChange {
        let previous = self
            .state
            .lock()
            .presence
            .insert((workspace_id.to_string(), member_id.to_string()), room_id.to_string());
        MembershipChange {
            workspace_id: workspace_id.to_string(),
            member_id: member_id.to_string(),
            previous_room: previous,
            new_room: Some(room_id.to_string()),
        }
    }

    /// Disconnect `member` from whatever room they are in.
    pub fn disconnect(&self, workspace_id: &str, member_id: &str) -> MembershipChange {
        let previous = self
            .state
            .lock()
            .presence
            .remove(&(workspace_id.to_string(), member_id.to_string()));
        MembershipChange {
            workspace_id: workspace_id.to_string(),
            member_id: member_id.to_string(),
            previous_room: previous,
            new_room: None,
        }
    }

    pub fn drain_followups(&self) -> Vec<MembershipChange> {
        std::mem::take(&mut self.state.lock().followups)
    }

    pub fn member_room(&self, workspace_id: &str, member_id: &str) -> Option<String> {
        self.state
            .lock()
            .presence
            .get(&(workspace_id.to_string(), member_id.to_string()))
            .cloned()
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.state.lock().rooms.contains_key(room_id)
    }

    pub fn group_exists(&self, group_id: &str) -> bool {
        self.state.lock().groups.contains_key(group_id)
    }

    pub fn room_name(&self, room_id: &str) -> Option<String> {
        self.state.lock().rooms.get(room_id).map(|r| r.name.clone())
    }

    pub fn room_capacity(&self, room_id: &str) -> Option<u32> {
        self.state.lock().rooms.get(room_id).and_then(|r| r.capacity)
    }

    /// Names of every room inside `group_id`, sorted.
    pub fn room_names_in(&self, group_id: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .rooms
            .values()
            .filter(|r| r.group_id.as_deref() == Some(group_id))
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn message(&self, message_id: &str) -> Option<SimMessage> {
        self.state.lock().messages.get(message_id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Simulate a moderator deleting a room by hand.
    pub fn remove_room_out_of_band(&self, room_id: &str) {
        let mut state = self.state.lock();
        state.rooms.remove(room_id);
        state.presence.retain(|_, r| r != room_id);
    }

    pub fn remove_group_out_of_band(&self, group_id: &str) {
        self.state.lock().groups.remove(group_id);
    }

    pub fn lock_message(&self, message_id: &str) {
        if let Some(m) = self.state.lock().messages.get_mut(message_id) {
            m.editable = false;
        }
    }

    /// Report occupancy in `workspace_id` as unknown, like a freshly started
    /// bot that has not seen the workspace's voice states yet.
    pub fn blind_occupancy(&self, workspace_id: &str, blind: bool) {
        let mut state = self.state.lock();
        if blind {
            state.blind.insert(workspace_id.to_string());
        } else {
            state.blind.remove(workspace_id);
        }
    }

    /// Make every subsequent `move_member` fail.
    pub fn fail_moves(&self, fail: bool) {
        self.state.lock().fail_moves = fail;
    }
}

#[async_trait]
impl Platform for SimPlatform {
    async fn create_group(&self, workspace_id: &str, name: &str) -> Result<String, PlatformError> {
        let mut state = self.state.lock();
        if !state.workspaces.contains(workspace_id) {
            return Err(PlatformError::NotFound(format!("workspace {workspace_id}")));
        }
        let id = state.id("group");
        state.groups.insert(id.clone(), SimGroup { name: name.to_string() });
        Ok(id)
    }

    async fn create_room(
        &self,
        workspace_id: &str,
        group_id: &str,
        name: &str,
        capacity: Option<u32>,
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock();
        if !state.groups.contains_key(group_id) {
            return Err(PlatformError::NotFound(format!("group {group_id}")));
        }
        let id = state.id("room");
        state.rooms.insert(
            id.clone(),
            SimRoom {
                workspace_id: workspace_id.to_string(),
                name: name.to_string(),
                group_id: Some(group_id.to_string()),
                capacity,
            },
        );
        Ok(id)
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.rooms.remove(room_id).is_none() {
            return Err(PlatformError::NotFound(format!("room {room_id}")));
        }
        state.presence.retain(|_, r| r != room_id);
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.groups.remove(group_id).is_none() {
            return Err(PlatformError::NotFound(format!("group {group_id}")));
        }
        // Children survive their grouping, detached.
        for room in state.rooms.values_mut() {
            if room.group_id.as_deref() == Some(group_id) {
                room.group_id = None;
            }
        }
        Ok(())
    }

    async fn move_member(
        &self,
        workspace_id: &str,
        member_id: &str,
        room_id: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.fail_moves {
            return Err(PlatformError::Rejected {
                status: 400,
                message: "member is not connected".into(),
            });
        }
        match state.rooms.get(room_id) {
            Some(room) if room.workspace_id == workspace_id => {}
            _ => return Err(PlatformError::NotFound(format!("room {room_id}"))),
        }
        let key = (workspace_id.to_string(), member_id.to_string());
        let Some(previous) = state.presence.insert(key.clone(), room_id.to_string()) else {
            state.presence.remove(&key);
            return Err(PlatformError::NotFound(format!("member {member_id} is not connected")));
        };
        state.followups.push(MembershipChange::moved(workspace_id, member_id, &previous, room_id));
        Ok(())
    }

    async fn fetch_room(&self, room_id: &str) -> Result<Option<LiveRoom>, PlatformError> {
        Ok(self.state.lock().rooms.get(room_id).map(|r| LiveRoom {
            id: room_id.to_string(),
            name: r.name.clone(),
            group_id: r.group_id.clone(),
        }))
    }

    async fn fetch_group(&self, group_id: &str) -> Result<Option<LiveGroup>, PlatformError> {
        let state = self.state.lock();
        Ok(state.groups.get(group_id).map(|g| LiveGroup {
            id: group_id.to_string(),
            name: g.name.clone(),
            children: state
                .rooms
                .iter()
                .filter(|(_, r)| r.group_id.as_deref() == Some(group_id))
                .map(|(id, _)| id.clone())
                .collect(),
        }))
    }

    async fn room_occupants(&self, workspace_id: &str, room_id: &str) -> Result<u32, PlatformError> {
        let state = self.state.lock();
        if !state.rooms.contains_key(room_id) {
            return Err(PlatformError::NotFound(format!("room {room_id}")));
        }
        if state.blind.contains(workspace_id) {
            return Err(PlatformError::OccupancyUnknown(format!("workspace {workspace_id}")));
        }
        Ok(state.occupants(room_id))
    }
}

#[async_trait]
impl Messenger for SimPlatform {
    async fn send_message(
        &self,
        destination_id: &str,
        announcement: &Announcement,
    ) -> Result<String, PlatformError> {
        let mut state = self.state.lock();
        if !state.text_channels.contains(destination_id) {
            return Err(PlatformError::NotFound(format!("destination {destination_id}")));
        }
        let id = state.id("msg");
        state.messages.insert(
            id.clone(),
            SimMessage {
                destination_id: destination_id.to_string(),
                announcement: announcement.clone(),
                edits: 0,
                editable: true,
            },
        );
        Ok(id)
    }

    async fn edit_message(
        &self,
        destination_id: &str,
        message_id: &str,
        announcement: &Announcement,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(message_id)
            .filter(|m| m.destination_id == destination_id)
            .ok_or_else(|| PlatformError::NotFound(format!("message {message_id}")))?;
        if !message.editable {
            return Err(PlatformError::NotEditable(message_id.to_string()));
        }
        message.announcement = announcement.clone();
        message.edits += 1;
        Ok(())
    }
}
