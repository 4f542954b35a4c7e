//! Voice presence tracker.
//!
//! The REST API has no endpoint for "who is in this voice channel", so the
//! bot keeps its own view, fed by every relayed voice-state update. A
//! workspace's counts are only trusted once a full snapshot of its voice
//! states has been seeded; before that, members who were already connected
//! when the bot started are invisible and a room may look empty when it is
//! not.

use std::collections::{HashMap, HashSet};

use flexchan_core::MembershipChange;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One connected member, as listed in a workspace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVoice {
    pub member_id: String,
    pub room_id: String,
}

#[derive(Default)]
struct Presence {
    /// (workspace, member) → room.
    rooms: HashMap<(String, String), String>,
    seeded: HashSet<String>,
}

#[derive(Default)]
pub struct VoiceStates {
    inner: Mutex<Presence>,
}

impl VoiceStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `workspace_id` with a full snapshot and
    /// start trusting its counts.
    pub fn seed(&self, workspace_id: &str, members: &[MemberVoice]) {
        let mut inner = self.inner.lock();
        inner.rooms.retain(|(ws, _), _| ws != workspace_id);
        for m in members {
            inner
                .rooms
                .insert((workspace_id.to_string(), m.member_id.clone()), m.room_id.clone());
        }
        inner.seeded.insert(workspace_id.to_string());
    }

    pub fn is_seeded(&self, workspace_id: &str) -> bool {
        self.inner.lock().seeded.contains(workspace_id)
    }

    /// Fold one membership change into the presence map. Applying the same
    /// change twice is harmless.
    pub fn apply(&self, change: &MembershipChange) {
        let key = (change.workspace_id.clone(), change.member_id.clone());
        let mut inner = self.inner.lock();
        match &change.new_room {
            Some(room) => {
                inner.rooms.insert(key, room.clone());
            }
            None => {
                inner.rooms.remove(&key);
            }
        }
    }

    /// Record a move the bot performed itself, ahead of the gateway echo.
    pub fn moved(&self, workspace_id: &str, member_id: &str, room_id: &str) {
        self.inner
            .lock()
            .rooms
            .insert((workspace_id.to_string(), member_id.to_string()), room_id.to_string());
    }

    /// Drop everyone in a room that no longer exists.
    pub fn forget_room(&self, room_id: &str) {
        self.inner.lock().rooms.retain(|_, r| r != room_id);
    }

    /// Members in `room_id`, or `None` while the workspace is unseeded.
    pub fn occupants(&self, workspace_id: &str, room_id: &str) -> Option<u32> {
        let inner = self.inner.lock();
        if !inner.seeded.contains(workspace_id) {
            return None;
        }
        let count = inner
            .rooms
            .iter()
            .filter(|((ws, _), r)| ws == workspace_id && r.as_str() == room_id)
            .count();
        Some(count as u32)
    }

    pub fn room_of(&self, workspace_id: &str, member_id: &str) -> Option<String> {
        self.inner
            .lock()
            .rooms
            .get(&(workspace_id.to_string(), member_id.to_string()))
            .cloned()
    }
}
