//! Membership-change notifications consumed by the lifecycle manager.

use serde::{Deserialize, Serialize};

/// A member's room changed.
///
/// Joining sets only `new_room`, leaving sets only `previous_room`, and moving
/// between rooms sets both in a single notification. Delivery is
/// at-least-once with no ordering across rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub workspace_id: String,
    pub member_id: String,
    #[serde(default)]
    pub previous_room: Option<String>,
    #[serde(default)]
    pub new_room: Option<String>,
}

impl MembershipChange {
    pub fn joined(workspace_id: &str, member_id: &str, room: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            member_id: member_id.to_string(),
            previous_room: None,
            new_room: Some(room.to_string()),
        }
    }

    pub fn left(workspace_id: &str, member_id: &str, room: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            member_id: member_id.to_string(),
            previous_room: Some(room.to_string()),
            new_room: None,
        }
    }

    pub fn moved(workspace_id: &str, member_id: &str, from: &str, to: &str) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            member_id: member_id.to_string(),
            previous_room: Some(from.to_string()),
            new_room: Some(to.to_string()),
        }
    }

    /// Same room on both legs: a state change (mute, deafen) that did not
    /// move anybody.
    pub fn is_noop(&self) -> bool {
        self.previous_room == self.new_room
    }
}
