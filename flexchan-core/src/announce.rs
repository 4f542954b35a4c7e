//! Recruitment announcements mirroring spawned-room occupancy.
//!
//! Each spawned room gets at most one announcement, posted when the room is
//! spawned, edited on every occupancy change and finally edited to a closed
//! state when the room is reclaimed. Announcements are never deleted.
//!
//! None of these calls fail the surrounding lifecycle action: a missing
//! destination, message or edit permission is logged and reported as "not
//! updated".

use crate::platform::{Messenger, PlatformError};
use crate::record::ChannelGroup;

const COLOR_RECRUITING: u32 = 0x00ff44;
const COLOR_FULL: u32 = 0xff0000;
const COLOR_CLOSED: u32 = 0x444444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecruitState {
    /// Open seats remain. `None` means unlimited.
    Recruiting { remaining: Option<u32> },
    Full,
    Closed,
}

/// Recruiting vs full for a live room.
pub fn occupancy_state(occupants: u32, capacity: Option<u32>) -> RecruitState {
    match capacity {
        Some(cap) if occupants >= cap => RecruitState::Full,
        Some(cap) => RecruitState::Recruiting {
            remaining: Some(cap - occupants),
        },
        None => RecruitState::Recruiting { remaining: None },
    }
}

/// Rendered state of one announcement. Messengers turn this into whatever
/// message shape their platform supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub group_name: String,
    pub room_id: String,
    pub occupants: u32,
    pub capacity: Option<u32>,
    pub state: RecruitState,
}

impl Announcement {
    pub fn for_occupancy(record: &ChannelGroup, room_id: &str, occupants: u32) -> Self {
        Self {
            group_name: record.name.clone(),
            room_id: room_id.to_string(),
            occupants,
            capacity: record.capacity,
            state: occupancy_state(occupants, record.capacity),
        }
    }

    pub fn closed(record: &ChannelGroup, room_id: &str) -> Self {
        Self {
            group_name: record.name.clone(),
            room_id: room_id.to_string(),
            occupants: 0,
            capacity: record.capacity,
            state: RecruitState::Closed,
        }
    }

    /// Plain-text line shown above the embed.
    pub fn content(&self) -> String {
        match self.state {
            RecruitState::Recruiting { remaining } => format!(
                "{} recruiting! (@{})",
                self.group_name,
                remaining.map_or_else(|| "∞".to_string(), |n| n.to_string())
            ),
            RecruitState::Full => format!("{} full", self.group_name),
            RecruitState::Closed => "Closed".to_string(),
        }
    }

    pub fn title(&self) -> String {
        match self.state {
            RecruitState::Recruiting { .. } => format!("Recruiting: {}", self.group_name),
            RecruitState::Full => format!("Full: {}", self.group_name),
            RecruitState::Closed => format!("Ended: {}", self.group_name),
        }
    }

    pub fn color(&self) -> u32 {
        match self.state {
            RecruitState::Recruiting { .. } => COLOR_RECRUITING,
            RecruitState::Full => COLOR_FULL,
            RecruitState::Closed => COLOR_CLOSED,
        }
    }

    /// `"<occupants> / <capacity|∞>"`. `None` once closed.
    pub fn occupancy_label(&self) -> Option<String> {
        if self.state == RecruitState::Closed {
            return None;
        }
        let cap = self
            .capacity
            .map_or_else(|| "∞".to_string(), |c| c.to_string());
        Some(format!("{} / {cap}", self.occupants))
    }
}

/// Post the first announcement for a freshly spawned room, which holds exactly
/// the member who triggered it. Returns the message id to store alongside the
/// spawned-room entry.
pub async fn post_recruiting(
    messenger: &dyn Messenger,
    record: &ChannelGroup,
    room_id: &str,
) -> Option<String> {
    let target = record.announcement_target_id.as_deref()?;
    let announcement = Announcement::for_occupancy(record, room_id, 1);
    match messenger.send_message(target, &announcement).await {
        Ok(message_id) => Some(message_id),
        Err(e) => {
            tracing::warn!(room = %room_id, target = %target, error = %e, "Could not post announcement");
            None
        }
    }
}

/// Rewrite a spawned room's announcement for its current occupancy.
pub async fn refresh(
    messenger: &dyn Messenger,
    record: &ChannelGroup,
    room_id: &str,
    occupants: u32,
) -> bool {
    let Some((target, message_id)) = stored_message(record, room_id) else {
        return false;
    };
    let announcement = Announcement::for_occupancy(record, room_id, occupants);
    edit(messenger, target, message_id, &announcement).await
}

/// Mark a reclaimed room's announcement as closed.
pub async fn close(messenger: &dyn Messenger, record: &ChannelGroup, room_id: &str) -> bool {
    let Some((target, message_id)) = stored_message(record, room_id) else {
        return false;
    };
    edit(messenger, target, message_id, &Announcement::closed(record, room_id)).await
}

/// Whether `room_id` has an announcement that refresh/close could edit.
pub fn has_announcement(record: &ChannelGroup, room_id: &str) -> bool {
    stored_message(record, room_id).is_some()
}

fn stored_message<'a>(record: &'a ChannelGroup, room_id: &str) -> Option<(&'a str, &'a str)> {
    let target = record.announcement_target_id.as_deref()?;
    let message_id = record.spawned(room_id)?.announcement_message_id.as_deref()?;
    Some((target, message_id))
}

async fn edit(
    messenger: &dyn Messenger,
    target: &str,
    message_id: &str,
    announcement: &Announcement,
) -> bool {
    match messenger.edit_message(target, message_id, announcement).await {
        Ok(()) => true,
        Err(PlatformError::NotFound(_) | PlatformError::NotEditable(_)) => {
            tracing::debug!(message = %message_id, "Announcement gone or not editable");
            false
        }
        Err(e) => {
            tracing::warn!(message = %message_id, error = %e, "Could not edit announcement");
            false
        }
    }
}
