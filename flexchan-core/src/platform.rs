//! Remote platform collaborators.
//!
//! [`Platform`] covers rooms, groupings and member moves; [`Messenger`] covers
//! the text side used for recruitment announcements. Both are RPC-like: every
//! call may suspend, and nothing here retries or enforces timeouts.

use async_trait::async_trait;

use crate::announce::Announcement;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("message {0} is not editable")]
    NotEditable(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    /// The platform cannot currently tell who is in the room, e.g. before its
    /// presence view for the workspace has been seeded.
    #[error("occupancy unknown: {0}")]
    OccupancyUnknown(String),
}

/// A room as the platform currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRoom {
    pub id: String,
    pub name: String,
    /// Grouping container the room sits in, if any.
    pub group_id: Option<String>,
}

/// A grouping container and the rooms inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveGroup {
    pub id: String,
    pub name: String,
    pub children: Vec<String>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_group(&self, workspace_id: &str, name: &str) -> Result<String, PlatformError>;

    async fn create_room(
        &self,
        workspace_id: &str,
        group_id: &str,
        name: &str,
        capacity: Option<u32>,
    ) -> Result<String, PlatformError>;

    async fn delete_room(&self, room_id: &str) -> Result<(), PlatformError>;

    async fn delete_group(&self, group_id: &str) -> Result<(), PlatformError>;

    async fn move_member(
        &self,
        workspace_id: &str,
        member_id: &str,
        room_id: &str,
    ) -> Result<(), PlatformError>;

    /// `Ok(None)` when the room does not exist (any more).
    async fn fetch_room(&self, room_id: &str) -> Result<Option<LiveRoom>, PlatformError>;

    /// `Ok(None)` when the grouping does not exist (any more).
    async fn fetch_group(&self, group_id: &str) -> Result<Option<LiveGroup>, PlatformError>;

    async fn room_occupants(&self, workspace_id: &str, room_id: &str) -> Result<u32, PlatformError>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Post a new announcement, returning its message id.
    async fn send_message(
        &self,
        destination_id: &str,
        announcement: &Announcement,
    ) -> Result<String, PlatformError>;

    /// Rewrite an existing announcement in place.
    async fn edit_message(
        &self,
        destination_id: &str,
        message_id: &str,
        announcement: &Announcement,
    ) -> Result<(), PlatformError>;
}
