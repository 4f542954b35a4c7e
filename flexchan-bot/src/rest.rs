//! REST adapter for a Discord-style v10 API.
//!
//! Implements [`Platform`] and [`Messenger`]. Groupings are category channels
//! (type 4) and rooms are voice channels (type 2). Occupancy comes from the
//! local [`VoiceStates`] view since the REST surface cannot report it, and is
//! reported as unknown until that view has been seeded for the workspace.

use std::sync::Arc;

use async_trait::async_trait;
use flexchan_core::announce::Announcement;
use flexchan_core::platform::{LiveGroup, LiveRoom, Messenger, Platform, PlatformError};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::voice::VoiceStates;

const CHANNEL_VOICE: u8 = 2;
const CHANNEL_CATEGORY: u8 = 4;

/// Channel object, reduced to the fields the bot reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelObject {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct RestPlatform {
    http: reqwest::Client,
    api_base: String,
    token: String,
    voice: Arc<VoiceStates>,
}

impl RestPlatform {
    pub fn new(api_base: &str, token: String, voice: Arc<VoiceStates>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            voice,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_base))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, PlatformError> {
        let resp = req
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), &body))
    }

    async fn create_channel(&self, workspace_id: &str, body: Value) -> Result<String, PlatformError> {
        let resp = self
            .send(self.request(Method::POST, &format!("/guilds/{workspace_id}/channels")).json(&body))
            .await?;
        let created: Created = decode(resp).await?;
        Ok(created.id)
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), PlatformError> {
        self.send(self.request(Method::DELETE, &format!("/channels/{channel_id}")))
            .await?;
        Ok(())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelObject>, PlatformError> {
        match self
            .send(self.request(Method::GET, &format!("/channels/{channel_id}")))
            .await
        {
            Ok(resp) => decode(resp).await.map(Some),
            Err(PlatformError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, PlatformError> {
    resp.json()
        .await
        .map_err(|e| PlatformError::Transport(format!("bad response body: {e}")))
}

/// Map a non-2xx response to a platform error.
pub fn status_error(status: u16, body: &str) -> PlatformError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        404 => PlatformError::NotFound(message),
        _ => PlatformError::Rejected { status, message },
    }
}

pub fn category_body(name: &str) -> Value {
    json!({ "name": name, "type": CHANNEL_CATEGORY })
}

/// Voice channel inside `parent_id`. No `user_limit` means unlimited.
pub fn voice_body(name: &str, parent_id: &str, capacity: Option<u32>) -> Value {
    let mut body = json!({ "name": name, "type": CHANNEL_VOICE, "parent_id": parent_id });
    if let Some(limit) = capacity {
        body["user_limit"] = json!(limit);
    }
    body
}

pub fn move_body(room_id: &str) -> Value {
    json!({ "channel_id": room_id })
}

/// One message with a single embed.
pub fn message_body(announcement: &Announcement) -> Value {
    let mut embed = json!({
        "title": announcement.title(),
        "color": announcement.color(),
    });
    if let Some(label) = announcement.occupancy_label() {
        embed["fields"] = json!([
            { "name": "Room", "value": format!("<#{}>", announcement.room_id), "inline": true },
            { "name": "Members", "value": label, "inline": true },
        ]);
    }
    json!({ "content": announcement.content(), "embeds": [embed] })
}

/// Ids of the channels sitting directly under `group_id`.
pub fn children_of(group_id: &str, channels: &[ChannelObject]) -> Vec<String> {
    channels
        .iter()
        .filter(|c| c.parent_id.as_deref() == Some(group_id))
        .map(|c| c.id.clone())
        .collect()
}

#[async_trait]
impl Platform for RestPlatform {
    async fn create_group(&self, workspace_id: &str, name: &str) -> Result<String, PlatformError> {
        self.create_channel(workspace_id, category_body(name)).await
    }

    async fn create_room(
        &self,
        workspace_id: &str,
        group_id: &str,
        name: &str,
        capacity: Option<u32>,
    ) -> Result<String, PlatformError> {
        self.create_channel(workspace_id, voice_body(name, group_id, capacity))
            .await
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), PlatformError> {
        let result = self.delete_channel(room_id).await;
        if matches!(result, Ok(()) | Err(PlatformError::NotFound(_))) {
            self.voice.forget_room(room_id);
        }
        result
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), PlatformError> {
        self.delete_channel(group_id).await
    }

    async fn move_member(
        &self,
        workspace_id: &str,
        member_id: &str,
        room_id: &str,
    ) -> Result<(), PlatformError> {
        self.send(
            self.request(Method::PATCH, &format!("/guilds/{workspace_id}/members/{member_id}"))
                .json(&move_body(room_id)),
        )
        .await?;
        self.voice.moved(workspace_id, member_id, room_id);
        Ok(())
    }

    async fn fetch_room(&self, room_id: &str) -> Result<Option<LiveRoom>, PlatformError> {
        Ok(self.get_channel(room_id).await?.map(|c| LiveRoom {
            name: c.name.unwrap_or_default(),
            group_id: c.parent_id,
            id: c.id,
        }))
    }

    async fn fetch_group(&self, group_id: &str) -> Result<Option<LiveGroup>, PlatformError> {
        let Some(group) = self.get_channel(group_id).await? else {
            return Ok(None);
        };
        if group.kind != CHANNEL_CATEGORY {
            return Ok(None);
        }
        let Some(workspace_id) = group.guild_id.as_deref() else {
            return Err(PlatformError::Transport(format!("channel {group_id} has no guild")));
        };
        let resp = self
            .send(self.request(Method::GET, &format!("/guilds/{workspace_id}/channels")))
            .await?;
        let channels: Vec<ChannelObject> = decode(resp).await?;
        Ok(Some(LiveGroup {
            children: children_of(group_id, &channels),
            name: group.name.unwrap_or_default(),
            id: group.id,
        }))
    }

    async fn room_occupants(&self, workspace_id: &str, room_id: &str) -> Result<u32, PlatformError> {
        self.voice.occupants(workspace_id, room_id).ok_or_else(|| {
            PlatformError::OccupancyUnknown(format!("no voice snapshot for {workspace_id} yet"))
        })
    }
}

#[async_trait]
impl Messenger for RestPlatform {
    async fn send_message(
        &self,
        destination_id: &str,
        announcement: &Announcement,
    ) -> Result<String, PlatformError> {
        let resp = self
            .send(
                self.request(Method::POST, &format!("/channels/{destination_id}/messages"))
                    .json(&message_body(announcement)),
            )
            .await?;
        let created: Created = decode(resp).await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        destination_id: &str,
        message_id: &str,
        announcement: &Announcement,
    ) -> Result<(), PlatformError> {
        let req = self
            .request(
                Method::PATCH,
                &format!("/channels/{destination_id}/messages/{message_id}"),
            )
            .json(&message_body(announcement));
        match self.send(req).await {
            Ok(_) => Ok(()),
            Err(PlatformError::Rejected { status: 403, .. }) => {
                Err(PlatformError::NotEditable(message_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
