//! Gateway relay.
//!
//! A gateway sidecar holds the websocket session and forwards what the bot
//! needs over a plain TCP connection, one JSON object per line:
//!
//! ```text
//! {"type":"voice_snapshot","workspace_id":"W","members":[{"member_id":"U","room_id":"R"}]}
//! {"type":"voice_state","workspace_id":"W","member_id":"U","previous_room":null,"new_room":"L"}
//! {"type":"create","workspace_id":"W","group":{"name":"Lounge","capacity":5}}
//! {"type":"delete","workspace_id":"W","lobby_id":"L"}
//! ```
//!
//! Every line gets exactly one reply line: `{"ok":true,...}` or
//! `{"ok":false,"error":"..."}`. Voice states are acknowledged once queued;
//! their handling is asynchronous. Create and delete reply with the outcome.
//!
//! A snapshot lists every member connected to voice in a workspace (the
//! gateway has it from the guild's initial state). Until one arrives the
//! bot treats the workspace's room occupancy as unknown and never reclaims
//! there; once seeded, the workspace is swept and the report is returned.
//!
//! Lines longer than [`MAX_LINE_LEN`] are discarded with an error reply.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use flexchan_core::manager::ReconcileReport;
use flexchan_core::{ChannelGroup, GroupOptions, LifecycleManager, MembershipChange};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::voice::{MemberVoice, VoiceStates};

/// Longest accepted request line, newline excluded.
pub const MAX_LINE_LEN: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    VoiceSnapshot {
        workspace_id: String,
        #[serde(default)]
        members: Vec<MemberVoice>,
    },
    VoiceState(MembershipChange),
    Create {
        workspace_id: String,
        group: GroupOptions,
    },
    Delete {
        workspace_id: String,
        lobby_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<ChannelGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconcileReport>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            record: None,
            report: None,
        }
    }

    pub fn with_record(record: ChannelGroup) -> Self {
        Self {
            record: Some(record),
            ..Self::ok()
        }
    }

    pub fn error(cause: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(cause.into()),
            record: None,
            report: None,
        }
    }
}

pub struct Relay {
    manager: Arc<LifecycleManager>,
    voice: Arc<VoiceStates>,
    events: mpsc::Sender<MembershipChange>,
}

impl Relay {
    pub fn new(
        manager: Arc<LifecycleManager>,
        voice: Arc<VoiceStates>,
        events: mpsc::Sender<MembershipChange>,
    ) -> Self {
        Self {
            manager,
            voice,
            events,
        }
    }

    /// Handle one request line.
    pub async fn dispatch(&self, line: &str) -> Reply {
        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return Reply::error(format!("malformed request: {e}")),
        };
        match request {
            Request::VoiceSnapshot {
                workspace_id,
                members,
            } => {
                self.voice.seed(&workspace_id, &members);
                tracing::info!(workspace = %workspace_id, members = members.len(), "Voice states seeded");
                match self.manager.reconcile(&workspace_id).await {
                    Ok(report) => Reply {
                        report: Some(report),
                        ..Reply::ok()
                    },
                    Err(e) => {
                        tracing::error!(workspace = %workspace_id, error = %e, "Sweep after seeding failed");
                        Reply::error(e.to_string())
                    }
                }
            }
            Request::VoiceState(change) => {
                self.voice.apply(&change);
                if self.events.send(change).await.is_err() {
                    return Reply::error("membership listener has stopped");
                }
                Reply::ok()
            }
            Request::Create {
                workspace_id,
                group,
            } => match self.manager.create_group(&workspace_id, group).await {
                Ok(record) => Reply::with_record(record),
                Err(e) => {
                    tracing::warn!(workspace = %workspace_id, error = %e, "Create failed");
                    Reply::error(e.to_string())
                }
            },
            Request::Delete {
                workspace_id,
                lobby_id,
            } => match self.manager.delete_group(&workspace_id, &lobby_id).await {
                Ok(Some(record)) => Reply::with_record(record),
                Ok(None) => Reply::error(format!("{lobby_id} is not a managed lobby")),
                Err(e) => {
                    tracing::warn!(workspace = %workspace_id, lobby = %lobby_id, error = %e, "Delete failed");
                    Reply::error(e.to_string())
                }
            },
        }
    }

    /// Accept relay connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let relay = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = relay.handle(stream, addr).await {
                    tracing::error!(peer = %addr, "Relay connection error: {e}");
                }
            });
        }
    }

    /// Bind `addr` and serve in the background; returns the bound address.
    pub async fn start(self: Arc<Self>, addr: &str) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("Relay listening on {local}");
        Ok((local, tokio::spawn(self.serve(listener))))
    }

    async fn handle(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        tracing::info!(peer = %addr, "Relay connected");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(MAX_LINE_LEN as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if n == 0 {
                break;
            }
            let reply = if buf.last() != Some(&b'\n') && buf.len() > MAX_LINE_LEN {
                discard_line(&mut reader).await?;
                tracing::warn!(peer = %addr, "Line too long, dropping");
                Reply::error(format!("line longer than {MAX_LINE_LEN} bytes"))
            } else {
                match std::str::from_utf8(&buf) {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => self.dispatch(line.trim()).await,
                    Err(_) => Reply::error("line is not valid UTF-8"),
                }
            };
            let mut out = serde_json::to_string(&reply)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
        }

        tracing::info!(peer = %addr, "Relay disconnected");
        Ok(())
    }
}

/// Skip the rest of an over-long line without buffering it.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = chunk.len();
        reader.consume(len);
    }
}
