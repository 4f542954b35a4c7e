//! Bot configuration.
//!
//! Every flag can also be set through the environment:
//!
//! ```bash
//! FLEXCHAN_TOKEN=...                          # required
//! FLEXCHAN_LISTEN=127.0.0.1:7070              # relay listen address
//! FLEXCHAN_DB=flexchan.db                     # registry database
//! FLEXCHAN_API_BASE=https://discord.com/api/v10
//! FLEXCHAN_LOG_JSON=1                         # JSON logs
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use flexchan_core::manager::DEFAULT_LOBBY_PREFIX;
use thiserror::Error;

#[derive(Debug, Clone, Parser)]
#[command(name = "flexchan-bot", about = "Auto-scaling voice rooms behind a lobby")]
pub struct BotConfig {
    /// Address the gateway relay listens on (host:port)
    #[arg(long, env = "FLEXCHAN_LISTEN", default_value = "127.0.0.1:7070")]
    pub listen_addr: String,

    /// Registry database path
    #[arg(long, env = "FLEXCHAN_DB", default_value = "flexchan.db")]
    pub db_path: PathBuf,

    /// REST API base URL
    #[arg(long, env = "FLEXCHAN_API_BASE", default_value = "https://discord.com/api/v10")]
    pub api_base: String,

    /// Bot token used for the REST API
    #[arg(long, env = "FLEXCHAN_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Prefix for lobby room names
    #[arg(long, default_value = DEFAULT_LOBBY_PREFIX)]
    pub lobby_prefix: String,

    /// Do not sweep stored workspaces at startup
    #[arg(long)]
    pub skip_reconcile: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bot token is empty")]
    EmptyToken,

    #[error("invalid listen address {0:?}")]
    InvalidListenAddr(String),

    #[error("invalid API base {0:?}: expected an http(s) URL")]
    InvalidApiBase(String),
}

impl BotConfig {
    /// Check the values clap cannot check on its own.
    pub fn validate(&self) -> Result<SocketAddr, ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(ConfigError::InvalidApiBase(self.api_base.clone()));
        }
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.listen_addr.clone()))
    }
}
