//! flexchan-bot: wires the flexchan lifecycle manager to a live chat platform.
//!
//! - `config` — CLI / environment configuration
//! - `db` — SQLite registry store
//! - `voice` — local voice presence view
//! - `rest` — REST platform and messenger adapter
//! - `relay` — line-delimited JSON relay from the gateway sidecar

pub mod config;
pub mod db;
pub mod relay;
pub mod rest;
pub mod voice;
