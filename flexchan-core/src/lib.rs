//! flexchan-core: auto-scaling lobby rooms.
//!
//! A member joining a lobby gets a freshly spawned room inside the lobby's
//! grouping and is moved into it. Spawned rooms are reclaimed as soon as they
//! empty, and an optional recruitment announcement tracks each room's
//! occupancy.
//!
//! - `record` — persisted channel-group records
//! - `store` — durable per-workspace mapping (trait + in-memory impl)
//! - `registry` — read/modify access with per-workspace serialization
//! - `platform` — remote room/message collaborators
//! - `announce` — recruitment announcement rendering and updates
//! - `manager` — the lifecycle decisions
//! - `listener` — membership feed dispatch
//! - `sim` — in-process platform for tests (`sim` feature)

pub mod announce;
pub mod error;
pub mod event;
pub mod listener;
pub mod manager;
pub mod platform;
pub mod record;
pub mod registry;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod store;

pub use error::{FlexError, Result};
pub use event::MembershipChange;
pub use manager::{Action, LifecycleManager};
pub use record::{ChannelGroup, GroupOptions, SpawnedRoom};
