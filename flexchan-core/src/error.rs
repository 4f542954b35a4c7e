//! Failure taxonomy for lifecycle operations.
//!
//! Rooms that no record tracks are not errors: the manager returns no actions
//! for them. An announcement that cannot be edited is reported as a `false`
//! from the updater. Everything here aborts the operation that hit it.

use crate::platform::PlatformError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum FlexError {
    /// A tracked record's live room or grouping cannot be resolved.
    #[error("stale reference: {0}")]
    StaleReference(String),

    /// The persisted list does not contain a record the operation relied on.
    #[error("registry inconsistency: {0}")]
    RegistryInconsistency(String),

    /// A request the manager refuses before touching the platform.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub type Result<T, E = FlexError> = std::result::Result<T, E>;
