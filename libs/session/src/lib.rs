//! Process-wide registry of live dispatch sessions.
//!
//! Each session has exactly one writer (its dispatch task) while any number of
//! status pollers read consistent snapshots. Structural changes (insert and
//! remove) may come from any task.

mod memory;

use std::sync::Arc;

use thiserror::Error;

pub use memory::SessionRegistry;
pub use tokio_util::sync::CancellationToken;

/// Shared registry handle used across services.
pub type SharedSessionRegistry = Arc<SessionRegistry>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session id already exists: {0}")]
    DuplicateSessionId(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session {0} is terminal and read-only")]
    Terminal(String),
    #[error("session {0} is still live")]
    NotTerminal(String),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::DuplicateSessionId(_) => "duplicate_session_id",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Terminal(_) => "session_terminal",
            RegistryError::NotTerminal(_) => "session_not_terminal",
        }
    }
}

impl From<RegistryError> for boost_core::DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateSessionId(id) => Self::DuplicateSessionId(id),
            RegistryError::NotFound(id) => Self::NotFound(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Returns an empty registry wrapped in an [`Arc`].
pub fn shared_registry() -> SharedSessionRegistry {
    Arc::new(SessionRegistry::new())
}
