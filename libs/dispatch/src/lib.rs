//! Dispatch engine turning one request ("repeat this action N times against
//! this target") into a supervised sequence of paced, retried calls.
//!
//! ```text
//! pending -> running <-> rate-limited -> finished | token-expired | error | cancelled
//! ```
//!
//! Each session runs on its own task with at most one call in flight. Progress
//! lives in the [`SessionRegistry`](boost_session::SessionRegistry) while the
//! run is live; on termination a [`HistoryRecord`](boost_history::HistoryRecord)
//! is appended and the live entry released.

mod dispatcher;
mod engine;
mod guard;

use boost_core::CredentialPolicy;
use boost_pacing::{PacingPolicy, RetryLimits};

pub use dispatcher::{DispatchHandle, DispatchPlan, DispatchTicket, Dispatcher};

const DEFAULT_MAX_REQUESTED: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub credential_policy: CredentialPolicy,
    pub pacing: PacingPolicy,
    pub limits: RetryLimits,
    /// Upper bound on a request's repetition count.
    pub max_requested: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            credential_policy: CredentialPolicy::default(),
            pacing: PacingPolicy::default(),
            limits: RetryLimits::default(),
            max_requested: DEFAULT_MAX_REQUESTED,
        }
    }
}
