use std::sync::Arc;

use boost_core::{Session, SessionStatus};
use boost_history::{HistoryLog, HistoryRecord};
use boost_session::{RegistryError, SharedSessionRegistry};
use boost_telemetry::{TelemetryLabels, record_counter, record_gauge};
use time::OffsetDateTime;
use tracing::{info, warn};

const SESSIONS_TERMINATED_COUNTER: &str = "dispatch_sessions_terminated_total";
const SESSIONS_LIVE_GAUGE: &str = "dispatch_sessions_live";

/// Publishes how many sessions the registry currently holds.
pub(crate) fn publish_live_sessions(registry: &SharedSessionRegistry) {
    record_gauge(
        SESSIONS_LIVE_GAUGE,
        registry.len() as f64,
        &TelemetryLabels::new("dispatch"),
    );
}

/// How a dispatch run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Termination {
    pub status: SessionStatus,
    pub reason: Option<String>,
}

impl Termination {
    pub fn finished() -> Self {
        Self {
            status: SessionStatus::Finished,
            reason: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: SessionStatus::Cancelled,
            reason: Some("stopped by caller".into()),
        }
    }

    pub fn token_expired(reason: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::TokenExpired,
            reason: Some(reason.into()),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

impl From<RegistryError> for Termination {
    fn from(err: RegistryError) -> Self {
        Termination::error(format!("session registry: {err}"))
    }
}

/// Archives a session exactly once: through [`SessionGuard::finish`] on the
/// normal path, or from `Drop` when the task panics or is aborted.
pub(crate) struct SessionGuard {
    registry: SharedSessionRegistry,
    history: Arc<HistoryLog>,
    fallback: Session,
    done: bool,
}

impl SessionGuard {
    pub fn new(
        registry: SharedSessionRegistry,
        history: Arc<HistoryLog>,
        fallback: Session,
    ) -> Self {
        Self {
            registry,
            history,
            fallback,
            done: false,
        }
    }

    pub fn finish(mut self, termination: Termination) -> HistoryRecord {
        self.done = true;
        self.archive(termination)
    }

    fn archive(&self, termination: Termination) -> HistoryRecord {
        let id = self.fallback.id.as_str();
        let Termination { status, reason } = termination;

        let session = match self.registry.update(id, |s| {
            s.status = status;
            if let Some(reason) = &reason {
                s.last_error = Some(reason.clone());
            }
        }) {
            Ok(session) => session,
            Err(RegistryError::Terminal(_)) => self
                .registry
                .get(id)
                .unwrap_or_else(|_| self.fallback.clone()),
            Err(err) => {
                warn!(session_id = %id, error = %err, "session vanished before archiving");
                let mut session = self.fallback.clone();
                session.status = status;
                session
            }
        };

        let record = HistoryRecord::from_session(&session, OffsetDateTime::now_utc(), reason);
        self.history.append(record.clone());

        if let Err(err) = self.registry.remove(id) {
            warn!(session_id = %id, error = %err, "failed to release session");
        }
        publish_live_sessions(&self.registry);

        record_counter(
            SESSIONS_TERMINATED_COUNTER,
            1,
            &TelemetryLabels::new("dispatch").with_outcome(record.status.as_str()),
        );
        info!(
            session_id = %id,
            status = record.status.as_str(),
            completed = record.completed_count,
            requested = record.requested_count,
            reason = record.reason.as_deref().unwrap_or(""),
            "dispatch session terminated"
        );
        record
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            self.archive(Termination::error("dispatch task ended unexpectedly"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boost_session::shared_registry;

    fn setup(id: &str) -> (SharedSessionRegistry, Arc<HistoryLog>, Session) {
        let registry = shared_registry();
        let history = Arc::new(HistoryLog::new(10));
        let session = Session::pending(id, "https://example.test/p/1", 4);
        registry.create(session.clone()).unwrap();
        (registry, history, session)
    }

    #[test]
    fn finish_archives_once() {
        let (registry, history, session) = setup("a");
        registry.update("a", |s| s.completed_count = 2).unwrap();
        let guard = SessionGuard::new(registry.clone(), history.clone(), session);
        let record = guard.finish(Termination::finished());
        assert_eq!(record.status, SessionStatus::Finished);
        assert_eq!(record.completed_count, 2);
        assert_eq!(history.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drop_without_finish_records_error() {
        let (registry, history, session) = setup("a");
        drop(SessionGuard::new(registry.clone(), history.clone(), session));
        let records = history.list(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SessionStatus::Error);
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_registry_entry_falls_back_to_snapshot() {
        let registry = shared_registry();
        let history = Arc::new(HistoryLog::new(10));
        let session = Session::pending("ghost", "https://example.test/p/1", 4);
        let record = SessionGuard::new(registry, history.clone(), session)
            .finish(Termination::token_expired("HTTP 403"));
        assert_eq!(record.status, SessionStatus::TokenExpired);
        assert_eq!(record.reason.as_deref(), Some("HTTP 403"));
        assert_eq!(history.len(), 1);
    }
}
