use boost_core::Session;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::RegistryError;

struct LiveSession {
    session: Session,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, LiveSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a new session and hands back the cancellation token its
    /// dispatch task must observe.
    pub fn create(&self, session: Session) -> Result<CancellationToken, RegistryError> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateSessionId(entry.key().clone())),
            Entry::Vacant(entry) => {
                let cancel = CancellationToken::new();
                debug!(session_id = %session.id, "session registered");
                entry.insert(LiveSession {
                    session,
                    cancel: cancel.clone(),
                });
                Ok(cancel)
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Session, RegistryError> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().session.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of every live session, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.value().session.clone())
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Applies `mutation` while holding the entry lock, so readers only ever
    /// see the state before or after it. Terminal sessions are read-only.
    pub fn update<F>(&self, id: &str, mutation: F) -> Result<Session, RegistryError>
    where
        F: FnOnce(&mut Session),
    {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let live = entry.value_mut();
        if live.session.is_terminal() {
            return Err(RegistryError::Terminal(id.to_string()));
        }
        let mut next = live.session.clone();
        mutation(&mut next);
        if next.completed_count < live.session.completed_count {
            next.completed_count = live.session.completed_count;
        }
        next.id = live.session.id.clone();
        next.updated_at = OffsetDateTime::now_utc();
        live.session = next.clone();
        Ok(next)
    }

    /// Releases a terminal session from the registry.
    pub fn remove(&self, id: &str) -> Result<Session, RegistryError> {
        let removed = self
            .sessions
            .remove_if(id, |_, live| live.session.is_terminal());
        match removed {
            Some((_, live)) => {
                debug!(session_id = %id, status = live.session.status.as_str(), "session released");
                Ok(live.session)
            }
            None if self.sessions.contains_key(id) => Err(RegistryError::NotTerminal(id.to_string())),
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Signals the session's dispatch task to stop at its next suspension point.
    pub fn cancel(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.value().cancel.cancel();
        Ok(())
    }

    /// Cancels every live session, returning how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.sessions.iter() {
            if !entry.value().cancel.is_cancelled() {
                entry.value().cancel.cancel();
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boost_core::SessionStatus;
    use std::sync::Arc;

    fn session(id: &str) -> Session {
        Session::pending(id, "https://example.test/p/1", 5)
    }

    #[test]
    fn create_then_get_returns_pending_snapshot() {
        let registry = SessionRegistry::new();
        registry.create(session("a")).unwrap();
        let snapshot = registry.get("a").unwrap();
        assert_eq!(snapshot.status, SessionStatus::Pending);
        assert_eq!(snapshot.completed_count, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = SessionRegistry::new();
        registry.create(session("a")).unwrap();
        let err = registry.create(session("a")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSessionId("a".into()));
    }

    #[test]
    fn missing_sessions_report_not_found() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.get("nope"), Err(RegistryError::NotFound("nope".into())));
        assert!(matches!(
            registry.update("nope", |_| {}),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(registry.cancel("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn update_applies_mutation_atomically() {
        let registry = SessionRegistry::new();
        registry.create(session("a")).unwrap();
        let updated = registry
            .update("a", |s| {
                s.status = SessionStatus::Running;
                s.completed_count = 2;
            })
            .unwrap();
        assert_eq!(updated.completed_count, 2);
        assert_eq!(registry.get("a").unwrap(), updated);
    }

    #[test]
    fn completed_count_never_decreases() {
        let registry = SessionRegistry::new();
        registry.create(session("a")).unwrap();
        registry.update("a", |s| s.completed_count = 3).unwrap();
        let updated = registry.update("a", |s| s.completed_count = 1).unwrap();
        assert_eq!(updated.completed_count, 3);
    }

    #[test]
    fn terminal_sessions_are_read_only_and_removable() {
        let registry = SessionRegistry::new();
        registry.create(session("a")).unwrap();
        assert_eq!(
            registry.remove("a"),
            Err(RegistryError::NotTerminal("a".into()))
        );
        registry
            .update("a", |s| s.status = SessionStatus::Finished)
            .unwrap();
        assert_eq!(
            registry.update("a", |s| s.completed_count = 9),
            Err(RegistryError::Terminal("a".into()))
        );
        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.status, SessionStatus::Finished);
        assert!(registry.is_empty());
        assert_eq!(registry.remove("a"), Err(RegistryError::NotFound("a".into())));
    }

    #[test]
    fn cancel_trips_the_issued_token() {
        let registry = SessionRegistry::new();
        let token = registry.create(session("a")).unwrap();
        let other = registry.create(session("b")).unwrap();
        registry.cancel("a").unwrap();
        assert!(token.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(registry.cancel_all(), 1);
        assert!(other.is_cancelled());
    }

    #[test]
    fn list_is_ordered_by_start_time() {
        let registry = SessionRegistry::new();
        let mut first = session("z");
        first.started_at -= time::Duration::seconds(10);
        registry.create(session("a")).unwrap();
        registry.create(first).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["z".to_string(), "a".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_are_isolated() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();
        for n in 0..8u32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("s-{n}");
                registry
                    .create(Session::pending(&id, "https://example.test", 100))
                    .unwrap();
                for _ in 0..=n {
                    registry
                        .update(&id, |s| s.completed_count += 1)
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for n in 0..8u32 {
            assert_eq!(registry.get(&format!("s-{n}")).unwrap().completed_count, n + 1);
        }
    }
}
