use std::sync::Arc;
use std::time::Duration;

use boost_core::{
    ActionClient, DispatchError, DispatchRequest, Identity, Session, SessionStatus,
    SessionSummary, Token, TokenSource, normalize_credential,
};
use boost_history::{HistoryLog, HistoryRecord};
use boost_pacing::{Pacer, interval_from_secs};
use boost_session::SharedSessionRegistry;
use boost_telemetry::{SessionContext, TelemetryLabels, record_counter, start_session_span};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::DispatchConfig;
use crate::engine::{self, SessionRun};
use crate::guard::{SessionGuard, publish_live_sessions};

const SESSIONS_STARTED_COUNTER: &str = "dispatch_sessions_started_total";

pub(crate) struct Inner {
    pub registry: SharedSessionRegistry,
    pub history: Arc<HistoryLog>,
    pub tokens: Arc<dyn TokenSource>,
    pub actions: Arc<dyn ActionClient>,
    pub config: DispatchConfig,
}

/// Entry point for starting, observing and stopping dispatch sessions.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// A validated request whose credential has already been normalized.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub session_id: String,
    pub identity: Identity,
    pub target: String,
    pub requested_count: u32,
    pub interval: Duration,
}

/// Acknowledgement handed back as soon as a session is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTicket {
    pub session_id: String,
    pub status: SessionStatus,
}

/// Handle to a spawned dispatch task. Dropping it detaches the task.
#[derive(Debug)]
pub struct DispatchHandle {
    ticket: DispatchTicket,
    join: JoinHandle<HistoryRecord>,
}

impl DispatchHandle {
    pub fn session_id(&self) -> &str {
        &self.ticket.session_id
    }

    pub fn ticket(&self) -> &DispatchTicket {
        &self.ticket
    }

    /// Aborts the task outright. The session is still archived, with status
    /// `error`.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Waits for the session to reach a terminal status.
    pub async fn completion(self) -> Result<HistoryRecord, DispatchError> {
        self.join
            .await
            .map_err(|err| DispatchError::Internal(format!("dispatch task failed: {err}")))
    }
}

impl Dispatcher {
    pub fn new(
        registry: SharedSessionRegistry,
        history: Arc<HistoryLog>,
        tokens: Arc<dyn TokenSource>,
        actions: Arc<dyn ActionClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                history,
                tokens,
                actions,
                config,
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Validates the request, normalizes the credential, obtains a token and
    /// spawns the session. Nothing is registered unless every step succeeds.
    pub async fn start(&self, request: DispatchRequest) -> Result<DispatchHandle, DispatchError> {
        request.validate(self.inner.config.max_requested)?;
        let interval = interval_from_secs(request.interval_secs).ok_or_else(|| {
            DispatchError::InvalidRequest("interval must be a positive number of seconds".into())
        })?;

        let session_id = match request.session_id.as_deref().map(str::trim) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if self.inner.registry.contains(&session_id) {
            return Err(DispatchError::DuplicateSessionId(session_id));
        }

        let identity = normalize_credential(&request.credential, &self.inner.config.credential_policy)?;
        let token = self.inner.tokens.fetch(&identity).await?;

        self.dispatch(
            DispatchPlan {
                session_id,
                identity,
                target: request.target.trim().to_string(),
                requested_count: request.requested_count,
                interval,
            },
            token,
        )
    }

    /// Registers and spawns a session for an already prepared plan.
    pub fn dispatch(&self, plan: DispatchPlan, token: Token) -> Result<DispatchHandle, DispatchError> {
        let session = Session::pending(&plan.session_id, &plan.target, plan.requested_count);
        let cancel = self.inner.registry.create(session.clone())?;
        let guard = SessionGuard::new(
            self.inner.registry.clone(),
            self.inner.history.clone(),
            session,
        );

        record_counter(SESSIONS_STARTED_COUNTER, 1, &TelemetryLabels::new("dispatch"));
        publish_live_sessions(&self.inner.registry);
        let span = start_session_span(&SessionContext::new(&plan.session_id, &plan.target));
        info!(
            parent: &span,
            requested = plan.requested_count,
            "dispatch session accepted"
        );

        let run = SessionRun {
            session_id: plan.session_id.clone(),
            identity: plan.identity,
            token,
            target: plan.target,
            requested: plan.requested_count,
            pacer: Pacer::new(plan.interval, self.inner.config.pacing),
            limits: self.inner.config.limits,
        };
        let join = tokio::spawn(
            engine::run(self.inner.clone(), run, cancel, guard).instrument(span),
        );

        Ok(DispatchHandle {
            ticket: DispatchTicket {
                session_id: plan.session_id,
                status: SessionStatus::Pending,
            },
            join,
        })
    }

    /// Requests cancellation; the session ends as `cancelled` at its next
    /// suspension point.
    pub fn stop(&self, session_id: &str) -> Result<(), DispatchError> {
        self.inner.registry.cancel(session_id)?;
        info!(session_id, "dispatch session stop requested");
        Ok(())
    }

    pub fn active_sessions(&self) -> Vec<SessionSummary> {
        self.inner
            .registry
            .list()
            .iter()
            .map(SessionSummary::from)
            .collect()
    }

    pub fn session(&self, session_id: &str) -> Result<SessionSummary, DispatchError> {
        let session = self.inner.registry.get(session_id)?;
        Ok(SessionSummary::from(&session))
    }

    pub fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.inner.history.list(limit)
    }

    /// Cancels every live session, returning how many were signalled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.registry.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "cancelling live dispatch sessions");
        }
        cancelled
    }
}
