use std::sync::Arc;
use std::time::Duration;

use boost_core::{ActionCall, ActionOutcome, Identity, SessionStatus, Token};
use boost_history::HistoryRecord;
use boost_pacing::{Pacer, RetryBudget, RetryLimits};
use boost_session::CancellationToken;
use boost_telemetry::{TelemetryLabels, record_counter};
use tracing::{debug, info, warn};

use crate::dispatcher::Inner;
use crate::guard::{SessionGuard, Termination};

const DISPATCH_CALLS_COUNTER: &str = "dispatch_calls_total";

/// Everything a single dispatch task owns for the lifetime of its session.
pub(crate) struct SessionRun {
    pub session_id: String,
    pub identity: Identity,
    pub token: Token,
    pub target: String,
    pub requested: u32,
    pub pacer: Pacer,
    pub limits: RetryLimits,
}

/// Drives one session to a terminal status and archives it. The guard is
/// created by the caller so that a task aborted before its first poll still
/// archives the session.
pub(crate) async fn run(
    inner: Arc<Inner>,
    run: SessionRun,
    cancel: CancellationToken,
    guard: SessionGuard,
) -> HistoryRecord {
    let termination = match drive(&inner, &run, &cancel).await {
        Ok(termination) | Err(termination) => termination,
    };
    guard.finish(termination)
}

/// `Err` carries early exits so registry failures can use `?`.
async fn drive(
    inner: &Inner,
    run: &SessionRun,
    cancel: &CancellationToken,
) -> Result<Termination, Termination> {
    let id = run.session_id.as_str();
    inner.registry.update(id, |s| s.status = SessionStatus::Running)?;
    info!(
        requested = run.requested,
        interval_ms = millis(run.pacer.interval()),
        "dispatch session running"
    );

    let labels = TelemetryLabels::new("dispatch");
    let mut budget = RetryBudget::new(run.limits);
    let mut completed = 0u32;
    let call = ActionCall {
        identity: &run.identity,
        token: &run.token,
        target: &run.target,
    };

    loop {
        budget
            .check_deadline()
            .map_err(|err| Termination::error(err.to_string()))?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Termination::cancelled()),
            outcome = inner.actions.perform(&call) => outcome,
        };
        record_counter(
            DISPATCH_CALLS_COUNTER,
            1,
            &labels.clone().with_outcome(outcome.label()),
        );

        match outcome {
            ActionOutcome::Acknowledged => {
                completed += 1;
                budget.record_success();
                inner.registry.update(id, |s| {
                    s.completed_count = completed;
                    s.status = SessionStatus::Running;
                    s.last_error = None;
                })?;
                debug!(completed, requested = run.requested, "action acknowledged");
                if completed >= run.requested {
                    return Ok(Termination::finished());
                }
                pause(cancel, run.pacer.success_delay()).await?;
            }
            ActionOutcome::RateLimited { retry_after } => {
                let streak = budget
                    .record_rate_limit()
                    .map_err(|err| Termination::error(err.to_string()))?;
                let cooldown = run.pacer.rate_limit_cooldown(retry_after);
                inner.registry.update(id, |s| {
                    s.status = SessionStatus::RateLimited;
                    s.last_error = Some("rate limited by remote service".into());
                })?;
                warn!(streak, cooldown_ms = millis(cooldown), "rate limited, cooling down");
                pause(cancel, cooldown).await?;
                inner
                    .registry
                    .update(id, |s| s.status = SessionStatus::Running)?;
            }
            ActionOutcome::AuthorizationRejected { status, message } => {
                warn!(status, "authorization rejected, ending session");
                let reason = if message.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {message}")
                };
                return Ok(Termination::token_expired(reason));
            }
            ActionOutcome::Transient { reason } => {
                let streak = budget
                    .record_transient()
                    .map_err(|err| Termination::error(format!("{err}; last failure: {reason}")))?;
                let cooldown = run.pacer.transient_cooldown();
                inner
                    .registry
                    .update(id, |s| s.last_error = Some(reason.clone()))?;
                warn!(streak, reason = %reason, cooldown_ms = millis(cooldown), "transient failure, retrying");
                pause(cancel, cooldown).await?;
            }
        }
    }
}

async fn pause(cancel: &CancellationToken, wait: Duration) -> Result<(), Termination> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Termination::cancelled()),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
