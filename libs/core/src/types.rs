use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::error::DispatchError;

/// Lifecycle state of a dispatch session.
///
/// ```
/// use boost_core::SessionStatus;
///
/// assert!(!SessionStatus::RateLimited.is_terminal());
/// assert!(SessionStatus::TokenExpired.is_terminal());
/// assert_eq!(SessionStatus::RateLimited.as_str(), "rate-limited");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Pending,
    Running,
    RateLimited,
    TokenExpired,
    Finished,
    Error,
    Cancelled,
}

impl SessionStatus {
    /// Returns the kebab-case identifier used in payloads and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::RateLimited => "rate-limited",
            SessionStatus::TokenExpired => "token-expired",
            SessionStatus::Finished => "finished",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::TokenExpired
                | SessionStatus::Finished
                | SessionStatus::Error
                | SessionStatus::Cancelled
        )
    }
}

/// Mutable unit of work tracked while a dispatch run is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub target: String,
    pub requested_count: u32,
    pub completed_count: u32,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Session {
    /// Creates a session in the `pending` state, stamped with the current time.
    pub fn pending(id: impl Into<String>, target: impl Into<String>, requested_count: u32) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            target: target.into(),
            requested_count,
            completed_count: 0,
            status: SessionStatus::Pending,
            started_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completion ratio in percent, rounded to one decimal place.
    pub fn progress_percent(&self) -> f64 {
        if self.requested_count == 0 {
            return 0.0;
        }
        let ratio = f64::from(self.completed_count) / f64::from(self.requested_count);
        (ratio * 1000.0).round() / 10.0
    }
}

/// Read model returned by the active-sessions query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub target: String,
    pub requested_count: u32,
    pub completed_count: u32,
    pub status: SessionStatus,
    pub progress_percent: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            target: session.target.clone(),
            requested_count: session.requested_count,
            completed_count: session.completed_count,
            status: session.status,
            progress_percent: session.progress_percent(),
            started_at: session.started_at,
            last_error: session.last_error.clone(),
        }
    }
}

/// A caller's request to repeat an action against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub credential: String,
    pub target: String,
    pub requested_count: u32,
    pub interval_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl DispatchRequest {
    /// Checks the caller-supplied shape; credential parsing happens separately.
    pub fn validate(&self, max_requested: u32) -> Result<(), DispatchError> {
        if self.requested_count == 0 {
            return Err(DispatchError::InvalidRequest(
                "requested count must be at least 1".into(),
            ));
        }
        if self.requested_count > max_requested {
            return Err(DispatchError::InvalidRequest(format!(
                "requested count {} exceeds the limit of {max_requested}",
                self.requested_count
            )));
        }
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return Err(DispatchError::InvalidRequest(
                "interval must be a positive number of seconds".into(),
            ));
        }
        validate_target(&self.target)?;
        if let Some(id) = &self.session_id {
            if id.trim().is_empty() {
                return Err(DispatchError::InvalidRequest(
                    "session id must not be blank".into(),
                ));
            }
        }
        Ok(())
    }
}

fn validate_target(target: &str) -> Result<(), DispatchError> {
    let parsed = Url::parse(target.trim())
        .map_err(|err| DispatchError::InvalidRequest(format!("target is not a valid URL: {err}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        scheme => Err(DispatchError::InvalidRequest(format!(
            "target must be an http(s) URL, got scheme `{scheme}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DispatchRequest {
        DispatchRequest {
            credential: "sid=abc".into(),
            target: "https://example.test/posts/1".into(),
            requested_count: 5,
            interval_secs: 1.0,
            session_id: None,
        }
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&SessionStatus::TokenExpired).unwrap();
        assert_eq!(json, "\"token-expired\"");
        let back: SessionStatus = serde_json::from_str("\"rate-limited\"").unwrap();
        assert_eq!(back, SessionStatus::RateLimited);
    }

    #[test]
    fn terminal_statuses() {
        for status in [
            SessionStatus::TokenExpired,
            SessionStatus::Finished,
            SessionStatus::Error,
            SessionStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status:?}");
        }
        for status in [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::RateLimited,
        ] {
            assert!(!status.is_terminal(), "{status:?}");
        }
    }

    #[test]
    fn progress_is_rounded_percent() {
        let mut session = Session::pending("s", "https://example.test", 3);
        assert_eq!(session.progress_percent(), 0.0);
        session.completed_count = 1;
        assert_eq!(session.progress_percent(), 33.3);
        session.completed_count = 3;
        assert_eq!(session.progress_percent(), 100.0);
    }

    #[test]
    fn summary_copies_session_fields() {
        let mut session = Session::pending("s-1", "https://example.test", 4);
        session.completed_count = 2;
        session.status = SessionStatus::Running;
        let summary = SessionSummary::from(&session);
        assert_eq!(summary.session_id, "s-1");
        assert_eq!(summary.progress_percent, 50.0);
        assert_eq!(summary.status, SessionStatus::Running);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["progressPercent"], 50.0);
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn valid_request_passes() {
        request().validate(100).unwrap();
    }

    #[test]
    fn rejects_zero_and_oversized_counts() {
        let mut req = request();
        req.requested_count = 0;
        assert!(matches!(req.validate(100), Err(DispatchError::InvalidRequest(_))));
        req.requested_count = 101;
        assert!(matches!(req.validate(100), Err(DispatchError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_bad_intervals() {
        for interval in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut req = request();
            req.interval_secs = interval;
            assert!(req.validate(100).is_err(), "interval {interval}");
        }
    }

    #[test]
    fn rejects_non_http_targets() {
        for target in ["not a url", "ftp://example.test/file", "mailto:a@b.c"] {
            let mut req = request();
            req.target = target.into();
            assert!(req.validate(100).is_err(), "target {target}");
        }
    }

    #[test]
    fn rejects_blank_session_id() {
        let mut req = request();
        req.session_id = Some("  ".into());
        assert!(req.validate(100).is_err());
    }
}
