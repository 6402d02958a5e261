//! Bounded record of completed dispatch runs.
//!
//! ```
//! use boost_core::{Session, SessionStatus};
//! use boost_history::{HistoryLog, HistoryRecord};
//! use time::OffsetDateTime;
//!
//! let log = HistoryLog::new(2);
//! for id in ["a", "b", "c"] {
//!     let mut session = Session::pending(id, "https://example.test/p/1", 1);
//!     session.status = SessionStatus::Finished;
//!     log.append(HistoryRecord::from_session(&session, OffsetDateTime::now_utc(), None));
//! }
//! let ids: Vec<_> = log.list(10).into_iter().map(|r| r.session_id).collect();
//! assert_eq!(ids, ["c", "b"]);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use boost_core::{Session, SessionStatus};
use boost_telemetry::{TelemetryLabels, record_counter};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

const HISTORY_EVICTIONS_COUNTER: &str = "history_evictions_total";
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Immutable snapshot of a terminated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub session_id: String,
    pub target: String,
    pub requested_count: u32,
    pub completed_count: u32,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl HistoryRecord {
    pub fn from_session(
        session: &Session,
        finished_at: OffsetDateTime,
        reason: Option<String>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            target: session.target.clone(),
            requested_count: session.requested_count,
            completed_count: session.completed_count,
            status: session.status,
            started_at: session.started_at,
            finished_at,
            reason,
        }
    }
}

/// Append-only ring of history records; the oldest record is evicted first.
pub struct HistoryLog {
    capacity: usize,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn append(&self, record: HistoryRecord) {
        let mut records = self.lock();
        debug!(
            session_id = %record.session_id,
            status = record.status.as_str(),
            completed = record.completed_count,
            "history record appended"
        );
        records.push_back(record);
        let mut evicted = 0;
        while records.len() > self.capacity {
            records.pop_front();
            evicted += 1;
        }
        drop(records);
        if evicted > 0 {
            record_counter(
                HISTORY_EVICTIONS_COUNTER,
                evicted,
                &TelemetryLabels::new("history"),
            );
        }
    }

    /// The most recent `limit` records, most recent first.
    pub fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
