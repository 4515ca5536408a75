//! Debug session value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowtrace_core::{SessionId, TraceId, Verbosity};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Configuration frozen into a session when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub verbosity: Verbosity,
    pub backend_available: bool,
    pub project: String,
}

/// A caller-visible grouping of trace runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSession {
    pub session_id: SessionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Associated trace ids, in the order they were added.
    pub trace_ids: Vec<TraceId>,
    pub configuration: SessionConfiguration,
}

impl DebugSession {
    pub fn new(name: impl Into<String>, configuration: SessionConfiguration) -> Self {
        DebugSession {
            session_id: SessionId::new(),
            name: name.into(),
            created_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            trace_ids: Vec::new(),
            configuration,
        }
    }
}

/// Outcome reported by `end_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Completed,
    NotFound,
}

/// Freshly computed summary returned by every `end_session` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub name: Option<String>,
    pub status: SummaryStatus,
    pub trace_count: usize,
    pub duration_ms: Option<i64>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Deep link into the backend UI; `None` when the backend is unavailable.
    pub link: Option<String>,
}

impl SessionSummary {
    pub fn not_found(session_id: SessionId) -> Self {
        SessionSummary {
            session_id,
            name: None,
            status: SummaryStatus::NotFound,
            trace_count: 0,
            duration_ms: None,
            ended_at: None,
            link: None,
        }
    }

    pub(crate) fn for_session(session: &DebugSession, link: Option<String>) -> Self {
        SessionSummary {
            session_id: session.session_id,
            name: Some(session.name.clone()),
            status: SummaryStatus::Completed,
            trace_count: session.trace_ids.len(),
            duration_ms: session
                .ended_at
                .map(|end| (end - session.created_at).num_milliseconds()),
            ended_at: session.ended_at,
            link,
        }
    }
}
