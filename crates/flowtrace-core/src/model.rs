//! Trace record model.
//!
//! [`StepRecord`] describes one instrumented step execution and
//! [`RunTrace`] one whole pipeline run. Both are plain serde value types;
//! the only mutations are [`RunTrace::add_step`] and [`RunTrace::complete`].
//! [`TraceHandle`] is the shared, lockable form of a `RunTrace` that lives in
//! the ambient trace slot while a run is in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::id::{StepId, TraceId};
use crate::state::State;

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
}

/// One instrumented step execution.
///
/// Records are built with [`StepRecord::begin`] and sealed by exactly one of
/// [`StepRecord::succeed`] or [`StepRecord::fail`], which is the only place
/// `end_time`, `duration_ms` and the error pair are assigned. Once appended
/// to a [`RunTrace`] a record is never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    pub node_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Elapsed milliseconds measured on the monotonic clock.
    pub duration_ms: u64,
    /// Pre-step state; empty unless captured at `debug` verbosity.
    pub input_state: State,
    /// Post-step state with the step's update merged in; empty unless
    /// captured at `debug` verbosity.
    pub output_state: State,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
}

impl StepRecord {
    /// Starts a record for `node_name` with a fresh id and the current time.
    pub fn begin(node_name: impl Into<String>, input_state: State) -> Self {
        StepRecord {
            step_id: StepId::new(),
            node_name: node_name.into(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            input_state,
            output_state: State::new(),
            error_message: None,
            stack_trace: None,
        }
    }

    /// Seals the record as successful.
    pub fn succeed(mut self, elapsed: Duration, output_state: State) -> Self {
        self.seal(elapsed);
        self.output_state = output_state;
        self
    }

    /// Seals the record as failed. Message and trace are always set together.
    pub fn fail(
        mut self,
        elapsed: Duration,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        self.seal(elapsed);
        self.error_message = Some(message.into());
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// True when the step failed.
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    fn seal(&mut self, elapsed: Duration) {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        // Derive the end from the monotonic measurement so a wall-clock jump
        // mid-step can never produce end_time < start_time.
        let delta =
            chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.end_time = Some(self.start_time + delta);
    }
}

/// Aggregate record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrace {
    pub trace_id: TraceId,
    pub workflow_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    /// Step records in execution order.
    pub steps: Vec<StepRecord>,
    pub input_data: State,
    pub output_data: State,
    pub metadata: State,
    /// Failure message passed to `complete`, if any.
    pub error: Option<String>,
}

impl RunTrace {
    /// Creates a running trace for `workflow_name`.
    pub fn new(workflow_name: impl Into<String>) -> Self {
        RunTrace {
            trace_id: TraceId::new(),
            workflow_name: workflow_name.into(),
            start_time: Utc::now(),
            end_time: None,
            status: TraceStatus::Running,
            steps: Vec::new(),
            input_data: State::new(),
            output_data: State::new(),
            metadata: State::new(),
            error: None,
        }
    }

    pub fn with_input_data(mut self, input_data: State) -> Self {
        self.input_data = input_data;
        self
    }

    pub fn with_metadata(mut self, metadata: State) -> Self {
        self.metadata = metadata;
        self
    }

    /// Appends a finished step record.
    pub fn add_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// Finishes the run.
    ///
    /// The first call fixes `status` (`error` when `error` is given,
    /// `completed` otherwise), `output_data` and `error`. Later calls only
    /// re-derive `end_time`.
    pub fn complete(&mut self, output_data: Option<State>, error: Option<&str>) {
        self.end_time = Some(Utc::now().max(self.start_time));

        if self.status != TraceStatus::Running {
            tracing::debug!(
                trace_id = %self.trace_id,
                "trace already finished; only end_time refreshed"
            );
            return;
        }

        if let Some(output_data) = output_data {
            self.output_data = output_data;
        }
        match error {
            Some(message) => {
                self.status = TraceStatus::Error;
                self.error = Some(message.to_string());
            }
            None => self.status = TraceStatus::Completed,
        }
    }

    /// Wall-clock duration of the run, once completed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Shared handle to an in-flight [`RunTrace`].
///
/// Cloning the handle shares the same underlying trace. The trace id is kept
/// outside the lock so it can be read without awaiting.
#[derive(Debug, Clone)]
pub struct TraceHandle {
    trace_id: TraceId,
    inner: Arc<Mutex<RunTrace>>,
}

impl TraceHandle {
    pub fn new(trace: RunTrace) -> Self {
        TraceHandle {
            trace_id: trace.trace_id,
            inner: Arc::new(Mutex::new(trace)),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub async fn add_step(&self, step: StepRecord) {
        self.inner.lock().await.add_step(step);
    }

    pub async fn complete(&self, output_data: Option<State>, error: Option<&str>) {
        self.inner.lock().await.complete(output_data, error);
    }

    /// Runs `f` with exclusive access to the trace.
    pub async fn update<R>(&self, f: impl FnOnce(&mut RunTrace) -> R) -> R {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }

    /// Returns a copy of the trace as it currently stands.
    pub async fn snapshot(&self) -> RunTrace {
        self.inner.lock().await.clone()
    }
}
