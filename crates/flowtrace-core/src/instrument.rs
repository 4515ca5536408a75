//! Step abstraction and the instrumentation wrapper.
//!
//! A [`Step`] takes the shared [`State`] and returns a partial update. Plain
//! closures become steps through [`step_fn`] (returns immediately) and
//! [`async_step_fn`] (may suspend); both are wrapped the same way.
//!
//! [`instrument`] wraps any step so each invocation produces one
//! [`StepRecord`] in the ambient trace:
//!
//! | Verbosity | state snapshots | timing | errors |
//! |-----------|-----------------|--------|--------|
//! | debug     | yes             | yes    | yes    |
//! | info      | empty           | yes    | yes    |
//! | error     | empty           | yes    | yes    |
//!
//! Debug snapshots hold the full shared state: `input_state` before the
//! step, `output_state` after its update has been merged in.
//!
//! The wrapper only observes: the step's result, success or failure, is
//! returned to the caller exactly as the step produced it.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::TracingSettings;
use crate::context::get_current_trace;
use crate::model::StepRecord;
use crate::state::{merge_state, snapshot_state, State};

/// One named unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Declared node name, recorded as `StepRecord::node_name`.
    fn name(&self) -> &str;

    /// Runs the step against the current state, returning a partial update.
    async fn run(&self, state: &State) -> anyhow::Result<State>;
}

#[async_trait]
impl<S: Step + ?Sized> Step for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        (**self).run(state).await
    }
}

#[async_trait]
impl<S: Step + ?Sized> Step for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        (**self).run(state).await
    }
}

/// Step backed by a synchronous closure. See [`step_fn`].
pub struct FnStep<F> {
    name: String,
    func: F,
}

/// Builds a step from a closure that returns immediately.
pub fn step_fn<F>(name: impl Into<String>, func: F) -> FnStep<F>
where
    F: Fn(&State) -> anyhow::Result<State> + Send + Sync,
{
    FnStep {
        name: name.into(),
        func,
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&State) -> anyhow::Result<State> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        (self.func)(state)
    }
}

/// Step backed by an async closure. See [`async_step_fn`].
pub struct AsyncFnStep<F> {
    name: String,
    func: F,
}

/// Builds a step from a closure returning a future.
///
/// The closure receives an owned copy of the state so the future it returns
/// can outlive the borrow.
pub fn async_step_fn<F, Fut>(name: impl Into<String>, func: F) -> AsyncFnStep<F>
where
    F: Fn(State) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<State>> + Send,
{
    AsyncFnStep {
        name: name.into(),
        func,
    }
}

#[async_trait]
impl<F, Fut> Step for AsyncFnStep<F>
where
    F: Fn(State) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<State>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        (self.func)(state.clone()).await
    }
}

/// A step wrapped with timing, snapshot and failure capture.
pub struct Instrumented<S> {
    inner: S,
    settings: Arc<TracingSettings>,
}

/// Wraps `step` so every invocation is recorded into the ambient trace.
///
/// Verbosity is read from `settings` on each call, not here, so runtime
/// reconfiguration applies to steps that are already wrapped.
pub fn instrument<S: Step>(step: S, settings: Arc<TracingSettings>) -> Instrumented<S> {
    Instrumented {
        inner: step,
        settings,
    }
}

impl<S: Step> Instrumented<S> {
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Step> Step for Instrumented<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        let verbosity = self.settings.verbosity();
        let cap = self.settings.max_snapshot_bytes();
        let capture = verbosity.captures_state();

        let input_state = if capture {
            snapshot_state(state, cap)
        } else {
            State::new()
        };
        let record = StepRecord::begin(self.inner.name(), input_state);
        tracing::debug!(node = %record.node_name, step_id = %record.step_id, "step started");

        let clock = Instant::now();
        let result = self.inner.run(state).await;
        let elapsed = clock.elapsed();

        let record = match &result {
            Ok(update) => {
                let output_state = if capture {
                    let mut merged = state.clone();
                    merge_state(&mut merged, update.clone());
                    snapshot_state(&merged, cap)
                } else {
                    State::new()
                };
                let record = record.succeed(elapsed, output_state);
                tracing::debug!(
                    node = %record.node_name,
                    duration_ms = record.duration_ms,
                    "step completed"
                );
                record
            }
            Err(err) => {
                let record = record.fail(elapsed, err.to_string(), diagnostic_trace(err));
                tracing::warn!(
                    node = %record.node_name,
                    duration_ms = record.duration_ms,
                    error = %err,
                    "step failed"
                );
                record
            }
        };

        if let Some(trace) = get_current_trace() {
            trace.add_step(record).await;
        }

        result
    }
}

/// Renders `err` with its cause chain and a stack backtrace.
///
/// Uses the backtrace anyhow captured when one exists, otherwise captures
/// one here regardless of `RUST_BACKTRACE`.
pub(crate) fn diagnostic_trace(err: &anyhow::Error) -> String {
    let mut out = err.to_string();
    for (depth, cause) in err.chain().skip(1).enumerate() {
        if depth == 0 {
            out.push_str("\n\nCaused by:");
        }
        let _ = write!(out, "\n    {depth}: {cause}");
    }

    out.push_str("\n\nStack backtrace:\n");
    let captured = err.backtrace();
    if captured.status() == BacktraceStatus::Captured {
        let _ = write!(out, "{captured}");
    } else {
        let _ = write!(out, "{}", Backtrace::force_capture());
    }
    out
}
