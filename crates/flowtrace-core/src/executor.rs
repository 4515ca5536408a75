//! Linear pipeline executor.
//!
//! A [`Pipeline`] is an ordered chain of named steps. [`Pipeline::run`]
//! threads a [`State`] through them, shallow-merging each step's update
//! before the next step sees it. There is no branching and no error
//! handling: the first failing step ends the run and its error is returned
//! to the caller as-is.
//!
//! [`Pipeline::run_traced`] is the caller-side convenience that opens a
//! fresh [`RunTrace`], installs it as the ambient trace for the run, and
//! completes it with the outcome.

use std::sync::Arc;

use crate::config::TracingSettings;
use crate::context::with_trace_scope;
use crate::instrument::{instrument, Step};
use crate::model::{RunTrace, TraceHandle};
use crate::state::{merge_state, State};

/// Fixed, ordered chain of steps.
pub struct Pipeline {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

/// Caller-supplied summary data for [`Pipeline::run_traced`].
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub input_data: State,
    pub metadata: State,
}

/// Result of [`Pipeline::run_traced`]: the finished trace plus the run's
/// outcome, with any step failure preserved unchanged.
#[derive(Debug)]
pub struct TracedRun {
    pub trace: RunTrace,
    pub result: anyhow::Result<State>,
}

impl Pipeline {
    /// Creates an empty pipeline named `name` (the trace's `workflow_name`).
    pub fn new(name: impl Into<String>) -> Self {
        Pipeline {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step as-is.
    pub fn add_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Appends a step wrapped by [`instrument`].
    pub fn add_instrumented<S: Step + 'static>(
        self,
        step: S,
        settings: &Arc<TracingSettings>,
    ) -> Self {
        self.add_step(instrument(step, Arc::clone(settings)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order and returns the merged final state.
    pub async fn run(&self, initial_state: State) -> anyhow::Result<State> {
        let mut state = initial_state;
        for step in &self.steps {
            let update = step.run(&state).await?;
            merge_state(&mut state, update);
        }
        Ok(state)
    }

    /// Runs the pipeline under a fresh trace and returns both.
    ///
    /// The trace is completed as `error` (with the failure message) or
    /// `completed`. Output data is left for the caller to fill through
    /// [`TraceHandle::update`] or on the returned value.
    pub async fn run_traced(&self, initial_state: State, options: TraceOptions) -> TracedRun {
        let trace = RunTrace::new(self.name.clone())
            .with_input_data(options.input_data)
            .with_metadata(options.metadata);
        let handle = TraceHandle::new(trace);
        tracing::info!(
            workflow = %self.name,
            trace_id = %handle.trace_id(),
            "pipeline run started"
        );

        let result = with_trace_scope(Some(handle.clone()), self.run(initial_state)).await;

        match &result {
            Ok(_) => handle.complete(None, None).await,
            Err(err) => {
                let message = err.to_string();
                handle.complete(None, Some(message.as_str())).await
            }
        }

        let trace = handle.snapshot().await;
        tracing::info!(
            workflow = %self.name,
            trace_id = %trace.trace_id,
            status = ?trace.status,
            steps = trace.steps.len(),
            "pipeline run finished"
        );
        TracedRun { trace, result }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}
