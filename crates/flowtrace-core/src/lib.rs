//! Traced pipeline execution engine.
//!
//! Runs a fixed, linear sequence of named steps over a shared [`State`] map
//! while recording per-step timing, state snapshots and failures into a
//! [`RunTrace`]. The trace being recorded is reached through an ambient,
//! task-scoped slot ([`context`]) so steps never have to thread it through
//! their signatures.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod id;
pub mod instrument;
pub mod model;
pub mod state;
pub mod streaming;

// Re-export commonly used types
pub use config::{TracingConfig, TracingSettings, Verbosity};
pub use context::{get_current_trace, set_current_trace, with_trace_scope};
pub use error::CoreError;
pub use executor::{Pipeline, TraceOptions, TracedRun};
pub use id::{SessionId, StepId, TraceId};
pub use instrument::{async_step_fn, instrument, step_fn, Instrumented, Step};
pub use model::{RunTrace, StepRecord, TraceHandle, TraceStatus};
pub use state::{merge_state, snapshot_state, State};
pub use streaming::{
    collect_stream, stream_events, stream_events_instrumented, EventStream, StreamEvent,
    StreamOutcome, StreamingStep, TokenSource,
};
