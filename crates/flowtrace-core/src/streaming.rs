//! Streaming step variant.
//!
//! A [`StreamingStep`] produces its output as a sequence of fragments rather
//! than one return value. [`stream_events`] turns it into a lazy, finite
//! [`EventStream`] of `token` events followed by exactly one terminal event:
//! `complete` (post-processed accumulated text plus metadata) or `error`.
//! Failures are delivered as data, never raised across the stream.
//!
//! The stream is pull-driven: nothing runs until the consumer polls, and no
//! background task is spawned, so dropping the stream early simply drops the
//! underlying fragment source.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::TracingSettings;
use crate::context::get_current_trace;
use crate::instrument::diagnostic_trace;
use crate::model::{StepRecord, TraceHandle};
use crate::state::{snapshot_state, State};

/// One event emitted by a streaming step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An incremental content fragment.
    Token { content: String },
    /// Terminal success: the post-processed accumulated content.
    Complete { content: String, metadata: State },
    /// Terminal failure.
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token { .. })
    }
}

/// Boxed event stream returned by [`stream_events`].
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Raw fragment source opened by a [`StreamingStep`].
pub struct TokenSource {
    pub tokens: BoxStream<'static, anyhow::Result<String>>,
    /// Attached to the `complete` event (e.g. which model produced it).
    pub metadata: State,
}

impl TokenSource {
    pub fn new(tokens: BoxStream<'static, anyhow::Result<String>>) -> Self {
        TokenSource {
            tokens,
            metadata: State::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: State) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A step whose output arrives incrementally.
#[async_trait]
pub trait StreamingStep: Send + Sync {
    fn name(&self) -> &str;

    /// Starts generation. A failure here becomes the stream's `error` event.
    async fn open(&self, state: &State) -> anyhow::Result<TokenSource>;

    /// Applied once to the accumulated text before `complete` is emitted.
    fn post_process(&self, text: &str) -> String {
        text.trim().to_string()
    }
}

/// Drives `step` over `state` as an event stream.
pub fn stream_events(step: Arc<dyn StreamingStep>, state: State) -> EventStream {
    build(step, state, None)
}

/// Like [`stream_events`], and also appends one [`StepRecord`] to the trace
/// that is ambient *when this function is called*, at the terminal event.
///
/// Timing starts at the first poll and covers opening through the terminal
/// event, so time spent before the consumer pulls is not counted. A stream
/// dropped before its terminal event leaves no record.
pub fn stream_events_instrumented(
    step: Arc<dyn StreamingStep>,
    state: State,
    settings: Arc<TracingSettings>,
) -> EventStream {
    let recorder = get_current_trace().map(|trace| {
        let capture = settings.verbosity().captures_state();
        let cap = settings.max_snapshot_bytes();
        let input_state = if capture {
            snapshot_state(&state, cap)
        } else {
            State::new()
        };
        Recorder {
            trace,
            record: StepRecord::begin(step.name(), input_state),
            clock: Instant::now(),
            capture,
            cap,
        }
    });
    build(step, state, recorder)
}

struct Recorder {
    trace: TraceHandle,
    record: StepRecord,
    clock: Instant,
    capture: bool,
    cap: usize,
}

impl Recorder {
    /// Restamps the start; called once, on the first poll.
    fn mark_started(&mut self) {
        self.record.start_time = Utc::now();
        self.clock = Instant::now();
    }

    async fn succeed(self, content: &str) {
        // Post-state: the input state with the produced content merged in.
        let output_state = if self.capture {
            let mut merged = self.record.input_state.clone();
            merged.insert("content".to_string(), json!(content));
            snapshot_state(&merged, self.cap)
        } else {
            State::new()
        };
        let record = self.record.succeed(self.clock.elapsed(), output_state);
        tracing::debug!(
            node = %record.node_name,
            duration_ms = record.duration_ms,
            "stream completed"
        );
        self.trace.add_step(record).await;
    }

    async fn fail(self, err: &anyhow::Error) {
        let record = self
            .record
            .fail(self.clock.elapsed(), err.to_string(), diagnostic_trace(err));
        tracing::warn!(node = %record.node_name, error = %err, "stream failed");
        self.trace.add_step(record).await;
    }
}

enum Phase {
    Opening {
        step: Arc<dyn StreamingStep>,
        state: State,
    },
    Streaming {
        step: Arc<dyn StreamingStep>,
        tokens: BoxStream<'static, anyhow::Result<String>>,
        metadata: State,
        buffer: String,
    },
    Done,
}

fn build(step: Arc<dyn StreamingStep>, state: State, recorder: Option<Recorder>) -> EventStream {
    stream::unfold(
        (Phase::Opening { step, state }, recorder),
        |(phase, recorder)| advance(phase, recorder),
    )
    .boxed()
}

async fn advance(
    mut phase: Phase,
    mut recorder: Option<Recorder>,
) -> Option<(StreamEvent, (Phase, Option<Recorder>))> {
    loop {
        match phase {
            Phase::Done => return None,
            Phase::Opening { step, state } => {
                if let Some(recorder) = recorder.as_mut() {
                    recorder.mark_started();
                }
                match step.open(&state).await {
                    Ok(source) => {
                        phase = Phase::Streaming {
                            step,
                            tokens: source.tokens,
                            metadata: source.metadata,
                            buffer: String::new(),
                        };
                    }
                    Err(err) => return Some(terminal_error(err, recorder.take()).await),
                }
            }
            Phase::Streaming {
                step,
                mut tokens,
                metadata,
                mut buffer,
            } => {
                return match tokens.next().await {
                    Some(Ok(fragment)) => {
                        buffer.push_str(&fragment);
                        let next = Phase::Streaming {
                            step,
                            tokens,
                            metadata,
                            buffer,
                        };
                        Some((StreamEvent::Token { content: fragment }, (next, recorder)))
                    }
                    Some(Err(err)) => Some(terminal_error(err, recorder.take()).await),
                    None => {
                        let content = step.post_process(&buffer);
                        if let Some(recorder) = recorder.take() {
                            recorder.succeed(&content).await;
                        }
                        Some((
                            StreamEvent::Complete { content, metadata },
                            (Phase::Done, None),
                        ))
                    }
                };
            }
        }
    }
}

async fn terminal_error(
    err: anyhow::Error,
    recorder: Option<Recorder>,
) -> (StreamEvent, (Phase, Option<Recorder>)) {
    if let Some(recorder) = recorder {
        recorder.fail(&err).await;
    }
    (
        StreamEvent::Error {
            message: err.to_string(),
        },
        (Phase::Done, None),
    )
}

/// A fully drained event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOutcome {
    /// Token fragments in arrival order.
    pub tokens: Vec<String>,
    /// The terminal event, if the stream produced one.
    pub terminal: Option<StreamEvent>,
}

impl StreamOutcome {
    /// Final content when the stream completed.
    pub fn content(&self) -> Option<&str> {
        match &self.terminal {
            Some(StreamEvent::Complete { content, .. }) => Some(content),
            _ => None,
        }
    }

    /// Failure message when the stream errored.
    pub fn error(&self) -> Option<&str> {
        match &self.terminal {
            Some(StreamEvent::Error { message }) => Some(message),
            _ => None,
        }
    }
}

/// Drains `events` into a [`StreamOutcome`].
pub async fn collect_stream(mut events: EventStream) -> StreamOutcome {
    let mut outcome = StreamOutcome::default();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Token { content } => outcome.tokens.push(content),
            terminal => {
                outcome.terminal = Some(terminal);
                break;
            }
        }
    }
    outcome
}
