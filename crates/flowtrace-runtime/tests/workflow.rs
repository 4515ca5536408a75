//! The summarize workflow end to end against in-process generators.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use flowtrace_core::{
    collect_stream, stream_events_instrumented, with_trace_scope, RunTrace, State, TraceHandle,
    TraceOptions, TraceStatus, TracingSettings, Verbosity,
};
use flowtrace_runtime::error::GenerationError;
use flowtrace_runtime::llm_provider::{FragmentStream, Generation, Generator, StaticGenerator};
use flowtrace_runtime::workflow::{summarize_pipeline, GenerateStreamStep};

struct Unreachable;

#[async_trait]
impl Generator for Unreachable {
    fn model(&self) -> &str {
        "unreachable"
    }

    async fn complete(&self, _prompt: &str) -> Result<Generation, GenerationError> {
        Err(GenerationError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream, GenerationError> {
        let fragments: Vec<Result<String, GenerationError>> = vec![
            Ok("partial ".to_string()),
            Err(GenerationError::Request("reset by peer".to_string())),
        ];
        Ok(futures::stream::iter(fragments).boxed())
    }
}

fn input(text: &str) -> State {
    let mut state = State::new();
    state.insert("input_text".to_string(), json!(text));
    state
}

#[tokio::test]
async fn summarize_records_three_steps() {
    let settings = Arc::new(TracingSettings::new(Verbosity::Debug));
    let generator = Arc::new(StaticGenerator::new("```\nShort.\n\n\nSummary.\n```"));
    let pipeline = summarize_pipeline(generator, &settings);

    let run = pipeline
        .run_traced(input("A long document."), TraceOptions::default())
        .await;

    let state = run.result.unwrap();
    assert_eq!(state["output"], json!("Short.\n\nSummary."));
    assert_eq!(state["output_chars"], json!(16));
    assert_eq!(state["model"], json!("static"));

    let names: Vec<&str> = run.trace.steps.iter().map(|s| s.node_name.as_str()).collect();
    assert_eq!(names, vec!["prepare", "generate", "post_process"]);
    assert_eq!(run.trace.status, TraceStatus::Completed);
    assert!(run.trace.steps[2].input_state.contains_key("raw_output"));
}

#[tokio::test]
async fn generator_failure_stops_the_run() {
    let settings = Arc::new(TracingSettings::new(Verbosity::Info));
    let pipeline = summarize_pipeline(Arc::new(Unreachable), &settings);

    let run = pipeline
        .run_traced(input("text"), TraceOptions::default())
        .await;

    let err = run.result.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GenerationError>(),
        Some(GenerationError::Status { status: 503, .. })
    ));
    assert_eq!(run.trace.status, TraceStatus::Error);
    assert_eq!(run.trace.steps.len(), 2);
    assert!(run.trace.steps[1].is_error());
    assert!(run.trace.steps[1].input_state.is_empty());
}

#[tokio::test]
async fn streaming_generate_appends_one_record() {
    let settings = Arc::new(TracingSettings::new(Verbosity::Info));
    let handle = TraceHandle::new(RunTrace::new("stream"));
    let step = Arc::new(GenerateStreamStep::new(Arc::new(StaticGenerator::new(
        "  streamed words  ",
    ))));

    let mut state = State::new();
    state.insert("prompt".to_string(), json!("go"));
    let outcome = with_trace_scope(Some(handle.clone()), async move {
        collect_stream(stream_events_instrumented(step, state, settings)).await
    })
    .await;

    assert_eq!(outcome.content(), Some("streamed words"));
    let trace = handle.snapshot().await;
    assert_eq!(trace.steps.len(), 1);
    assert_eq!(trace.steps[0].node_name, "generate_stream");
    assert!(!trace.steps[0].is_error());
}

#[tokio::test]
async fn streaming_failure_ends_with_error_event() {
    let settings = Arc::new(TracingSettings::new(Verbosity::Info));
    let handle = TraceHandle::new(RunTrace::new("stream"));
    let step = Arc::new(GenerateStreamStep::new(Arc::new(Unreachable)));

    let mut state = State::new();
    state.insert("prompt".to_string(), json!("go"));
    let outcome = with_trace_scope(Some(handle.clone()), async move {
        collect_stream(stream_events_instrumented(step, state, settings)).await
    })
    .await;

    assert_eq!(outcome.tokens, vec!["partial ".to_string()]);
    assert!(outcome.error().unwrap().contains("reset by peer"));
    let trace = handle.snapshot().await;
    assert_eq!(trace.steps.len(), 1);
    assert!(trace.steps[0].is_error());
}
