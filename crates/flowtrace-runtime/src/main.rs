//! Binary entrypoint: runs the `summarize` workflow once under a debug session.
//!
//! Reads configuration from environment variables:
//! - `FLOWTRACE_*`: tracing configuration (see `TracingConfig::from_env`)
//! - `FLOWTRACE_LLM_PROVIDER`, `FLOWTRACE_LLM_BASE_URL`, `FLOWTRACE_LLM_MODEL`,
//!   `FLOWTRACE_LLM_API_KEY`: generator; a static echo generator when unset
//! - `FLOWTRACE_INPUT`: text to summarize (default: read from stdin)
//! - `FLOWTRACE_SESSION`: debug session name (default: "flowtrace-cli")

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use flowtrace_core::{State, TraceOptions, TracingConfig, TracingSettings};
use flowtrace_runtime::llm_provider::{
    ChatCompletionsGenerator, Generator, GeneratorConfig, StaticGenerator,
};
use flowtrace_runtime::tracer::Tracer;
use flowtrace_runtime::workflow::summarize_pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = TracingConfig::from_env();
    let settings = Arc::new(TracingSettings::from_config(&config));
    let tracer = Tracer::from_config(config, Arc::clone(&settings));

    let generator: Arc<dyn Generator> = match GeneratorConfig::from_env() {
        Some(llm) => Arc::new(
            ChatCompletionsGenerator::new(&llm).context("invalid generator configuration")?,
        ),
        None => {
            tracing::info!("no FLOWTRACE_LLM_PROVIDER set; using static generator");
            Arc::new(StaticGenerator::new(
                "No generator configured. Set FLOWTRACE_LLM_PROVIDER to summarize for real.",
            ))
        }
    };

    let input_text = match std::env::var("FLOWTRACE_INPUT") {
        Ok(text) => text,
        Err(_) => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("failed to read input from stdin")?;
            text
        }
    };
    let session_name =
        std::env::var("FLOWTRACE_SESSION").unwrap_or_else(|_| "flowtrace-cli".to_string());

    tracer.initialize().await;
    let session_id = tracer.start_session(session_name);

    let mut initial = State::new();
    initial.insert("input_text".to_string(), json!(input_text));
    let mut metadata = State::new();
    metadata.insert("session_id".to_string(), json!(session_id));
    metadata.insert("model".to_string(), json!(generator.model()));

    let pipeline = summarize_pipeline(generator, &settings);
    let options = TraceOptions {
        input_data: initial.clone(),
        metadata,
    };
    let mut run = pipeline.run_traced(initial, options).await;

    if let Some(text) = run.result.as_ref().ok().and_then(|state| state.get("output")) {
        run.trace
            .output_data
            .insert("output".to_string(), text.clone());
    }

    tracer.add_trace(session_id, run.trace.trace_id);
    tracer.report_trace(&run.trace).await;
    let summary = tracer.end_session(session_id).await;

    let report = json!({ "trace": run.trace, "session": summary });
    println!("{}", serde_json::to_string_pretty(&report)?);

    run.result.map(|_| ())
}
