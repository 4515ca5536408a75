//! The sample `summarize` workflow: prepare, generate, post-process.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use flowtrace_core::{Pipeline, State, Step, StreamingStep, TokenSource, TracingSettings};

use crate::error::WorkflowError;
use crate::llm_provider::Generator;

pub const SUMMARIZE_WORKFLOW: &str = "summarize";

const DEFAULT_INSTRUCTION: &str = "Summarize the following text concisely.";

fn read_str<'a>(state: &'a State, key: &'static str) -> Result<&'a str, WorkflowError> {
    state
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or(WorkflowError::MissingField(key))
}

/// Builds the prompt from `input_text` and an optional `instruction`.
pub struct PrepareStep;

#[async_trait]
impl Step for PrepareStep {
    fn name(&self) -> &str {
        "prepare"
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        let text = read_str(state, "input_text")?.trim();
        if text.is_empty() {
            return Err(WorkflowError::EmptyInput.into());
        }
        let instruction = state
            .get("instruction")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTION);

        let mut update = State::new();
        update.insert(
            "prompt".to_string(),
            json!(format!("{instruction}\n\n{text}")),
        );
        update.insert("input_chars".to_string(), json!(text.chars().count()));
        Ok(update)
    }
}

/// Sends `prompt` to the generator.
pub struct GenerateStep {
    generator: Arc<dyn Generator>,
}

impl GenerateStep {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        GenerateStep { generator }
    }
}

#[async_trait]
impl Step for GenerateStep {
    fn name(&self) -> &str {
        "generate"
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        let prompt = read_str(state, "prompt")?;
        let generation = self.generator.complete(prompt).await?;

        let mut update = State::new();
        update.insert("raw_output".to_string(), json!(generation.content));
        update.insert("model".to_string(), json!(generation.model));
        Ok(update)
    }
}

/// Cleans `raw_output` into `output`.
pub struct PostProcessStep;

#[async_trait]
impl Step for PostProcessStep {
    fn name(&self) -> &str {
        "post_process"
    }

    async fn run(&self, state: &State) -> anyhow::Result<State> {
        let output = clean_output(read_str(state, "raw_output")?);
        let mut update = State::new();
        update.insert("output_chars".to_string(), json!(output.chars().count()));
        update.insert("output".to_string(), json!(output));
        Ok(update)
    }
}

/// Streaming counterpart of [`GenerateStep`].
pub struct GenerateStreamStep {
    generator: Arc<dyn Generator>,
}

impl GenerateStreamStep {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        GenerateStreamStep { generator }
    }
}

#[async_trait]
impl StreamingStep for GenerateStreamStep {
    fn name(&self) -> &str {
        "generate_stream"
    }

    async fn open(&self, state: &State) -> anyhow::Result<TokenSource> {
        let prompt = read_str(state, "prompt")?;
        let fragments = self.generator.stream(prompt).await?;

        let mut metadata = State::new();
        metadata.insert("model".to_string(), json!(self.generator.model()));
        Ok(TokenSource::new(fragments.map(|f| f.map_err(anyhow::Error::from)).boxed())
            .with_metadata(metadata))
    }

    fn post_process(&self, text: &str) -> String {
        clean_output(text)
    }
}

/// Strips a surrounding code fence, trims, and collapses runs of blank lines.
pub fn clean_output(raw: &str) -> String {
    let text = strip_code_fence(raw.trim()).trim();
    let mut out = String::with_capacity(text.len());
    let mut previous_blank = false;
    for line in text.lines() {
        let line = line.trim_end();
        let blank = line.is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return text;
    };
    // Drop the info string (e.g. "markdown") on the opening fence line.
    match body.find('\n') {
        Some(idx) => &body[idx + 1..],
        None => body,
    }
}

/// The instrumented three-step `summarize` pipeline.
pub fn summarize_pipeline(
    generator: Arc<dyn Generator>,
    settings: &Arc<TracingSettings>,
) -> Pipeline {
    Pipeline::new(SUMMARIZE_WORKFLOW)
        .add_instrumented(PrepareStep, settings)
        .add_instrumented(GenerateStep::new(generator), settings)
        .add_instrumented(PostProcessStep, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_strips_fence_and_blank_runs() {
        let raw = "  ```markdown\nFirst line.\n\n\n\nSecond line.   \n```  ";
        assert_eq!(clean_output(raw), "First line.\n\nSecond line.");
    }

    #[test]
    fn clean_output_leaves_plain_text() {
        assert_eq!(clean_output("  just text \n"), "just text");
        assert_eq!(clean_output("```inline```"), "inline");
        assert_eq!(clean_output(""), "");
    }

    #[tokio::test]
    async fn prepare_rejects_blank_input() {
        let mut state = State::new();
        state.insert("input_text".to_string(), json!("   "));
        let err = PrepareStep.run(&state).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::EmptyInput)
        ));

        let err = PrepareStep.run(&State::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::MissingField("input_text"))
        ));
    }

    #[tokio::test]
    async fn prepare_uses_custom_instruction() {
        let mut state = State::new();
        state.insert("input_text".to_string(), json!(" héllo "));
        state.insert("instruction".to_string(), json!("Translate."));
        let update = PrepareStep.run(&state).await.unwrap();
        assert_eq!(update["prompt"], json!("Translate.\n\nhéllo"));
        assert_eq!(update["input_chars"], json!(5));
    }

    #[test]
    fn pipeline_shape() {
        let settings = Arc::new(TracingSettings::default());
        let generator: Arc<dyn Generator> =
            Arc::new(crate::llm_provider::StaticGenerator::new("x"));
        let pipeline = summarize_pipeline(generator, &settings);
        assert_eq!(pipeline.name(), "summarize");
        assert_eq!(
            pipeline.step_names(),
            vec!["prepare", "generate", "post_process"]
        );
    }
}
