//! Shared OpenAI-compatible provider chat client.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::GenerationError;

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Provider settings for [`ChatCompletionsGenerator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub system_prompt: Option<String>,
}

impl GeneratorConfig {
    /// Reads `FLOWTRACE_LLM_*` variables. `None` when no provider is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let provider = non_blank("FLOWTRACE_LLM_PROVIDER")?;
        Some(GeneratorConfig {
            provider: Some(provider),
            model: non_blank("FLOWTRACE_LLM_MODEL"),
            api_base_url: non_blank("FLOWTRACE_LLM_BASE_URL"),
            api_key: non_blank("FLOWTRACE_LLM_API_KEY"),
            system_prompt: non_blank("FLOWTRACE_LLM_SYSTEM_PROMPT"),
        })
    }
}

/// Generated text plus the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub content: String,
    pub model: String,
}

/// Fragment stream returned by [`Generator::stream`].
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// Text generator behind the `generate` steps.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<Generation, GenerationError>;

    async fn stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}

/// `/chat/completions` client for openrouter or any OpenAI-compatible API.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    provider: String,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let provider = config.provider.clone().unwrap_or_default();
        let base_url = match provider.as_str() {
            "openrouter" => config
                .api_base_url
                .clone()
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            "openai_compatible" => config.api_base_url.clone().ok_or_else(|| {
                GenerationError::Config(
                    "openai_compatible provider requires FLOWTRACE_LLM_BASE_URL".to_string(),
                )
            })?,
            other => {
                return Err(GenerationError::Config(format!(
                    "unsupported provider '{}': use openrouter or openai_compatible",
                    other
                )))
            }
        };

        Ok(ChatCompletionsGenerator {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            provider,
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone().unwrap_or_default(),
            system_prompt: config.system_prompt.clone(),
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &self.system_prompt {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if stream {
            body["stream"] = json!(true);
        }

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        if self.provider == "openrouter" {
            req = req
                .header("HTTP-Referer", "https://localhost")
                .header("X-Title", "flowtrace");
        }

        let response = req
            .send()
            .await
            .map_err(|err| GenerationError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<Generation, GenerationError> {
        let response = self.send(prompt, false).await?;
        let body_text = response
            .text()
            .await
            .map_err(|err| GenerationError::Request(err.to_string()))?;

        let parsed: ChatResponse = serde_json::from_str(&body_text)
            .map_err(|err| GenerationError::Parse(err.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GenerationError::EmptyResponse)?;

        Ok(Generation {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let response = self.send(prompt, true).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| GenerationError::Request(err.to_string()))
            })
            .boxed();
        Ok(sse_fragments(body))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// One decoded server-sent-events line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, GenerationError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, event names, blank separators.
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: ChunkResponse =
        serde_json::from_str(data).map_err(|err| GenerationError::Parse(err.to_string()))?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(SseLine::Fragment(content)),
        _ => Ok(SseLine::Skip),
    }
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, GenerationError>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
}

impl SseState {
    /// Decodes every complete line in the buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match parse_sse_line(&String::from_utf8_lossy(&line)) {
                Ok(SseLine::Fragment(content)) => self.pending.push_back(Ok(content)),
                Ok(SseLine::Skip) => {}
                Ok(SseLine::Done) => {
                    self.finished = true;
                    return;
                }
                Err(err) => {
                    self.pending.push_back(Err(err));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turns a raw SSE byte stream into content fragments. Ends at `[DONE]`,
/// at the end of the body, or after the first error.
fn sse_fragments(body: BoxStream<'static, Result<Vec<u8>, GenerationError>>) -> FragmentStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(err)) => {
                    state.pending.push_back(Err(err));
                    state.finished = true;
                }
                None => {
                    // A final line without a trailing newline.
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Generator returning a fixed text. Streams it as word fragments.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    text: String,
    model: String,
}

impl StaticGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        StaticGenerator {
            text: text.into(),
            model: "static".to_string(),
        }
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _prompt: &str) -> Result<Generation, GenerationError> {
        Ok(Generation {
            content: self.text.clone(),
            model: self.model.clone(),
        })
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream, GenerationError> {
        let fragments: Vec<Result<String, GenerationError>> = self
            .text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}
