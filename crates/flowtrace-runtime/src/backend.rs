//! External trace backend client.
//!
//! The tracer only needs three things from a backend: build a client from
//! credentials, do one cheap read to prove connectivity, and (optionally)
//! produce a deep link for a session. [`HttpBackend`] implements that plus
//! run submission over HTTP with `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;

use flowtrace_core::RunTrace;

use crate::error::BackendError;
use crate::session::DebugSession;

/// Credentials and locations for the backend.
#[derive(Debug, Clone)]
pub struct BackendCredentials {
    pub api_key: String,
    /// API base URL.
    pub endpoint: String,
    /// UI base URL used for deep links.
    pub ui_url: String,
}

/// Builds backend clients.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, credentials: &BackendCredentials)
        -> Result<Arc<dyn BackendClient>, BackendError>;
}

/// A connected backend.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Cheap read used to verify connectivity.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Deep link to `session` in the backend UI.
    fn session_url(&self, project: &str, session: &DebugSession) -> Option<String>;

    /// Forwards one finished run.
    async fn submit_run(&self, project: &str, trace: &RunTrace) -> Result<(), BackendError>;
}

/// Connector producing [`HttpBackend`] clients.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Option<Duration>,
}

impl HttpConnector {
    pub fn new() -> Self {
        HttpConnector {
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendConnector for HttpConnector {
    fn connect(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<Arc<dyn BackendClient>, BackendError> {
        let mut key = HeaderValue::from_str(&credentials.api_key)
            .map_err(|err| BackendError::InvalidCredentials(err.to_string()))?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        Ok(Arc::new(HttpBackend {
            client,
            endpoint: credentials.endpoint.trim_end_matches('/').to_string(),
            ui_url: credentials.ui_url.trim_end_matches('/').to_string(),
        }))
    }
}

/// HTTP implementation of [`BackendClient`].
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    ui_url: String,
}

impl HttpBackend {
    async fn check(response: reqwest::Response) -> Result<(), BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/sessions", self.endpoint))
            .query(&[("limit", "1")])
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;
        Self::check(response).await
    }

    fn session_url(&self, project: &str, session: &DebugSession) -> Option<String> {
        Some(format!(
            "{}/projects/{}/sessions/{}",
            self.ui_url, project, session.session_id
        ))
    }

    async fn submit_run(&self, project: &str, trace: &RunTrace) -> Result<(), BackendError> {
        let body = run_payload(project, trace);
        let response = self
            .client
            .post(format!("{}/runs", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Request(err.to_string()))?;
        Self::check(response).await
    }
}

/// JSON body for one forwarded run.
pub fn run_payload(project: &str, trace: &RunTrace) -> serde_json::Value {
    json!({
        "id": trace.trace_id,
        "name": trace.workflow_name,
        "run_type": "chain",
        "session_name": project,
        "start_time": trace.start_time,
        "end_time": trace.end_time,
        "status": trace.status,
        "inputs": trace.input_data,
        "outputs": trace.output_data,
        "error": trace.error,
        "extra": {
            "metadata": trace.metadata,
            "steps": trace.steps,
        },
    })
}
