//! Session manager and best-effort backend connection.
//!
//! [`Tracer`] is constructed explicitly and passed to whoever needs it;
//! there is no process-wide instance. Sessions live in a `DashMap` registry
//! that works the same whether or not the backend is reachable: the only
//! observable differences are [`Tracer::is_available`] and the `link` field
//! of a [`SessionSummary`].

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::RwLock;

use flowtrace_core::{RunTrace, SessionId, TraceId, TracingConfig, TracingSettings};

use crate::backend::{BackendClient, BackendConnector, BackendCredentials, HttpConnector};
use crate::error::BackendError;
use crate::session::{
    DebugSession, SessionConfiguration, SessionStatus, SessionSummary,
};

struct SessionEntry {
    /// Creation order, used to break `created_at` ties.
    sequence: u64,
    session: DebugSession,
}

/// Debug-session registry plus optional trace backend.
pub struct Tracer {
    config: TracingConfig,
    settings: Arc<TracingSettings>,
    connector: Arc<dyn BackendConnector>,
    client: RwLock<Option<Arc<dyn BackendClient>>>,
    available: AtomicBool,
    sessions: DashMap<SessionId, SessionEntry>,
    next_sequence: AtomicU64,
}

impl Tracer {
    /// Creates a tracer that reaches the backend through `connector`.
    pub fn new(
        config: TracingConfig,
        settings: Arc<TracingSettings>,
        connector: Arc<dyn BackendConnector>,
    ) -> Self {
        Tracer {
            config,
            settings,
            connector,
            client: RwLock::new(None),
            available: AtomicBool::new(false),
            sessions: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Creates a tracer backed by the HTTP backend client.
    pub fn from_config(config: TracingConfig, settings: Arc<TracingSettings>) -> Self {
        Self::new(config, settings, Arc::new(HttpConnector::new()))
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<TracingSettings> {
        &self.settings
    }

    /// Connects to the backend. Never fails: any problem, including a panic
    /// inside the client, is logged and reported as `false`.
    pub async fn initialize(&self) -> bool {
        if !self.config.enabled {
            tracing::info!("backend tracing disabled; sessions stay local");
            self.mark_unavailable().await;
            return false;
        }
        let Some(api_key) = self.config.api_key.clone() else {
            tracing::info!("no backend credentials configured; sessions stay local");
            self.mark_unavailable().await;
            return false;
        };

        let credentials = BackendCredentials {
            api_key,
            endpoint: self.config.endpoint.clone(),
            ui_url: self.config.ui_url.clone(),
        };
        let connector = Arc::clone(&self.connector);
        let attempt = async move {
            let client = connector.connect(&credentials)?;
            client.probe().await?;
            Ok::<_, BackendError>(client)
        };

        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(client)) => {
                *self.client.write().await = Some(client);
                self.available.store(true, Ordering::SeqCst);
                tracing::info!(project = %self.config.project, "trace backend connected");
                true
            }
            Ok(Err(err)) => {
                tracing::warn!("trace backend unavailable: {}", err);
                self.mark_unavailable().await;
                false
            }
            Err(_) => {
                tracing::warn!("trace backend client panicked during initialization");
                self.mark_unavailable().await;
                false
            }
        }
    }

    async fn mark_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
        *self.client.write().await = None;
    }

    /// True only after a successful [`Tracer::initialize`].
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Opens a session. Succeeds regardless of backend availability.
    pub fn start_session(&self, name: impl Into<String>) -> SessionId {
        let configuration = SessionConfiguration {
            verbosity: self.settings.verbosity(),
            backend_available: self.is_available(),
            project: self.config.project.clone(),
        };
        let session = DebugSession::new(name, configuration);
        let id = session.session_id;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        tracing::info!(session_id = %id, name = %session.name, "debug session started");
        self.sessions.insert(id, SessionEntry { sequence, session });
        id
    }

    /// Ends a session and returns a freshly computed summary.
    ///
    /// Unknown ids yield a `not_found` summary. `ended_at` is stamped on the
    /// first call only; repeated calls recompute counts from the registry.
    pub async fn end_session(&self, session_id: SessionId) -> SessionSummary {
        let session = {
            let Some(mut entry) = self.sessions.get_mut(&session_id) else {
                tracing::debug!(session_id = %session_id, "end_session for unknown session");
                return SessionSummary::not_found(session_id);
            };
            let session = &mut entry.session;
            if session.ended_at.is_none() {
                session.ended_at = Some(Utc::now().max(session.created_at));
            }
            session.status = SessionStatus::Completed;
            session.clone()
        };

        let link = if self.is_available() {
            self.client
                .read()
                .await
                .as_ref()
                .and_then(|client| client.session_url(&self.config.project, &session))
        } else {
            None
        };

        let summary = SessionSummary::for_session(&session, link);
        tracing::info!(
            session_id = %session_id,
            traces = summary.trace_count,
            "debug session ended"
        );
        summary
    }

    /// Associates a trace with a session. Returns `false` for unknown ids.
    pub fn add_trace(&self, session_id: SessionId, trace_id: TraceId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut entry) => {
                entry.session.trace_ids.push(trace_id);
                true
            }
            None => false,
        }
    }

    pub fn get_session(&self, session_id: SessionId) -> Option<DebugSession> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.session.clone())
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Vec<DebugSession> {
        let mut entries: Vec<(u64, DebugSession)> = self
            .sessions
            .iter()
            .map(|entry| (entry.sequence, entry.session.clone()))
            .collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        entries.into_iter().map(|(_, session)| session).collect()
    }

    /// Forwards a finished trace to the backend. Returns `false`, without
    /// failing, when the backend is unavailable or rejects the run.
    pub async fn report_trace(&self, trace: &RunTrace) -> bool {
        if !self.is_available() {
            return false;
        }
        let Some(client) = self.client.read().await.clone() else {
            return false;
        };
        match client.submit_run(&self.config.project, trace).await {
            Ok(()) => {
                tracing::debug!(trace_id = %trace.trace_id, "trace forwarded to backend");
                true
            }
            Err(err) => {
                tracing::warn!(trace_id = %trace.trace_id, "trace forwarding failed: {}", err);
                false
            }
        }
    }
}
