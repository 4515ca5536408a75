//! Session manager behaviour with absent, broken and healthy backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use flowtrace_core::{RunTrace, SessionId, TraceId, TracingConfig, TracingSettings, Verbosity};
use flowtrace_runtime::backend::{BackendClient, BackendConnector, BackendCredentials};
use flowtrace_runtime::error::BackendError;
use flowtrace_runtime::session::{DebugSession, SessionStatus, SummaryStatus};
use flowtrace_runtime::tracer::Tracer;

#[derive(Clone, Copy)]
enum Behaviour {
    Healthy,
    ProbeFails,
    ConnectFails,
    Panics,
}

struct MockConnector {
    behaviour: Behaviour,
    connects: AtomicUsize,
}

impl MockConnector {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(MockConnector {
            behaviour,
            connects: AtomicUsize::new(0),
        })
    }
}

impl BackendConnector for MockConnector {
    fn connect(
        &self,
        credentials: &BackendCredentials,
    ) -> Result<Arc<dyn BackendClient>, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::ConnectFails => {
                Err(BackendError::InvalidCredentials("rejected".to_string()))
            }
            Behaviour::Panics => panic!("backend client exploded"),
            behaviour => Ok(Arc::new(MockClient {
                behaviour,
                ui: credentials.ui_url.clone(),
                submitted: AtomicUsize::new(0),
            })),
        }
    }
}

struct MockClient {
    behaviour: Behaviour,
    ui: String,
    submitted: AtomicUsize,
}

#[async_trait]
impl BackendClient for MockClient {
    async fn probe(&self) -> Result<(), BackendError> {
        match self.behaviour {
            Behaviour::ProbeFails => Err(BackendError::Request("connection refused".to_string())),
            _ => Ok(()),
        }
    }

    fn session_url(&self, project: &str, session: &DebugSession) -> Option<String> {
        Some(format!("{}/{}/{}", self.ui, project, session.session_id))
    }

    async fn submit_run(&self, _project: &str, _trace: &RunTrace) -> Result<(), BackendError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn credentialed() -> TracingConfig {
    TracingConfig {
        api_key: Some("secret".to_string()),
        project: "demo".to_string(),
        ui_url: "http://ui".to_string(),
        ..TracingConfig::default()
    }
}

fn tracer_with(config: TracingConfig, connector: Arc<MockConnector>) -> Tracer {
    let settings = Arc::new(TracingSettings::from_config(&config));
    Tracer::new(config, settings, connector)
}

#[tokio::test]
async fn no_credentials_degrades_to_local_sessions() {
    let connector = MockConnector::new(Behaviour::Healthy);
    let tracer = tracer_with(TracingConfig::default(), Arc::clone(&connector));

    assert!(!tracer.initialize().await);
    assert!(!tracer.is_available());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

    let id = tracer.start_session("debug-1");
    let summary = tracer.end_session(id).await;
    assert_eq!(summary.status, SummaryStatus::Completed);
    assert_eq!(summary.name.as_deref(), Some("debug-1"));
    assert_eq!(summary.trace_count, 0);
    assert!(summary.duration_ms.unwrap() >= 0);
    assert_eq!(summary.link, None);
    assert!(!tracer.report_trace(&RunTrace::new("wf")).await);
}

#[tokio::test]
async fn disabled_tracing_never_connects() {
    let connector = MockConnector::new(Behaviour::Healthy);
    let config = TracingConfig {
        enabled: false,
        ..credentialed()
    };
    let tracer = tracer_with(config, Arc::clone(&connector));

    assert!(!tracer.initialize().await);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(tracer.end_session(tracer.start_session("s")).await.link, None);
}

#[tokio::test]
async fn failing_backends_are_swallowed() {
    for behaviour in [Behaviour::ProbeFails, Behaviour::ConnectFails, Behaviour::Panics] {
        let tracer = tracer_with(credentialed(), MockConnector::new(behaviour));
        assert!(!tracer.initialize().await);
        assert!(!tracer.is_available());

        let id = tracer.start_session("still-works");
        assert!(tracer.add_trace(id, TraceId::new()));
        let summary = tracer.end_session(id).await;
        assert_eq!(summary.status, SummaryStatus::Completed);
        assert_eq!(summary.trace_count, 1);
        assert_eq!(summary.link, None);
    }
}

#[tokio::test]
async fn healthy_backend_links_sessions() {
    let tracer = tracer_with(credentialed(), MockConnector::new(Behaviour::Healthy));
    assert!(tracer.initialize().await);

    let id = tracer.start_session("linked");
    assert!(tracer.report_trace(&RunTrace::new("wf")).await);
    let summary = tracer.end_session(id).await;
    assert_eq!(summary.link, Some(format!("http://ui/demo/{}", id)));
}

#[tokio::test]
async fn ending_unknown_session_reports_not_found() {
    let tracer = tracer_with(TracingConfig::default(), MockConnector::new(Behaviour::Healthy));
    let missing = SessionId::new();

    let summary = tracer.end_session(missing).await;
    assert_eq!(summary.status, SummaryStatus::NotFound);
    assert_eq!(summary.session_id, missing);
    assert_eq!(summary.trace_count, 0);
    assert!(!tracer.add_trace(missing, TraceId::new()));
    assert!(tracer.get_session(missing).is_none());
}

#[tokio::test]
async fn ending_keeps_trace_order() {
    let tracer = tracer_with(TracingConfig::default(), MockConnector::new(Behaviour::Healthy));
    let id = tracer.start_session("ordered");
    let traces: Vec<TraceId> = (0..5).map(|_| TraceId::new()).collect();
    for trace in &traces {
        assert!(tracer.add_trace(id, *trace));
    }

    let before = tracer.get_session(id).unwrap();
    tracer.end_session(id).await;
    let after = tracer.get_session(id).unwrap();

    assert_eq!(before.trace_ids, traces);
    assert_eq!(after.trace_ids, traces);
    assert_eq!(after.status, SessionStatus::Completed);
    assert!(after.ended_at.unwrap() >= after.created_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_add_trace_loses_nothing() {
    let tracer = Arc::new(tracer_with(
        TracingConfig::default(),
        MockConnector::new(Behaviour::Healthy),
    ));
    let id = tracer.start_session("busy");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let tracer = Arc::clone(&tracer);
        tasks.push(tokio::spawn(async move {
            for _ in 0..25 {
                assert!(tracer.add_trace(id, TraceId::new()));
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(tracer.end_session(id).await.trace_count, 16 * 25);
}

#[tokio::test]
async fn sessions_freeze_configuration_at_start() {
    let tracer = tracer_with(credentialed(), MockConnector::new(Behaviour::Healthy));
    let offline = tracer.start_session("before-init");
    assert!(tracer.initialize().await);
    tracer.settings().set_verbosity(Verbosity::Debug);
    let online = tracer.start_session("after-init");

    let offline = tracer.get_session(offline).unwrap().configuration;
    let online = tracer.get_session(online).unwrap().configuration;
    assert!(!offline.backend_available);
    assert_eq!(offline.verbosity, Verbosity::Info);
    assert!(online.backend_available);
    assert_eq!(online.verbosity, Verbosity::Debug);
    assert_eq!(online.project, "demo");

    let names: Vec<String> = tracer.list_sessions().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["after-init".to_string(), "before-init".to_string()]);
}
