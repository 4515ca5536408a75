//! Session management, backend forwarding and the sample summarize workflow
//! built on `flowtrace-core`.
//!
//! [`tracer::Tracer`] owns the debug-session registry and the best-effort
//! connection to an external trace backend. Every tracer operation has a
//! defined, non-failing result when the backend is absent or unreachable.

pub mod backend;
pub mod error;
pub mod llm_provider;
pub mod session;
pub mod tracer;
pub mod workflow;
