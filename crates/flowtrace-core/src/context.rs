//! Ambient "current trace" slot.
//!
//! Each logical execution gets its own slot through [`with_trace_scope`],
//! backed by a tokio task-local, so concurrent pipeline runs in one process
//! never see each other's trace. Reading an unset slot, or reading outside
//! any scope, yields `None`; instrumentation treats that as "not tracing".
//!
//! Spawned tasks do not inherit the slot. A step that fans work out to
//! another task must open a scope there itself if it wants it recorded.

use std::cell::RefCell;
use std::future::Future;

use crate::model::TraceHandle;

tokio::task_local! {
    static CURRENT_TRACE: RefCell<Option<TraceHandle>>;
}

/// Runs `future` with its own trace slot, initialised to `trace`.
pub async fn with_trace_scope<F>(trace: Option<TraceHandle>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_TRACE.scope(RefCell::new(trace), future).await
}

/// Returns the trace installed in the current scope, if any.
pub fn get_current_trace() -> Option<TraceHandle> {
    CURRENT_TRACE
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Replaces the trace in the current scope.
///
/// Returns `false`, and does nothing, when called outside any scope.
pub fn set_current_trace(trace: Option<TraceHandle>) -> bool {
    CURRENT_TRACE
        .try_with(|slot| {
            *slot.borrow_mut() = trace;
        })
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunTrace;

    #[tokio::test]
    async fn unset_outside_scope() {
        assert!(get_current_trace().is_none());
        assert!(!set_current_trace(Some(TraceHandle::new(RunTrace::new("x")))));
        assert!(get_current_trace().is_none());
    }

    #[tokio::test]
    async fn scope_exposes_and_replaces_trace() {
        let first = TraceHandle::new(RunTrace::new("first"));
        let second = TraceHandle::new(RunTrace::new("second"));

        with_trace_scope(Some(first.clone()), async {
            assert_eq!(get_current_trace().unwrap().trace_id(), first.trace_id());

            assert!(set_current_trace(Some(second.clone())));
            assert_eq!(get_current_trace().unwrap().trace_id(), second.trace_id());

            assert!(set_current_trace(None));
            assert!(get_current_trace().is_none());
        })
        .await;

        assert!(get_current_trace().is_none());
    }

    #[tokio::test]
    async fn empty_scope_reads_none() {
        with_trace_scope(None, async {
            assert!(get_current_trace().is_none());
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_are_isolated() {
        let mut tasks = Vec::new();
        for i in 0..16 {
            tasks.push(tokio::spawn(async move {
                let handle = TraceHandle::new(RunTrace::new(format!("run-{i}")));
                let expected = handle.trace_id();
                with_trace_scope(Some(handle), async move {
                    for _ in 0..10 {
                        tokio::task::yield_now().await;
                        assert_eq!(get_current_trace().unwrap().trace_id(), expected);
                    }
                })
                .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn spawned_task_does_not_inherit_slot() {
        let handle = TraceHandle::new(RunTrace::new("parent"));
        with_trace_scope(Some(handle), async {
            let seen = tokio::spawn(async { get_current_trace().is_some() })
                .await
                .unwrap();
            assert!(!seen);
        })
        .await;
    }
}
