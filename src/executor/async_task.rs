//! Detached execution with polling and a wall-clock ceiling.
//!
//! A long-running task can opt into asynchronous execution: the apply step
//! is spawned onto the runtime and completion is polled at the caller's
//! interval. When the ceiling passes first, the caller gets `None` and
//! treats the task as failed with a timeout classification; the spawned
//! work is left running, not aborted, so the remote side effect is never
//! killed halfway.

use std::future::Future;
use tokio::time::Instant;
use tracing::debug;

use crate::playbook::AsyncSpec;

/// Run a future detached, polling for completion until the ceiling.
///
/// Returns `Some(output)` on completion within the ceiling, `None` when the
/// ceiling passed first (the future keeps running detached). A panicked
/// future also yields `None`.
pub(crate) async fn run_with_ceiling<T, F>(fut: F, spec: &AsyncSpec) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    let deadline = Instant::now() + spec.timeout;

    loop {
        if handle.is_finished() {
            return handle.await.ok();
        }

        let now = Instant::now();
        if now >= deadline {
            debug!("wall-clock ceiling reached, detaching");
            return None;
        }

        let wait = spec.poll.min(deadline - now);
        tokio::time::sleep(wait).await;
    }
}
