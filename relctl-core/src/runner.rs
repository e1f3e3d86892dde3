//! Bounded-parallel task runner.
//!
//! Every batch job (object imports, resource deletion) funnels through [`run`].
//! Tasks are nullary closures returning a future; each one is spawned onto the
//! tokio runtime, so a task may itself call [`run`] on a smaller batch.

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("task batch cancelled")]
    Cancelled,
    #[error(transparent)]
    Task(E),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Runs `tasks` with at most `max_workers` in flight and returns their results
/// in input order.
///
/// The first task error stops dispatch. Tasks already running are awaited
/// before the error is returned. Cancellation of `cancel` returns
/// [`RunError::Cancelled`] immediately and leaves running tasks detached.
/// A `max_workers` of zero is treated as one.
pub async fn run<T, E, F, Fut>(
    tasks: Vec<F>,
    max_workers: usize,
    cancel: &CancellationToken,
) -> Result<Vec<T>, RunError<E>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = tasks.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    let workers = max_workers.clamp(1, total);
    debug!(total, workers, "[RUNNER] Dispatching task batch");

    let mut pending = tasks.into_iter().enumerate();
    let mut in_flight: JoinSet<(usize, Result<T, E>)> = JoinSet::new();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();

    for (idx, task) in pending.by_ref().take(workers) {
        in_flight.spawn(async move { (idx, task().await) });
    }

    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(total, "[RUNNER] Cancelled with tasks still in flight");
                in_flight.detach_all();
                return Err(RunError::Cancelled);
            }
            joined = in_flight.join_next() => joined,
        };
        let Some(joined) = joined else {
            break;
        };

        match joined {
            Ok((idx, Ok(value))) => {
                results[idx] = Some(value);
                if let Some((next, task)) = pending.next() {
                    in_flight.spawn(async move { (next, task().await) });
                }
            }
            Ok((idx, Err(e))) => {
                warn!(task = idx, "[RUNNER] Task failed, no further tasks dispatched");
                drain(&mut in_flight, cancel).await;
                return Err(RunError::Task(e));
            }
            Err(join_err) => {
                warn!(error = %join_err, "[RUNNER] Task panicked");
                drain(&mut in_flight, cancel).await;
                return Err(RunError::Panicked(join_err.to_string()));
            }
        }
    }

    Ok(results.into_iter().flatten().collect())
}

async fn drain<T: 'static>(in_flight: &mut JoinSet<T>, cancel: &CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                in_flight.detach_all();
                return;
            }
            next = in_flight.join_next() => {
                if next.is_none() {
                    return;
                }
            }
        }
    }
}
