//! Bounded fan-out with partial-failure aggregation.
//!
//! A [`TaskGroup`] runs independent units of work on the tokio runtime with
//! at most `limit` of them executing at once. A failing unit never stops
//! its siblings: every unit runs to completion and [`TaskGroup::wait`]
//! reports all failures together.
//!
//! Units run as spawned tasks, so a panic inside one is caught by the
//! runtime and reported as [`PipelineError::Panicked`]. With a release
//! profile built with `panic = "abort"` that isolation is impossible and a
//! panic takes down the process.
//!
//! # Usage
//!
//! ```ignore
//! let mut group = TaskGroup::new(ctx.parallelism);
//! for artifact in artifacts {
//!     group.spawn(async move { upload(artifact).await }).await;
//! }
//! group.wait().await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

/// A concurrency-limited set of fallible units of work.
///
/// Created at the start of a fan-out and consumed by [`TaskGroup::wait`].
#[derive(Debug)]
pub struct TaskGroup {
    semaphore: Option<Arc<Semaphore>>,
    cancel: Option<CancellationToken>,
    tasks: JoinSet<Result<()>>,
}

impl TaskGroup {
    /// Create a group running at most `limit` units at once.
    ///
    /// A `limit` of zero means unbounded.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: (limit > 0).then(|| Arc::new(Semaphore::new(limit))),
            cancel: None,
            tasks: JoinSet::new(),
        }
    }

    /// Abort units at their next await point once `token` is cancelled.
    ///
    /// Units that have not started yet fail with [`PipelineError::Cancelled`]
    /// without running.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Schedule one unit.
    ///
    /// Waits for a free slot when `limit` units are already in flight.
    pub async fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = match &self.semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    tokio::select! {
                        biased;
                        () = token.cancelled() => Err(PipelineError::Cancelled),
                        result = unit => result,
                    }
                }
                None => unit.await,
            }
        });
    }

    /// Wait for every scheduled unit and combine their failures.
    ///
    /// Returns `Ok(())` when all units succeeded and
    /// [`PipelineError::Aggregate`] listing every failure otherwise. Nested
    /// aggregates returned by units are flattened.
    pub async fn wait(mut self) -> Result<()> {
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.extend(err.into_failures()),
                Err(err) => failures.push(join_failure(err)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Aggregate(failures))
        }
    }
}

fn join_failure(err: JoinError) -> PipelineError {
    if err.is_cancelled() {
        return PipelineError::Cancelled;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    PipelineError::Panicked(message)
}
