//! Bounded pool for CPU/IO-heavy blocking jobs.
//!
//! Rendering, QR decoding and PDF rewriting are blocking work: pdfium is not
//! async-safe and lopdf/image are synchronous. Jobs run on tokio's blocking
//! thread pool (`spawn_blocking`), gated by a semaphore so at most
//! `concurrency` of them run at once. The caller awaits the job's result
//! directly, so completion is always observable and tests can wait for a
//! deterministic outcome instead of racing detached background work.
//!
//! A job that has started is never cancelled: dropping the awaiting future
//! only discards the result.

use crate::error::PaperPilotError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Semaphore-gated `spawn_blocking`.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Jobs that could start right now without waiting.
    pub fn idle_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on the blocking pool once a slot is free and return its output.
    ///
    /// `name` is only used for logging. A panicking job surfaces as
    /// [`PaperPilotError::Internal`].
    pub async fn run<F, T>(&self, name: &str, job: F) -> Result<T, PaperPilotError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PaperPilotError::Internal("Worker pool is closed".into()))?;
        debug!(job = name, "Worker job started");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        let out = handle
            .await
            .map_err(|e| PaperPilotError::Internal(format!("{} task panicked: {}", name, e)))?;
        debug!(job = name, "Worker job finished");
        Ok(out)
    }
}
