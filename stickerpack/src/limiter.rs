//! Concurrency limiter for CPU-bound image work.
//!
//! Resizing and encoding run on tokio's blocking pool. Without a bound, a
//! package with many stickers would queue hundreds of blocking jobs at once,
//! so every job first takes a permit from a shared semaphore.
//!
//! Builders also run their other blocking disk steps here (metadata,
//! manifests, archive folds), so [`ImageWorkers::wait_idle`] covers every
//! job that can still write into a working tree.
//!
//! The limiter also carries the pipeline's cancellation token: a job that is
//! still waiting for a permit when the pipeline is cancelled never starts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of concurrent image jobs.
pub fn default_image_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Bounded executor for blocking image jobs.
#[derive(Debug, Clone)]
pub struct ImageWorkers {
    semaphore: Arc<Semaphore>,
    permits: usize,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl ImageWorkers {
    /// Creates a limiter allowing `permits` concurrent jobs.
    pub fn new(permits: usize, cancel: CancellationToken) -> Self {
        let permits = permits.max(1);
        tracing::debug!(permits, "Created image worker limiter");
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Jobs currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A limiter sharing this one's permits but with its own cancellation
    /// and in-flight count.
    ///
    /// Used to give each build a token it can cancel without touching
    /// other builds.
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            semaphore: Arc::clone(&self.semaphore),
            permits: self.permits,
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    /// Wait until no job of this limiter is running.
    ///
    /// Blocking jobs cannot be aborted, so callers that remove a job's
    /// output directory wait for stragglers first.
    pub async fn wait_idle(&self) {
        while self.in_flight() > 0 {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Run `job` on the blocking pool once a permit is available.
    ///
    /// `label` identifies the job in errors and logs.
    pub async fn run<T, F>(&self, label: String, job: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> PipelineResult<T> + Send + 'static,
    {
        let permit = self.acquire(&label).await?;
        let guard = WorkerPermit::new(permit, Arc::clone(&self.in_flight));
        let cancel = self.cancel.clone();
        let job_label = label.clone();

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            // cancelled between acquiring the permit and being scheduled
            if cancel.is_cancelled() {
                return Err(PipelineError::cancelled(format!("image job {}", job_label)));
            }
            job()
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(e) => Err(PipelineError::image(format!("image job {} aborted: {}", label, e))),
        }
    }

    async fn acquire(&self, label: &str) -> PipelineResult<OwnedSemaphorePermit> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::cancelled(format!("image job {}", label)));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(PipelineError::cancelled(format!("image job {}", label)))
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| PipelineError::cancelled("image worker pool closed"))
            }
        }
    }
}

/// A held permit; counts as in flight until dropped.
struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPermit {
    fn new(permit: OwnedSemaphorePermit, in_flight: Arc<AtomicUsize>) -> Self {
        in_flight.fetch_add(1, Ordering::Relaxed);
        Self {
            _permit: permit,
            in_flight,
        }
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
