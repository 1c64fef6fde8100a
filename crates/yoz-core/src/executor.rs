//! Concurrent task executor.
//!
//! Every matched handler and every fired scheduler callback runs through
//! [`TaskExecutor::execute`]. The call returns immediately: a supervising
//! task spawns the work in its own task, waits for it up to a fixed bound,
//! and classifies what happened as an [`ExecutionOutcome`].
//!
//! Outcomes never travel back to the caller. They are logged, counted, and
//! published to anyone who [`subscribe`](TaskExecutor::subscribe)s.
//!
//! A task that exceeds the bound is **not** cancelled. The supervisor stops
//! waiting and the task keeps running detached until it finishes on its own.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::BoxError;

/// Default bound on how long a supervisor waits for its task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(1);

const REPORT_CHANNEL_CAPACITY: usize = 256;

/// How a single execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionOutcome {
    /// Completed without error inside the bound.
    Success,
    /// Returned an error or panicked inside the bound.
    Failure,
    /// Still running when the bound expired. Left running detached.
    Timeout,
}

/// Report published for every supervised execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Label given at submission, usually `<module>:<command or event>`.
    pub task: Arc<str>,
    pub outcome: ExecutionOutcome,
    /// Error or panic message for [`ExecutionOutcome::Failure`].
    pub error: Option<String>,
    /// Time between the task starting and the supervisor deciding.
    pub elapsed: Duration,
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long a supervisor waits before classifying a timeout.
    pub timeout: Duration,
    /// Upper bound on tasks running at once. `None` is unbounded.
    pub max_concurrent: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TASK_TIMEOUT,
            max_concurrent: None,
        }
    }
}

/// Counters over every execution so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
}

/// Fire-and-forget executor with failure and timeout isolation.
///
/// Cloning is cheap; clones share counters, limits and the report channel.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
    reports: broadcast::Sender<ExecutionReport>,
    success: AtomicU64,
    failure: AtomicU64,
    timeout_count: AtomicU64,
}

impl TaskExecutor {
    /// Creates an executor.
    pub fn new(config: ExecutorConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ExecutorInner {
                timeout: config.timeout,
                permits: config.max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
                reports,
                success: AtomicU64::new(0),
                failure: AtomicU64::new(0),
                timeout_count: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the configured timeout bound.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Submits `task` and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute<F>(&self, label: impl Into<Arc<str>>, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let label = label.into();
        tokio::spawn(async move { inner.supervise(label, task).await });
    }

    /// Subscribes to execution reports.
    ///
    /// Only executions that finish after the call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionReport> {
        self.inner.reports.subscribe()
    }

    /// Returns a snapshot of the outcome counters.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            success: self.inner.success.load(Ordering::Relaxed),
            failure: self.inner.failure.load(Ordering::Relaxed),
            timeout: self.inner.timeout_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("timeout", &self.inner.timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ExecutorInner {
    async fn supervise<F>(&self, task: Arc<str>, work: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        // The permit moves into the task so it is released when the work
        // really ends, not when the supervisor gives up waiting.
        let permit = match &self.permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(task = %task, "Executor closed, task dropped");
                    return;
                }
            },
            None => None,
        };

        let started = Instant::now();
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            work.await
        });

        let (outcome, error) = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => (ExecutionOutcome::Success, None),
            Ok(Ok(Err(e))) => (ExecutionOutcome::Failure, Some(e.to_string())),
            Ok(Err(e)) => (ExecutionOutcome::Failure, Some(join_error_message(e))),
            Err(_) => (ExecutionOutcome::Timeout, None),
        };
        let elapsed = started.elapsed();

        match outcome {
            ExecutionOutcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                debug!(task = %task, elapsed_ms = elapsed.as_millis() as u64, "Task succeeded");
            }
            ExecutionOutcome::Failure => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = %task,
                    error = error.as_deref().unwrap_or_default(),
                    "Task failed"
                );
            }
            ExecutionOutcome::Timeout => {
                self.timeout_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = %task,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Task timed out, left running detached"
                );
            }
        }

        let _ = self.reports.send(ExecutionReport {
            task,
            outcome,
            error,
            elapsed,
        });
    }
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn executor(timeout_ms: u64) -> TaskExecutor {
        TaskExecutor::new(ExecutorConfig {
            timeout: Duration::from_millis(timeout_ms),
            max_concurrent: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_success() {
        let exec = executor(1000);
        let mut reports = exec.subscribe();
        exec.execute("ok", async { Ok(()) });

        let report = reports.recv().await.unwrap();
        assert_eq!(&*report.task, "ok");
        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert_eq!(exec.stats().success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_failure() {
        let exec = executor(1000);
        let mut reports = exec.subscribe();
        exec.execute("err", async { Err("boom".into()) });

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Failure);
        assert_eq!(report.error.as_deref(), Some("boom"));
        assert_eq!(exec.stats().failure, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_failure() {
        let exec = executor(1000);
        let mut reports = exec.subscribe();
        exec.execute("panic", async {
            panic!("handler exploded");
        });

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Failure);
        assert!(report.error.unwrap().contains("handler exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_task_running() {
        let exec = executor(1000);
        let mut reports = exec.subscribe();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        exec.execute("slow", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let report = reports.recv().await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Timeout);
        assert!(report.elapsed >= Duration::from_secs(1));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(exec.stats().timeout, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_returning_task_does_not_block_others() {
        let exec = executor(1000);
        let mut reports = exec.subscribe();
        exec.execute("stuck", std::future::pending());
        exec.execute("quick", async { Ok(()) });

        let first = reports.recv().await.unwrap();
        assert_eq!(&*first.task, "quick");
        let second = reports.recv().await.unwrap();
        assert_eq!(&*second.task, "stuck");
        assert_eq!(second.outcome, ExecutionOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_holds_permit_until_task_ends() {
        let exec = TaskExecutor::new(ExecutorConfig {
            timeout: Duration::from_millis(100),
            max_concurrent: Some(1),
        });
        let mut reports = exec.subscribe();
        let base = Instant::now();
        let second_started = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&second_started);

        exec.execute("first", async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        });
        tokio::task::yield_now().await;
        exec.execute("second", async move {
            *slot.lock() = Some(Instant::now());
            Ok(())
        });

        assert_eq!(reports.recv().await.unwrap().outcome, ExecutionOutcome::Timeout);
        assert_eq!(reports.recv().await.unwrap().outcome, ExecutionOutcome::Success);
        let started = (*second_started.lock()).expect("second task ran");
        assert!(started - base >= Duration::from_millis(500));
    }
}
