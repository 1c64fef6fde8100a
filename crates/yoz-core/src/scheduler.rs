//! Time-ordered scheduler ("timeline").
//!
//! Callbacks are queued by absolute fire time under a caller-chosen id. A
//! single background task sleeps until the earliest entry is due and hands
//! the callback to the [`TaskExecutor`], so a slow or failing callback never
//! delays the ones after it.
//!
//! Cancellation is soft. [`Scheduler::remove`] only forgets the id; the
//! queued entry stays in place and is discarded when it reaches the head.
//! Re-adding an id that is still pending supersedes the earlier entry.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::BoxError;
use crate::executor::TaskExecutor;

/// Upper bound on a deadline, about 30 years out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A queued callback, erased to a boxed one-shot future factory.
pub type ScheduledCallback = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

struct ScheduledTask {
    id: String,
    generation: u64,
    fire_at: Instant,
    callback: ScheduledCallback,
}

#[derive(Default)]
struct Timeline {
    /// Sorted by `fire_at`; equal times keep insertion order.
    tasks: VecDeque<ScheduledTask>,
    /// Live ids and the generation of their current entry.
    live: HashMap<String, u64>,
    next_generation: u64,
}

impl Timeline {
    fn is_live(&self, task: &ScheduledTask) -> bool {
        self.live.get(&task.id) == Some(&task.generation)
    }

    /// Drops dead entries at the head and returns the next deadline.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(head) = self.tasks.front() {
            if self.is_live(head) {
                return Some(head.fire_at);
            }
            trace!(id = %head.id, "Discarding cancelled entry");
            self.tasks.pop_front();
        }
        None
    }

    /// Pops the head if it is due and still live.
    fn pop_due(&mut self, now: Instant) -> Option<ScheduledTask> {
        if self.tasks.front().is_none_or(|head| head.fire_at > now) {
            return None;
        }
        let task = self.tasks.pop_front()?;
        if self.is_live(&task) {
            self.live.remove(&task.id);
            Some(task)
        } else {
            None
        }
    }
}

struct SchedulerInner {
    name: String,
    timeline: Mutex<Timeline>,
    wake: Notify,
    executor: TaskExecutor,
    shutdown: CancellationToken,
}

/// Handle to a running timeline.
///
/// Clones share the same timeline. The background task stops when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    _guard: Arc<DropGuard>,
}

impl Scheduler {
    /// Starts a timeline whose callbacks run on `executor`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, executor: TaskExecutor) -> Self {
        let shutdown = CancellationToken::new();
        let inner = Arc::new(SchedulerInner {
            name: name.into(),
            timeline: Mutex::new(Timeline::default()),
            wake: Notify::new(),
            executor,
            shutdown: shutdown.clone(),
        });
        tokio::spawn(Arc::clone(&inner).run());
        Self {
            inner,
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }

    /// Returns the timeline name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Schedules `callback` to run after `delay`.
    ///
    /// Delays beyond about 30 years are clamped and effectively never fire.
    pub fn add<F, Fut>(&self, id: impl Into<String>, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.insert(id.into(), deadline_after(delay), boxed(callback));
    }

    /// Schedules `callback` at a wall-clock time. Past times fire immediately.
    pub fn add_at<F, Fut>(&self, id: impl Into<String>, at: SystemTime, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        self.insert(id.into(), deadline_after(delay), boxed(callback));
    }

    /// Cancels a pending entry.
    ///
    /// Returns `false` if the id is unknown or its callback was already
    /// dequeued, in which case nothing changes.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.inner.timeline.lock().live.remove(id).is_some();
        if removed {
            debug!(timeline = %self.inner.name, id, "Scheduled task cancelled");
        }
        removed
    }

    /// Returns `true` if `id` is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.timeline.lock().live.contains_key(id)
    }

    /// Number of pending ids.
    pub fn len(&self) -> usize {
        self.inner.timeline.lock().live.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending entry and returns how many there were. The
    /// timeline keeps running.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut timeline = self.inner.timeline.lock();
            timeline.tasks.clear();
            timeline.live.drain().count()
        };
        if cleared > 0 {
            debug!(timeline = %self.inner.name, cleared, "Scheduled tasks cleared");
        }
        self.inner.wake.notify_one();
        cleared
    }

    /// Stops the background task. Pending entries never fire.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn insert(&self, id: String, fire_at: Instant, callback: ScheduledCallback) {
        {
            let mut timeline = self.inner.timeline.lock();
            timeline.next_generation += 1;
            let generation = timeline.next_generation;
            if timeline.live.insert(id.clone(), generation).is_some() {
                debug!(timeline = %self.inner.name, id = %id, "Superseding pending task");
            }
            let at = timeline.tasks.partition_point(|t| t.fire_at <= fire_at);
            timeline.tasks.insert(
                at,
                ScheduledTask {
                    id,
                    generation,
                    fire_at,
                    callback,
                },
            );
        }
        self.inner.wake.notify_one();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("pending", &self.len())
            .finish()
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>) {
        debug!(timeline = %self.name, "Timeline started");
        loop {
            let deadline = self.timeline.lock().next_deadline();
            match deadline {
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.wake.notified() => continue,
                    }
                }
                Some(deadline) if deadline > Instant::now() => {
                    // A nearer entry may be inserted while sleeping.
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.wake.notified() => continue,
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Some(_) => {}
            }

            let due = self.timeline.lock().pop_due(Instant::now());
            if let Some(task) = due {
                trace!(timeline = %self.name, id = %task.id, "Firing scheduled task");
                let label = format!("{}:{}", self.name, task.id);
                self.executor.execute(label, (task.callback)());
            }
        }
        debug!(timeline = %self.name, "Timeline stopped");
    }
}

fn deadline_after(delay: Duration) -> Instant {
    Instant::now() + delay.min(FAR_FUTURE)
}

fn boxed<F, Fut>(callback: F) -> ScheduledCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Box::new(move || Box::pin(callback()) as BoxFuture<'static, _>)
}
