//! In-process finalization queue: an adaptive multi-worker pool with
//! retry/backoff, priority, pause/resume and metrics.
//!
//! Workers compete for tasks on an internal priority heap (lower number
//! first; the finalizer uses 0 for everything). A control loop rescales the
//! worker count from observed throughput, latency and error rate; rate
//! limiting additionally triggers an immediate 30% downshift. Every state
//! change is emitted as a [`QueueEvent`] on a broadcast channel and logged.

use rand::Rng;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// Rolling window used for the success rate and average duration.
const METRICS_WINDOW: usize = 100;
/// Rate-limit backoff is capped here regardless of attempt count.
const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub initial_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Per-task attempt budget.
    pub max_attempts: u32,
    /// Base backoff unit; doubled (tripled for 429) per attempt.
    pub retry_delay: Duration,
    pub metrics_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            initial_concurrency: 5,
            min_concurrency: 1,
            max_concurrency: 20,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

/// Failure classification driving the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// HTTP 429: retried with the widened backoff plus a concurrency
    /// downshift.
    RateLimited(String),
    /// HTTP 5xx, connection failures, timeouts: retried.
    Transient(String),
    /// Validation and other HTTP 4xx, or anything unrecognized: not
    /// retried.
    Permanent(String),
}

impl TaskError {
    pub fn should_retry(&self) -> bool {
        matches!(self, TaskError::RateLimited(_) | TaskError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::RateLimited(msg) => msg,
            TaskError::Transient(msg) => msg,
            TaskError::Permanent(msg) => msg,
        }
    }
}

pub type TaskResult = Result<(), TaskError>;
type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
/// Task body, invoked once per attempt with the 1-based attempt number.
pub type TaskFn = Box<dyn Fn(u32) -> TaskFuture + Send + Sync>;
type FailFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// Invoked exactly once when a task exhausts its budget or fails
/// permanently.
pub type OnFailed = Box<dyn FnOnce(TaskError) -> FailFuture + Send>;

/// Observable queue lifecycle events.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    TaskStart { id: u64, attempt: u32 },
    TaskComplete { id: u64, attempt: u32 },
    TaskError { id: u64, attempt: u32, error: String },
    TaskRetry { id: u64, next_attempt: u32, delay: Duration },
    TaskFailed { id: u64, attempts: u32, error: String },
    ConcurrencyAdjusted { from: usize, to: usize, reason: String },
    MetricsTick(QueueMetrics),
    Paused,
    Resumed,
}

/// Point-in-time queue statistics for `/monitoring/metrics`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub queue_length: usize,
    pub running: usize,
    pub concurrency: usize,
    pub paused: bool,
    pub completed: u64,
    pub failed: u64,
    /// Share of successful tasks in the rolling window, 0..1. Defaults to
    /// 1 with no samples.
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_processing_ms: u64,
}

struct QueuedTask {
    id: u64,
    priority: i32,
    seq: u64,
    attempt: u32,
    task: Arc<TaskFn>,
    on_failed: Option<OnFailed>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    // BinaryHeap is a max-heap; invert so lower priority numbers (then
    // earlier sequence) pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct Sample {
    duration: Duration,
    success: bool,
}

struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    running: usize,
    concurrency: usize,
    paused: bool,
    completed: u64,
    failed: u64,
    recent: VecDeque<Sample>,
    next_seq: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    config: QueueConfig,
    wakeup: Notify,
    idle: Notify,
    events: broadcast::Sender<QueueEvent>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl QueueInner {
    fn emit(&self, event: QueueEvent) {
        match &event {
            QueueEvent::TaskFailed { id, attempts, error } => {
                tracing::warn!(
                    task = *id,
                    attempts = *attempts,
                    error = %error,
                    "Finalization task failed"
                )
            }
            QueueEvent::TaskRetry { id, next_attempt, delay } => {
                tracing::debug!(
                    task = *id,
                    next_attempt = *next_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Finalization task retry"
                )
            }
            QueueEvent::ConcurrencyAdjusted { from, to, reason } => {
                tracing::info!(
                    from = *from,
                    to = *to,
                    reason = %reason,
                    "Queue concurrency adjusted"
                )
            }
            QueueEvent::Paused => tracing::info!("Queue paused"),
            QueueEvent::Resumed => tracing::info!("Queue resumed"),
            _ => {}
        }
        let _ = self.events.send(event);
    }

    fn metrics_snapshot(&self) -> QueueMetrics {
        let state = self.state.lock().expect("queue lock poisoned");
        let samples = state.recent.len();
        let (successes, total_ms) = state.recent.iter().fold((0u64, 0u128), |(s, ms), sample| {
            (
                s + u64::from(sample.success),
                ms + sample.duration.as_millis(),
            )
        });
        let success_rate = if samples == 0 {
            1.0
        } else {
            successes as f64 / samples as f64
        };
        QueueMetrics {
            queue_length: state.pending.len(),
            running: state.running,
            concurrency: state.concurrency,
            paused: state.paused,
            completed: state.completed,
            failed: state.failed,
            success_rate,
            error_rate: 1.0 - success_rate,
            avg_processing_ms: if samples == 0 {
                0
            } else {
                (total_ms / samples as u128) as u64
            },
        }
    }
}

/// Handle to the worker pool. Cloning shares the same queue.
#[derive(Clone)]
pub struct FinalizationQueue {
    inner: Arc<QueueInner>,
}

impl FinalizationQueue {
    pub fn new(config: QueueConfig) -> Self {
        let concurrency = config
            .initial_concurrency
            .clamp(config.min_concurrency, config.max_concurrency);
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                running: 0,
                concurrency,
                paused: false,
                completed: 0,
                failed: 0,
                recent: VecDeque::with_capacity(METRICS_WINDOW),
                next_seq: 0,
            }),
            config,
            wakeup: Notify::new(),
            idle: Notify::new(),
            events,
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });
        let queue = FinalizationQueue { inner };
        queue.spawn_dispatcher();
        queue.spawn_control_loop();
        queue
    }

    /// Enqueues a task. `on_failed` runs exactly once if the task fails
    /// permanently or exhausts its attempt budget.
    pub fn enqueue(&self, priority: i32, task: TaskFn, on_failed: Option<OnFailed>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(QueuedTask {
                id,
                priority,
                seq,
                attempt: 1,
                task: Arc::new(task),
                on_failed,
            });
        }
        self.inner.wakeup.notify_one();
        id
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().expect("queue lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().expect("queue lock poisoned").running
    }

    pub fn concurrency(&self) -> usize {
        self.inner.state.lock().expect("queue lock poisoned").concurrency
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.inner.metrics_snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock().expect("queue lock poisoned");
        if !state.paused {
            state.paused = true;
            drop(state);
            self.inner.emit(QueueEvent::Paused);
        }
    }

    pub fn resume(&self) {
        let mut state = self.inner.state.lock().expect("queue lock poisoned");
        if state.paused {
            state.paused = false;
            drop(state);
            self.inner.emit(QueueEvent::Resumed);
            self.inner.wakeup.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().expect("queue lock poisoned").paused
    }

    /// Manual override, clamped to the configured bounds.
    pub fn set_concurrency(&self, concurrency: usize) {
        let clamped = concurrency.clamp(
            self.inner.config.min_concurrency,
            self.inner.config.max_concurrency,
        );
        let from = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let from = state.concurrency;
            state.concurrency = clamped;
            from
        };
        if from != clamped {
            self.inner.emit(QueueEvent::ConcurrencyAdjusted {
                from,
                to: clamped,
                reason: "manual".to_string(),
            });
            self.inner.wakeup.notify_one();
        }
    }

    /// Resolves once the queue is idle (nothing pending or running).
    pub async fn drain(&self) {
        loop {
            // Register for the idle signal before checking, so a worker
            // finishing in between can not be missed.
            let notified = self.inner.idle.notified();
            {
                let state = self.inner.state.lock().expect("queue lock poisoned");
                if state.pending.is_empty() && state.running == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Stops the dispatcher and control loops. Pending tasks stay queued.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.wakeup.notify_one();
    }

    fn spawn_dispatcher(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                if inner.shutdown.is_cancelled() {
                    return;
                }
                // Launch as many workers as the current limit allows.
                loop {
                    let task = {
                        let mut state = inner.state.lock().expect("queue lock poisoned");
                        if state.paused || state.running >= state.concurrency {
                            None
                        } else if let Some(task) = state.pending.pop() {
                            state.running += 1;
                            Some(task)
                        } else {
                            None
                        }
                    };
                    match task {
                        Some(task) => Self::spawn_worker(inner.clone(), task),
                        None => break,
                    }
                }
                tokio::select! {
                    _ = inner.wakeup.notified() => {}
                    _ = inner.shutdown.cancelled() => return,
                }
            }
        });
    }

    fn spawn_worker(inner: Arc<QueueInner>, mut task: QueuedTask) {
        tokio::spawn(async move {
            let attempt = task.attempt;
            inner.emit(QueueEvent::TaskStart { id: task.id, attempt });
            let started = Instant::now();
            let result = (task.task)(attempt).await;
            let duration = started.elapsed();

            match result {
                Ok(()) => {
                    let mut state = inner.state.lock().expect("queue lock poisoned");
                    state.running -= 1;
                    state.completed += 1;
                    push_sample(&mut state.recent, duration, true);
                    drop(state);
                    inner.emit(QueueEvent::TaskComplete { id: task.id, attempt });
                }
                Err(error) => {
                    inner.emit(QueueEvent::TaskError {
                        id: task.id,
                        attempt,
                        error: error.message().to_string(),
                    });
                    let rate_limited = matches!(error, TaskError::RateLimited(_));
                    if rate_limited {
                        downshift_for_rate_limit(&inner);
                    }
                    let retry = error.should_retry() && attempt < inner.config.max_attempts;
                    if retry {
                        let delay = backoff_delay(inner.config.retry_delay, attempt, rate_limited);
                        {
                            let mut state = inner.state.lock().expect("queue lock poisoned");
                            state.running -= 1;
                            push_sample(&mut state.recent, duration, false);
                        }
                        inner.emit(QueueEvent::TaskRetry {
                            id: task.id,
                            next_attempt: attempt + 1,
                            delay,
                        });
                        task.attempt += 1;
                        let inner_clone = inner.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            {
                                let mut state =
                                    inner_clone.state.lock().expect("queue lock poisoned");
                                let seq = state.next_seq;
                                state.next_seq += 1;
                                task.seq = seq;
                                state.pending.push(task);
                            }
                            inner_clone.wakeup.notify_one();
                        });
                    } else {
                        {
                            let mut state = inner.state.lock().expect("queue lock poisoned");
                            state.running -= 1;
                            state.failed += 1;
                            push_sample(&mut state.recent, duration, false);
                        }
                        inner.emit(QueueEvent::TaskFailed {
                            id: task.id,
                            attempts: attempt,
                            error: error.message().to_string(),
                        });
                        if let Some(on_failed) = task.on_failed.take() {
                            on_failed(error).await;
                        }
                    }
                }
            }
            inner.wakeup.notify_one();
            inner.idle.notify_waiters();
        });
    }

    fn spawn_control_loop(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.metrics_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = inner.shutdown.cancelled() => return,
                }
                let metrics = inner.metrics_snapshot();
                let (target, reason) = adaptive_target(
                    metrics.concurrency,
                    inner.config.min_concurrency,
                    inner.config.max_concurrency,
                    &metrics,
                );
                if target != metrics.concurrency {
                    {
                        let mut state = inner.state.lock().expect("queue lock poisoned");
                        state.concurrency = target;
                    }
                    inner.emit(QueueEvent::ConcurrencyAdjusted {
                        from: metrics.concurrency,
                        to: target,
                        reason,
                    });
                    inner.wakeup.notify_one();
                }
                inner.emit(QueueEvent::MetricsTick(inner.metrics_snapshot()));
            }
        });
    }
}

fn push_sample(recent: &mut VecDeque<Sample>, duration: Duration, success: bool) {
    if recent.len() == METRICS_WINDOW {
        recent.pop_front();
    }
    recent.push_back(Sample { duration, success });
}

/// Immediate 30% concurrency reduction on a rate-limit response, floored at
/// the configured minimum.
fn downshift_for_rate_limit(inner: &Arc<QueueInner>) {
    let (from, to) = {
        let mut state = inner.state.lock().expect("queue lock poisoned");
        let from = state.concurrency;
        let to = (((from as f64) * 0.7).floor() as usize).max(inner.config.min_concurrency);
        state.concurrency = to;
        (from, to)
    };
    if from != to {
        inner.emit(QueueEvent::ConcurrencyAdjusted {
            from,
            to,
            reason: "rate-limited".to_string(),
        });
    }
}

/// Backoff for the next attempt.
///
/// Transient errors: `retry_delay * 2^(attempt-1) + jitter(0..1s)`.
/// Rate limits: `retry_delay * 3^(attempt-1) + jitter(0..2s)`, capped at
/// 30 s.
pub(crate) fn backoff_delay(retry_delay: Duration, attempt: u32, rate_limited: bool) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let mut rng = rand::rng();
    if rate_limited {
        let base = retry_delay.saturating_mul(3u32.saturating_pow(exponent));
        let jitter = Duration::from_millis(rng.random_range(0..2000));
        (base + jitter).min(RATE_LIMIT_BACKOFF_CAP)
    } else {
        let base = retry_delay.saturating_mul(2u32.saturating_pow(exponent));
        let jitter = Duration::from_millis(rng.random_range(0..1000));
        base + jitter
    }
}

/// The adaptive concurrency rule set.
///
/// - Error rate above 10%: shrink to 80%.
/// - Bulk regime (more than 50 queued): cap at 70% of the maximum, grow
///   only when success > 98% and the average task takes under 3 s, shrink
///   when it takes over 8 s or success drops below 95%.
/// - Normal regime: grow when the backlog exceeds twice the worker count
///   with success > 98% and average under 4 s; shrink when the average
///   passes 10 s or success drops below 90%.
pub(crate) fn adaptive_target(
    current: usize,
    min: usize,
    max: usize,
    metrics: &QueueMetrics,
) -> (usize, String) {
    let avg = Duration::from_millis(metrics.avg_processing_ms);
    if metrics.error_rate > 0.10 {
        let target = (((current as f64) * 0.8).floor() as usize).clamp(min, max);
        return (target, "high error rate".to_string());
    }
    if metrics.queue_length > 50 {
        let cap = (((max as f64) * 0.7).floor() as usize).max(min);
        if avg > Duration::from_secs(8) || metrics.success_rate < 0.95 {
            return (
                current.saturating_sub(1).clamp(min, cap),
                "bulk regime degradation".to_string(),
            );
        }
        if metrics.success_rate > 0.98 && avg < Duration::from_secs(3) {
            return ((current + 1).clamp(min, cap), "bulk regime growth".to_string());
        }
        return (current.clamp(min, cap), "bulk regime cap".to_string());
    }
    if avg > Duration::from_secs(10) || metrics.success_rate < 0.90 {
        return (
            current.saturating_sub(1).clamp(min, max),
            "degraded throughput".to_string(),
        );
    }
    if metrics.queue_length > 2 * current
        && metrics.success_rate > 0.98
        && avg < Duration::from_secs(4)
    {
        return ((current + 1).clamp(min, max), "backlog growth".to_string());
    }
    (current, "steady".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};

    fn fast_config() -> QueueConfig {
        QueueConfig {
            initial_concurrency: 4,
            min_concurrency: 1,
            max_concurrency: 10,
            max_attempts: 5,
            retry_delay: Duration::from_millis(5),
            // Long enough that the control loop never interferes.
            metrics_interval: Duration::from_secs(3600),
        }
    }

    fn metrics(queue_length: usize, success_rate: f64, avg_ms: u64) -> QueueMetrics {
        QueueMetrics {
            queue_length,
            running: 0,
            concurrency: 0,
            paused: false,
            completed: 0,
            failed: 0,
            success_rate,
            error_rate: 1.0 - success_rate,
            avg_processing_ms: avg_ms,
        }
    }

    #[tokio::test]
    async fn test_tasks_complete_and_drain() {
        let queue = FinalizationQueue::new(fast_config());
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            queue.enqueue(
                0,
                Box::new(move |_| {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                        Ok(())
                    })
                }),
                None,
            );
        }
        queue.drain().await;
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(queue.metrics().completed, 10);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_transient_error_retries_until_success() {
        let queue = FinalizationQueue::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_task = attempts.clone();
        queue.enqueue(
            0,
            Box::new(move |_| {
                let attempts = attempts_in_task.clone();
                Box::pin(async move {
                    let n = attempts.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    if n < 3 {
                        Err(TaskError::Transient("503".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }),
            None,
        );
        queue.drain().await;
        // Retried tasks may still be sleeping when drain sees an empty
        // queue; wait until the third attempt lands.
        for _ in 0..200 {
            if attempts.load(AtomicOrdering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.drain().await;
        }
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(queue.metrics().completed, 1);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_permanent_error_fails_once_with_callback() {
        let queue = FinalizationQueue::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let attempts_in_task = attempts.clone();
        let failed_in_cb = failed.clone();
        queue.enqueue(
            0,
            Box::new(move |_| {
                let attempts = attempts_in_task.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, AtomicOrdering::SeqCst);
                    Err(TaskError::Permanent("bad tx".to_string()))
                })
            }),
            Some(Box::new(move |error| {
                let failed = failed_in_cb.clone();
                Box::pin(async move {
                    assert_eq!(error, TaskError::Permanent("bad tx".to_string()));
                    failed.store(true, AtomicOrdering::SeqCst);
                })
            })),
        );
        queue.drain().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 1);
        assert!(failed.load(AtomicOrdering::SeqCst));
        assert_eq!(queue.metrics().failed, 1);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_attempt_budget_exhaustion() {
        let mut config = fast_config();
        config.max_attempts = 2;
        let queue = FinalizationQueue::new(config);
        let attempts = Arc::new(AtomicU32::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let attempts_in_task = attempts.clone();
        let failed_in_cb = failed.clone();
        queue.enqueue(
            0,
            Box::new(move |_| {
                let attempts = attempts_in_task.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, AtomicOrdering::SeqCst);
                    Err(TaskError::Transient("flaky".to_string()))
                })
            }),
            Some(Box::new(move |_| {
                let failed = failed_in_cb.clone();
                Box::pin(async move {
                    failed.store(true, AtomicOrdering::SeqCst);
                })
            })),
        );
        for _ in 0..200 {
            if failed.load(AtomicOrdering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(attempts.load(AtomicOrdering::SeqCst), 2);
        assert!(failed.load(AtomicOrdering::SeqCst));
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_rate_limit_downshifts_concurrency() {
        let mut config = fast_config();
        config.initial_concurrency = 10;
        config.min_concurrency = 2;
        let queue = FinalizationQueue::new(config);
        assert_eq!(queue.concurrency(), 10);
        let first = Arc::new(AtomicBool::new(true));
        let first_in_task = first.clone();
        queue.enqueue(
            0,
            Box::new(move |_| {
                let first = first_in_task.clone();
                Box::pin(async move {
                    if first.swap(false, AtomicOrdering::SeqCst) {
                        Err(TaskError::RateLimited("429".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }),
            None,
        );
        for _ in 0..200 {
            if queue.concurrency() < 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // 30% reduction: 10 → 7.
        assert_eq!(queue.concurrency(), 7);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_pause_blocks_execution_until_resume() {
        let queue = FinalizationQueue::new(fast_config());
        queue.pause();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_task = ran.clone();
        queue.enqueue(
            0,
            Box::new(move |_| {
                let ran = ran_in_task.clone();
                Box::pin(async move {
                    ran.store(true, AtomicOrdering::SeqCst);
                    Ok(())
                })
            }),
            None,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(AtomicOrdering::SeqCst));
        assert_eq!(queue.len(), 1);

        queue.resume();
        queue.drain().await;
        assert!(ran.load(AtomicOrdering::SeqCst));
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let mut config = fast_config();
        config.initial_concurrency = 3;
        let queue = FinalizationQueue::new(config);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let live = live.clone();
            let peak = peak.clone();
            queue.enqueue(
                0,
                Box::new(move |_| {
                    let live = live.clone();
                    let peak = peak.clone();
                    Box::pin(async move {
                        let now = live.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                        peak.fetch_max(now, AtomicOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        live.fetch_sub(1, AtomicOrdering::SeqCst);
                        Ok(())
                    })
                }),
                None,
            );
        }
        queue.drain().await;
        assert!(peak.load(AtomicOrdering::SeqCst) <= 3);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_priority_order() {
        let queue = FinalizationQueue::new(QueueConfig {
            initial_concurrency: 1,
            ..fast_config()
        });
        queue.pause();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (priority, label) in [(5, "low"), (0, "high"), (2, "mid")] {
            let order = order.clone();
            queue.enqueue(
                priority,
                Box::new(move |_| {
                    let order = order.clone();
                    Box::pin(async move {
                        order.lock().unwrap().push(label);
                        Ok(())
                    })
                }),
                None,
            );
        }
        queue.resume();
        queue.drain().await;
        assert_eq!(*order.lock().unwrap(), vec!["high", "mid", "low"]);
        queue.shutdown();
    }

    #[tokio::test]
    async fn test_set_concurrency_clamps() {
        let queue = FinalizationQueue::new(fast_config());
        queue.set_concurrency(100);
        assert_eq!(queue.concurrency(), 10);
        queue.set_concurrency(0);
        assert_eq!(queue.concurrency(), 1);
        queue.shutdown();
    }

    #[test]
    fn test_backoff_growth_and_caps() {
        let base = Duration::from_secs(1);
        for _ in 0..16 {
            let first = backoff_delay(base, 1, false);
            assert!(first >= Duration::from_secs(1) && first < Duration::from_secs(2));
            let third = backoff_delay(base, 3, false);
            assert!(third >= Duration::from_secs(4) && third < Duration::from_secs(5));

            let limited = backoff_delay(base, 3, true);
            assert!(limited >= Duration::from_secs(9) && limited < Duration::from_secs(11));
            // Deep attempts hit the 30 s cap.
            let capped = backoff_delay(base, 6, true);
            assert_eq!(capped, Duration::from_secs(30));
        }
    }

    #[test]
    fn test_adaptive_rules() {
        // Error rate above 10% shrinks to 80%.
        let (target, _) = adaptive_target(10, 1, 20, &metrics(0, 0.85, 1000));
        assert_eq!(target, 8);

        // Bulk regime caps at 70% of max.
        let (target, _) = adaptive_target(20, 1, 20, &metrics(100, 0.97, 4000));
        assert_eq!(target, 14);
        // Bulk growth requires fast, near-perfect processing.
        let (target, _) = adaptive_target(10, 1, 20, &metrics(100, 0.99, 2000));
        assert_eq!(target, 11);
        // Bulk shrink on slow tasks.
        let (target, _) = adaptive_target(10, 1, 20, &metrics(100, 0.99, 9000));
        assert_eq!(target, 9);

        // Normal growth needs a 2x backlog.
        let (target, _) = adaptive_target(4, 1, 20, &metrics(9, 0.99, 1000));
        assert_eq!(target, 5);
        let (target, _) = adaptive_target(4, 1, 20, &metrics(8, 0.99, 1000));
        assert_eq!(target, 4);
        // Normal shrink on slow or failing tasks.
        let (target, _) = adaptive_target(4, 1, 20, &metrics(0, 0.99, 11000));
        assert_eq!(target, 3);
        let (target, _) = adaptive_target(4, 1, 20, &metrics(0, 0.89, 1000));
        assert_eq!(target, 3);
        // Never below the minimum.
        let (target, _) = adaptive_target(1, 1, 20, &metrics(0, 0.5, 1000));
        assert_eq!(target, 1);
    }
}
