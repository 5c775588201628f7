//! The finalizer loop and expiration sweep.
//!
//! A periodic tick (plus an on-demand nudge from the signer engine) polls
//! the store for due `ready` records, claims each one through the
//! `ready → processing` CAS, and enqueues a finalization task that performs
//! the network submission and/or callback delivery. The CAS makes claims
//! exclusive: a record lost to a concurrent worker is simply dropped.
//!
//! Terminal bookkeeping is the task's job: `processed` (with `submittedAt`)
//! on success, `failed` (with `lastError`) on a non-retryable error or an
//! exhausted attempt budget. Retryable errors leave the record in
//! `processing` and only bump `retryCount`; the queue reschedules the whole
//! task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::queue::{FinalizationQueue, TaskError, TaskResult};
use crate::store::{DataProvider, TxFilter, TxPatch};
use crate::submit::{CallbackClient, Submitter};
use crate::types::{TransactionRecord, TxResponse, TxStatus};
use crate::util::unix_now;

#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    pub tick_interval: Duration,
    /// Ticks are skipped while the queue holds at least this many tasks.
    pub target_queue_size: usize,
    pub sweep_interval: Duration,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        FinalizerConfig {
            tick_interval: Duration::from_secs(3),
            target_queue_size: 50,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct Finalizer {
    store: Arc<dyn DataProvider>,
    queue: FinalizationQueue,
    submitter: Arc<Submitter>,
    callbacks: Arc<CallbackClient>,
    ready_notify: Arc<Notify>,
    config: FinalizerConfig,
}

impl Finalizer {
    pub fn new(
        store: Arc<dyn DataProvider>,
        queue: FinalizationQueue,
        submitter: Arc<Submitter>,
        callbacks: Arc<CallbackClient>,
        ready_notify: Arc<Notify>,
        config: FinalizerConfig,
    ) -> Self {
        Finalizer {
            store,
            queue,
            submitter,
            callbacks,
            ready_notify,
            config,
        }
    }

    pub fn queue(&self) -> &FinalizationQueue {
        &self.queue
    }

    /// Runs the periodic loop until cancelled, waking early on engine
    /// nudges. The nudge is best-effort; the interval is the liveness
    /// guarantee.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.ready_notify.notified() => {}
                    _ = cancel.cancelled() => return,
                }
                self.tick().await;
            }
        })
    }

    /// One polling round: list due `ready` records up to the queue deficit
    /// and claim each through the status CAS.
    #[instrument(skip_all)]
    pub async fn tick(&self) {
        let backlog = self.queue.len();
        if backlog >= self.config.target_queue_size {
            tracing::debug!(backlog, "Queue at target size, skipping tick");
            return;
        }
        let deficit = self.config.target_queue_size - backlog;
        let now = unix_now();
        let records = match self
            .store
            .list_transactions(&TxFilter::ready_at(now, deficit))
            .await
        {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "Finalizer listing failed");
                return;
            }
        };
        for mut record in records {
            let claimed = match self
                .store
                .update_tx_status(&record.hash, TxStatus::Processing, TxStatus::Ready, None)
                .await
            {
                Ok(claimed) => claimed,
                Err(err) => {
                    tracing::warn!(hash = %record.hash, error = %err, "Claim failed");
                    continue;
                }
            };
            if !claimed {
                // Another worker owns it now.
                continue;
            }
            record.status = TxStatus::Processing;
            self.enqueue_finalization(record);
        }
    }

    fn enqueue_finalization(&self, record: TransactionRecord) {
        let store = self.store.clone();
        let submitter = self.submitter.clone();
        let callbacks = self.callbacks.clone();
        let task_record = record.clone();
        let task = Box::new(move |_attempt: u32| {
            let store = store.clone();
            let submitter = submitter.clone();
            let callbacks = callbacks.clone();
            let record = task_record.clone();
            Box::pin(async move { run_finalization(&record, &store, &submitter, &callbacks).await })
                as std::pin::Pin<Box<dyn std::future::Future<Output = TaskResult> + Send>>
        });

        let store = self.store.clone();
        let hash = record.hash.clone();
        let on_failed = Box::new(move |error: TaskError| {
            Box::pin(async move {
                let result = store
                    .update_tx_status(
                        &hash,
                        TxStatus::Failed,
                        TxStatus::Processing,
                        Some(error.message().to_string()),
                    )
                    .await;
                if let Err(err) = result {
                    tracing::error!(hash = %hash, error = %err, "Failed-state update lost");
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        });

        self.queue.enqueue(0, task, Some(on_failed));
    }

    /// Independent periodic job failing expired records. Safe next to the
    /// finalizer: the status CAS prevents double-terminal transitions.
    pub fn spawn_sweeper(
        store: Arc<dyn DataProvider>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => return,
                }
                match store.cleanup_expired(unix_now()).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Expired transactions swept"),
                    Err(err) => tracing::warn!(error = %err, "Expiration sweep failed"),
                }
            }
        })
    }
}

/// One finalization attempt: submit, deliver callback, record the terminal
/// state.
async fn run_finalization(
    record: &TransactionRecord,
    store: &Arc<dyn DataProvider>,
    submitter: &Arc<Submitter>,
    callbacks: &Arc<CallbackClient>,
) -> TaskResult {
    let now = unix_now();

    if record.submit {
        if let Err(error) = submitter.submit(record).await {
            return note_attempt(record, store, error).await;
        }
    }

    if let Some(url) = &record.callback_url {
        // The callback observes the completed view of the record.
        let mut completed = record.clone();
        completed.status = TxStatus::Processed;
        if record.submit {
            completed.submitted_at = Some(now);
        }
        let body = serde_json::to_value(TxResponse::new(completed, None))
            .map_err(|e| TaskError::Permanent(format!("Record serialization failed: {}", e)))?;
        if let Err(error) = callbacks.deliver(url, &body).await {
            return note_attempt(record, store, error).await;
        }
    }

    let patch = TxPatch {
        status: Some(TxStatus::Processed),
        submitted_at: record.submit.then_some(now),
        last_error: None,
        increment_retry: false,
    };
    match store
        .update_transaction(&record.hash, patch, TxStatus::Processing)
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => {
            // Lost the terminal CAS (e.g. a crash-recovery path already
            // finished it); nothing left to do.
            tracing::debug!(hash = %record.hash, "Terminal transition already applied");
            Ok(())
        }
        Err(err) => Err(TaskError::Transient(format!(
            "Terminal status update failed: {}",
            err
        ))),
    }
}

/// Books a failed attempt on the record, then propagates the error so the
/// queue can reschedule (or give up on) the task.
async fn note_attempt(
    record: &TransactionRecord,
    store: &Arc<dyn DataProvider>,
    error: TaskError,
) -> TaskResult {
    if error.should_retry() {
        let bump = TxPatch {
            increment_retry: true,
            ..Default::default()
        };
        if let Err(err) = store
            .update_transaction(&record.hash, bump, TxStatus::Processing)
            .await
        {
            tracing::warn!(hash = %record.hash, error = %err, "Retry bookkeeping failed");
        }
    }
    Err(error)
}
