//! Outbox queue processor.
//!
//! Each tick:
//! 1. releases claims older than the claim timeout,
//! 2. claims up to `batch_size` due rows for this worker,
//! 3. sends each row and finalizes it (`sent`, rescheduled `pending`, or `failed`).
//!
//! One spawned processor never runs two ticks at once; separate processors
//! (threads, processes, hosts) are kept apart by the store's claim.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hireflow_core::WorkerId;
use hireflow_mail::{DeliveryFailure, FailureOutcome, OutboxEntry, RetryPolicy};

use crate::clock::Clock;
use crate::store::{OutboxStore, StoreError};
use crate::transport::EmailTransport;

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub worker_id: WorkerId,
    /// `None` runs ticks only when triggered.
    pub poll_interval: Option<Duration>,
    pub batch_size: usize,
    /// Claims older than this are considered abandoned.
    pub claim_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::generate(),
            poll_interval: Some(Duration::from_secs(30)),
            batch_size: 10,
            claim_timeout: Duration::from_secs(600),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = worker_id;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn manual(mut self) -> Self {
        self.poll_interval = None;
        self
    }
}

/// Outcome counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub released: u64,
    pub claimed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Cumulative runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorStats {
    pub ticks: u64,
    pub released: u64,
    pub claimed: u64,
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub tick_errors: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ProcessorStats {
    fn record(&mut self, result: &Result<TickReport, ProcessorError>, at: DateTime<Utc>) {
        self.ticks += 1;
        self.last_tick_at = Some(at);
        match result {
            Ok(r) => {
                self.released += r.released;
                self.claimed += r.claimed;
                self.sent += r.sent;
                self.retried += r.retried;
                self.failed += r.failed;
            }
            Err(e) => {
                self.tick_errors += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("processor is not running")]
    Stopped,
}

type TickReply = oneshot::Sender<Result<TickReport, ProcessorError>>;

/// Worker that drains the outbox through a transport.
pub struct OutboxProcessor<S, T> {
    store: S,
    transport: T,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
}

impl<S, T> OutboxProcessor<S, T>
where
    S: OutboxStore + 'static,
    T: EmailTransport + 'static,
{
    pub fn new(store: S, transport: T, clock: Arc<dyn Clock>, config: ProcessorConfig) -> Self {
        Self {
            store,
            transport,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one poll cycle.
    pub async fn tick(&self) -> Result<TickReport, ProcessorError> {
        let worker = &self.config.worker_id;
        let mut report = TickReport::default();

        let now = self.clock.now();
        let cutoff = now - chrono::Duration::from_std(self.config.claim_timeout).unwrap_or_default();
        report.released = self.store.release_stale(cutoff, now).await?;
        if report.released > 0 {
            warn!(worker = %worker, released = report.released, "released stale outbox claims");
        }

        let batch = self
            .store
            .claim_batch(worker, now, self.config.batch_size)
            .await?;
        report.claimed = batch.len() as u64;

        for entry in batch {
            self.deliver(entry, &mut report).await;
        }

        if report.claimed > 0 {
            info!(
                worker = %worker,
                claimed = report.claimed,
                sent = report.sent,
                retried = report.retried,
                failed = report.failed,
                "outbox tick finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, mut entry: OutboxEntry, report: &mut TickReport) {
        let worker = &self.config.worker_id;
        let result = self.transport.send(&entry).await;
        let now = self.clock.now();

        let transition = match result {
            Ok(receipt) => {
                debug!(
                    outbox_id = %entry.id,
                    transport = self.transport.name(),
                    provider_message_id = ?receipt.provider_message_id,
                    "email sent"
                );
                entry.mark_sent(now).map(|_| None)
            }
            Err(err) => {
                let failure = DeliveryFailure::from(err);
                entry
                    .mark_failed(&failure, &self.config.retry_policy, now)
                    .map(|outcome| Some((outcome, failure)))
            }
        };

        let transition = match transition {
            Ok(t) => t,
            Err(e) => {
                error!(outbox_id = %entry.id, error = %e, "claimed row in unexpected state");
                return;
            }
        };

        match self.store.finalize(worker, &entry).await {
            Ok(()) => match transition {
                None => report.sent += 1,
                Some((FailureOutcome::Retry { next_attempt_at }, failure)) => {
                    report.retried += 1;
                    warn!(
                        outbox_id = %entry.id,
                        retry_count = entry.retry_count,
                        max_retries = entry.max_retries,
                        next_attempt_at = %next_attempt_at,
                        error = %failure,
                        "delivery failed, rescheduled"
                    );
                }
                Some((FailureOutcome::Failed, failure)) => {
                    report.failed += 1;
                    error!(
                        outbox_id = %entry.id,
                        retry_count = entry.retry_count,
                        error = %failure,
                        "delivery failed permanently"
                    );
                }
            },
            Err(StoreError::ClaimLost(id)) => {
                warn!(worker = %worker, outbox_id = %id, "claim lost before finalize, outcome dropped");
            }
            Err(e) => {
                error!(worker = %worker, outbox_id = %entry.id, error = %e, "failed to finalize outbox row");
            }
        }
    }

    /// Run the processor as a background task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> ProcessorHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel::<TickReply>(8);
        let stats = Arc::new(Mutex::new(ProcessorStats::default()));

        let join = tokio::spawn(run_loop(self, cancel.clone(), trigger_rx, stats.clone()));

        ProcessorHandle {
            control: ProcessorControl { trigger_tx, stats },
            cancel,
            join: Some(join),
        }
    }
}

async fn run_loop<S, T>(
    processor: OutboxProcessor<S, T>,
    cancel: CancellationToken,
    mut triggers: mpsc::Receiver<TickReply>,
    stats: Arc<Mutex<ProcessorStats>>,
) where
    S: OutboxStore + 'static,
    T: EmailTransport + 'static,
{
    let worker = processor.config.worker_id.clone();
    info!(
        worker = %worker,
        interval_secs = ?processor.config.poll_interval.map(|d| d.as_secs()),
        batch_size = processor.config.batch_size,
        "outbox processor started"
    );

    let mut interval = processor.config.poll_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    let mut triggers_open = true;

    loop {
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            req = triggers.recv(), if triggers_open => match req {
                Some(reply) => Some(reply),
                None => {
                    triggers_open = false;
                    continue;
                }
            },
            _ = next_tick(&mut interval) => None,
        };

        let result = processor.tick().await;
        if let Err(e) = &result {
            error!(worker = %worker, error = %e, "outbox tick failed");
        }
        lock(&stats).record(&result, processor.clock.now());

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    info!(worker = %worker, "outbox processor stopped");
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn lock(stats: &Mutex<ProcessorStats>) -> std::sync::MutexGuard<'_, ProcessorStats> {
    stats.lock().unwrap_or_else(|p| p.into_inner())
}

/// Cloneable control surface of a running processor.
#[derive(Debug, Clone)]
pub struct ProcessorControl {
    trigger_tx: mpsc::Sender<TickReply>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl ProcessorControl {
    /// Run a tick now and wait for its report.
    pub async fn trigger(&self) -> Result<TickReport, ProcessorError> {
        let (tx, rx) = oneshot::channel();
        self.trigger_tx
            .send(tx)
            .await
            .map_err(|_| ProcessorError::Stopped)?;
        rx.await.map_err(|_| ProcessorError::Stopped)?
    }

    pub fn stats(&self) -> ProcessorStats {
        lock(&self.stats).clone()
    }
}

/// Handle to a spawned processor.
#[derive(Debug)]
pub struct ProcessorHandle {
    control: ProcessorControl,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ProcessorHandle {
    pub fn control(&self) -> ProcessorControl {
        self.control.clone()
    }

    pub async fn trigger(&self) -> Result<TickReport, ProcessorError> {
        self.control.trigger().await
    }

    pub fn stats(&self) -> ProcessorStats {
        self.control.stats()
    }

    /// Cancel and wait for the current tick to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "outbox processor task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use hireflow_core::OutboxId;
    use hireflow_mail::{Mailbox, NewOutboxEntry, OutboxStatus, Priority};

    use crate::clock::ManualClock;
    use crate::store::{InMemoryOutboxStore, OutboxFilter};
    use crate::transport::{RecordingTransport, TransportError};

    type TestProcessor = OutboxProcessor<Arc<InMemoryOutboxStore>, Arc<RecordingTransport>>;

    struct Fixture {
        store: Arc<InMemoryOutboxStore>,
        transport: Arc<RecordingTransport>,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryOutboxStore::arc(),
                transport: Arc::new(RecordingTransport::new()),
                clock: ManualClock::default(),
            }
        }

        fn processor(&self, worker: &str) -> TestProcessor {
            OutboxProcessor::new(
                self.store.clone(),
                self.transport.clone(),
                Arc::new(self.clock.clone()),
                ProcessorConfig::default()
                    .with_worker(WorkerId::new(worker))
                    .manual(),
            )
        }

        async fn enqueue(&self, max_retries: u32) -> OutboxEntry {
            let entry = NewOutboxEntry::new(
                Mailbox::parse("jane@example.com").unwrap(),
                Mailbox::parse("team@hireflow.test").unwrap(),
                "Interview",
            )
            .with_text("hello")
            .with_priority(Priority::Normal)
            .with_max_retries(max_retries)
            .into_entry(OutboxId::new(), &RetryPolicy::default(), self.clock.now())
            .unwrap();
            self.store.enqueue(entry).await.unwrap()
        }

        async fn row(&self, id: OutboxId) -> OutboxEntry {
            self.store.get(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn sends_due_rows_and_never_reselects_them() {
        let fx = Fixture::new();
        let row = fx.enqueue(3).await;
        let processor = fx.processor("w1");

        let report = processor.tick().await.unwrap();
        assert_eq!(report, TickReport { claimed: 1, sent: 1, ..Default::default() });

        let stored = fx.row(row.id).await;
        assert_eq!(stored.status, OutboxStatus::Sent);
        assert!(stored.sent_at.is_some());

        fx.clock.advance(chrono::Duration::days(1));
        let report = processor.tick().await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(fx.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn failures_retry_then_fail_permanently() {
        let fx = Fixture::new();
        let row = fx.enqueue(3).await;
        let processor = fx.processor("w1");
        fx.transport.fail_always(TransportError::Transient("smtp timeout".into()));

        let report = processor.tick().await.unwrap();
        assert_eq!(report.retried, 1);
        let stored = fx.row(row.id).await;
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.scheduled_at, fx.clock.now() + chrono::Duration::minutes(5));
        assert_eq!(stored.error_message.as_deref(), Some("transient: smtp timeout"));

        // Not due yet.
        assert_eq!(processor.tick().await.unwrap().claimed, 0);

        fx.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(processor.tick().await.unwrap().retried, 1);
        assert_eq!(fx.row(row.id).await.retry_count, 2);

        fx.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(processor.tick().await.unwrap().failed, 1);
        let stored = fx.row(row.id).await;
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.retry_count, 3);

        fx.clock.advance(chrono::Duration::days(1));
        assert_eq!(processor.tick().await.unwrap().claimed, 0);
        assert_eq!(fx.transport.attempts(), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let fx = Fixture::new();
        let row = fx.enqueue(3).await;
        let processor = fx.processor("w1");
        fx.transport.fail_next(TransportError::Transient("503".into()));

        processor.tick().await.unwrap();
        fx.clock.advance(chrono::Duration::minutes(5));
        let report = processor.tick().await.unwrap();
        assert_eq!(report.sent, 1);

        let stored = fx.row(row.id).await;
        assert_eq!(stored.status, OutboxStatus::Sent);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn batch_size_limits_claims() {
        let fx = Fixture::new();
        for _ in 0..15 {
            fx.enqueue(3).await;
        }
        let processor = fx.processor("w1");
        assert_eq!(processor.tick().await.unwrap().sent, 10);
        assert_eq!(processor.tick().await.unwrap().sent, 5);
    }

    #[tokio::test]
    async fn releases_abandoned_claims() {
        let fx = Fixture::new();
        let row = fx.enqueue(3).await;

        // A crashed worker claimed the row and never finished.
        let crashed = WorkerId::new("crashed");
        fx.store.claim_batch(&crashed, fx.clock.now(), 10).await.unwrap();

        let processor = fx.processor("w1");
        assert_eq!(processor.tick().await.unwrap().claimed, 0);

        fx.clock.advance(chrono::Duration::minutes(11));
        let report = processor.tick().await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(fx.row(row.id).await.retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_processors_send_each_row_once() {
        let fx = Fixture::new();
        for _ in 0..40 {
            fx.enqueue(3).await;
        }

        let mut tasks = Vec::new();
        for i in 0..4 {
            let processor = fx.processor(&format!("w{i}"));
            tasks.push(tokio::spawn(async move {
                let mut sent = 0;
                loop {
                    let report = processor.tick().await.unwrap();
                    if report.claimed == 0 {
                        break sent;
                    }
                    sent += report.sent;
                }
            }));
        }

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 40);

        let sent = fx.transport.sent();
        let unique: HashSet<_> = sent.iter().map(|m| m.outbox_id).collect();
        assert_eq!(unique.len(), sent.len());

        let remaining = fx
            .store
            .list(&OutboxFilter {
                status: Some(OutboxStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn spawned_processor_handles_triggers_and_shutdown() {
        let fx = Fixture::new();
        fx.enqueue(3).await;

        let handle = fx.processor("w1").spawn(CancellationToken::new());
        let report = handle.trigger().await.unwrap();
        assert_eq!(report.sent, 1);

        let control = handle.control();
        assert_eq!(control.stats().ticks, 1);
        assert_eq!(control.stats().sent, 1);

        handle.shutdown().await;
        assert!(matches!(control.trigger().await, Err(ProcessorError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_drives_ticks() {
        let fx = Fixture::new();
        fx.enqueue(3).await;

        let processor = OutboxProcessor::new(
            fx.store.clone(),
            fx.transport.clone(),
            Arc::new(fx.clock.clone()),
            ProcessorConfig {
                poll_interval: Some(Duration::from_secs(30)),
                ..ProcessorConfig::default()
            },
        );
        let cancel = CancellationToken::new();
        let handle = processor.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(handle.stats().ticks >= 2);
        assert_eq!(fx.transport.sent().len(), 1);

        cancel.cancel();
        handle.shutdown().await;
    }
}
