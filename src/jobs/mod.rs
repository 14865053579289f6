/// Reverification scheduler
///
/// A single periodic scan feeds a bounded queue drained by a fixed pool of
/// workers. Each worker re-runs verification for one record at a time.
/// Everything stops when the shutdown token is cancelled; abandoned items
/// keep their last persisted state and come back on a later scan.
use crate::{
    config::VerificationConfig,
    error::DirResult,
    metrics,
    verification::{NameVerificationStore, VerificationController},
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod tasks;

pub use tasks::WorkItem;

/// Source of scan ticks
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

#[async_trait]
impl Ticker for Interval {
    async fn tick(&mut self) {
        Interval::tick(self).await;
    }
}

/// Outcome of processing one work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverificationOutcome {
    Verified,
    Failed,
    Error,
    Cancelled,
}

impl ReverificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReverificationOutcome::Verified => "verified",
            ReverificationOutcome::Failed => "failed",
            ReverificationOutcome::Error => "error",
            ReverificationOutcome::Cancelled => "cancelled",
        }
    }
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Periodic reverification of TTL-expired and failed verifications
pub struct ReverificationScheduler {
    controller: VerificationController,
    tracking: NameVerificationStore,
    config: VerificationConfig,
    /// CIDs queued or being processed
    in_flight: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl ReverificationScheduler {
    pub fn new(
        controller: VerificationController,
        tracking: NameVerificationStore,
        config: VerificationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            controller,
            tracking,
            config,
            in_flight: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the scheduler on the configured scan interval
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut ticker = interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::spawn(self.run(ticker))
    }

    /// Scheduler loop; returns once shutdown is signalled and workers exit
    pub async fn run<T: Ticker>(self: Arc<Self>, mut ticker: T) {
        info!(
            workers = self.config.worker_count,
            queue = self.config.queue_capacity,
            interval_secs = self.config.scan_interval.as_secs(),
            "Starting reverification scheduler"
        );

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let queue: WorkQueue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.worker_count {
            workers.spawn(Arc::clone(&self).worker(worker_id, Arc::clone(&queue)));
        }

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => match self.scan(&tx).await {
                    Ok(0) => debug!("Reverification scan: nothing due"),
                    Ok(count) => info!("Enqueued {} records for reverification", count),
                    Err(e) => error!("Reverification scan failed: {}", e),
                },
            }
        }

        drop(tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reverification worker crashed: {}", e);
            }
        }

        let mut in_flight = self.in_flight.lock().await;
        metrics::REVERIFICATION_IN_FLIGHT.sub(in_flight.len() as i64);
        in_flight.clear();

        info!("Reverification scheduler stopped");
    }

    /// Enqueue every due record that is not already queued or in flight
    ///
    /// Blocks while the queue is full. Returns the number of items enqueued.
    pub async fn scan(&self, queue: &mpsc::Sender<WorkItem>) -> DirResult<usize> {
        let items = tasks::find_due_records(&self.tracking, &self.config).await?;

        let mut enqueued = 0;
        for item in items {
            if !self.claim(&item.record_cid).await {
                debug!(cid = %item.record_cid, "Already queued, skipping");
                continue;
            }

            let cid = item.record_cid.clone();
            let sent = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => false,
                sent = queue.send(item) => sent.is_ok(),
            };

            if !sent {
                self.release(&cid).await;
                break;
            }
            enqueued += 1;
        }

        metrics::record_reverification_scan(enqueued);
        Ok(enqueued)
    }

    /// Re-run verification for one item, abandoning it on shutdown
    pub async fn process(&self, item: WorkItem) -> ReverificationOutcome {
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(cid = %item.record_cid, "Shutdown, abandoning reverification");
                ReverificationOutcome::Cancelled
            }
            result = tasks::reverify_record(&self.controller, &item) => match result {
                Ok(true) => ReverificationOutcome::Verified,
                Ok(false) => ReverificationOutcome::Failed,
                Err(e) => {
                    warn!(cid = %item.record_cid, "Reverification error: {}", e);
                    ReverificationOutcome::Error
                }
            },
        };

        metrics::record_reverification_item(outcome.as_str());
        self.release(&item.record_cid).await;
        outcome
    }

    async fn worker(self: Arc<Self>, worker_id: usize, queue: WorkQueue) {
        debug!(worker_id, "Reverification worker started");

        loop {
            let item = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    item = rx.recv() => item,
                }
            };

            let Some(item) = item else { break };
            self.process(item).await;
        }

        debug!(worker_id, "Reverification worker stopped");
    }

    async fn claim(&self, cid: &str) -> bool {
        let claimed = self.in_flight.lock().await.insert(cid.to_string());
        if claimed {
            metrics::REVERIFICATION_IN_FLIGHT.inc();
        }
        claimed
    }

    async fn release(&self, cid: &str) {
        if self.in_flight.lock().await.remove(cid) {
            metrics::REVERIFICATION_IN_FLIGHT.dec();
        }
    }
}
