// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size- and time-triggered batching in front of a [`Shipper`].
//!
//! ```text
//!   accept() ──┐
//!   flush()  ──┼──> [ lock: swap open batch + stamp last flush ] ──> delivery task
//!   interval ──┘                                                      │
//!                                                   send ── ok ──> acknowledge all
//!                                                        └─ err ─> requeue all
//! ```
//!
//! The lock covers only the swap. Each swapped-out batch is moved into its own
//! delivery task, tracked in a `JoinSet` so [`Batcher::shutdown`] can wait for
//! every record to be settled.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::metrics::MetricsRecorder;
use crate::record::{Batch, Record};
use crate::shipper::{serialize_batch, Shipper};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Number of records that seals a batch.
    pub batch_size: usize,
    /// Maximum time a record waits for a size-triggered flush.
    /// `Duration::ZERO` disables the interval flusher.
    pub flush_interval: Duration,
    /// `Log-Type` the batches are shipped under.
    pub log_type: String,
}

struct BatcherState {
    batch: Batch,
    last_flush: Instant,
    closed: bool,
}

impl BatcherState {
    fn take_batch(&mut self, capacity: usize) -> Batch {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.batch, Vec::with_capacity(capacity))
    }
}

pub struct Batcher {
    state: Mutex<BatcherState>,
    batch_size: usize,
    flush_interval: Duration,
    log_type: Arc<str>,
    shipper: Arc<dyn Shipper>,
    metrics: Arc<dyn MetricsRecorder>,
    deliveries: Mutex<JoinSet<()>>,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl Batcher {
    /// Creates the batcher and, if an interval is configured, starts its
    /// interval flusher. Must be called from within a Tokio runtime.
    ///
    /// The last-flush timestamp starts at creation time, so the first interval
    /// flush happens one full interval after startup.
    pub fn new(
        config: BatcherConfig,
        shipper: Arc<dyn Shipper>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Arc<Self> {
        let batch_size = config.batch_size.max(1);
        let started = Instant::now();

        let batcher = Arc::new(Batcher {
            state: Mutex::new(BatcherState {
                batch: Vec::with_capacity(batch_size),
                last_flush: started,
                closed: false,
            }),
            batch_size,
            flush_interval: config.flush_interval,
            log_type: Arc::from(config.log_type),
            shipper,
            metrics,
            deliveries: Mutex::new(JoinSet::new()),
            interval_task: Mutex::new(None),
            cancel_token: CancellationToken::new(),
        });

        if !config.flush_interval.is_zero() {
            match started.checked_add(config.flush_interval) {
                Some(first_tick) => {
                    let handle = tokio::spawn(run_interval_flusher(
                        Arc::downgrade(&batcher),
                        first_tick,
                        config.flush_interval,
                        batcher.cancel_token.clone(),
                    ));
                    *batcher.lock_interval_task() = Some(handle);
                }
                None => warn!(
                    "Flush interval of {}s is out of range, interval flushing disabled",
                    config.flush_interval.as_secs()
                ),
            }
        }

        batcher
    }

    /// Appends a record to the open batch, sealing and dispatching the batch
    /// once it holds `batch_size` records.
    ///
    /// Records accepted after [`Batcher::shutdown`] are requeued for redelivery.
    pub fn accept(&self, record: Record) {
        let sealed = {
            let mut state = self.lock_state();
            if state.closed {
                drop(state);
                self.requeue_late(record);
                return;
            }
            state.batch.push(record);
            if state.batch.len() >= self.batch_size {
                Some(state.take_batch(self.batch_size))
            } else {
                None
            }
        };

        if let Some(batch) = sealed {
            debug!("Flushing batch with size of {}", batch.len());
            self.dispatch(batch);
        }
    }

    /// Seals the open batch, even if empty, and dispatches it.
    pub fn flush(&self) {
        let batch = self.lock_state().take_batch(self.batch_size);
        self.dispatch(batch);
    }

    /// Flushes only if no flush happened during the last `flush_interval`.
    /// Returns whether a flush was issued.
    pub fn flush_if_due(&self) -> bool {
        let batch = {
            let mut state = self.lock_state();
            if state.last_flush.elapsed() < self.flush_interval {
                return false;
            }
            state.take_batch(self.batch_size)
        };

        debug!("Interval flush of {} records", batch.len());
        self.dispatch(batch);
        true
    }

    /// Records waiting in the open batch.
    pub fn pending(&self) -> usize {
        self.lock_state().batch.len()
    }

    /// Stops the interval flusher, flushes what is left and waits until every
    /// dispatched record has been acknowledged or requeued.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let interval_task = self.lock_interval_task().take();
        if let Some(handle) = interval_task {
            if let Err(e) = handle.await {
                error!("Interval flusher failed: {e}");
            }
        }

        let batch = {
            let mut state = self.lock_state();
            state.closed = true;
            state.take_batch(0)
        };
        debug!("Final flush of {} records", batch.len());
        self.dispatch(batch);

        self.wait_for_deliveries().await;
        debug!("Batcher stopped");
    }

    fn dispatch(&self, batch: Batch) {
        self.metrics.record_flush();
        if batch.is_empty() {
            return;
        }

        let shipper = Arc::clone(&self.shipper);
        let metrics = Arc::clone(&self.metrics);
        let log_type = Arc::clone(&self.log_type);
        self.track(deliver(shipper, metrics, log_type, batch));
    }

    fn requeue_late(&self, record: Record) {
        warn!("Batcher is shut down, requeueing record");
        let metrics = Arc::clone(&self.metrics);
        self.track(async move {
            if let Err(e) = record.requeue(true).await {
                metrics.record_disposition_error();
                error!("Failed to requeue record: {e}");
            }
        });
    }

    fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut deliveries = self.lock_deliveries();
        while let Some(finished) = deliveries.try_join_next() {
            if let Err(e) = finished {
                error!("Delivery task failed: {e}");
            }
        }
        deliveries.spawn(task);
    }

    async fn wait_for_deliveries(&self) {
        loop {
            let mut deliveries = std::mem::take(&mut *self.lock_deliveries());
            if deliveries.is_empty() {
                return;
            }
            while let Some(finished) = deliveries.join_next().await {
                if let Err(e) = finished {
                    error!("Delivery task failed: {e}");
                }
            }
        }
    }

    #[allow(clippy::expect_used)]
    fn lock_state(&self) -> MutexGuard<'_, BatcherState> {
        self.state.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_deliveries(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.deliveries.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_interval_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.interval_task.lock().expect("lock poisoned")
    }
}

/// Dropping without [`Batcher::shutdown`] aborts in-flight deliveries; their
/// records are released unsettled and left to the source to redeliver.
impl Drop for Batcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run_interval_flusher(
    batcher: Weak<Batcher>,
    first_tick: Instant,
    flush_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval_at(first_tick, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(batcher) = batcher.upgrade() else {
                    break;
                };
                batcher.flush_if_due();
            }
        }
    }

    debug!("Interval flusher stopped");
}

/// Ships one sealed batch and settles every record in it with the same outcome.
async fn deliver(
    shipper: Arc<dyn Shipper>,
    metrics: Arc<dyn MetricsRecorder>,
    log_type: Arc<str>,
    batch: Batch,
) {
    let count = batch.len();
    let payload = serialize_batch(&batch);

    metrics.record_attempt();
    let delivered = match shipper.send(&log_type, payload).await {
        Ok(()) => {
            metrics.record_success(count);
            debug!("Delivered batch of {count} records");
            true
        }
        Err(e) => {
            metrics.record_failure(count);
            warn!("Failed to deliver batch of {count} records, requeueing: {e}");
            false
        }
    };

    for record in batch {
        let settled = if delivered {
            record.acknowledge().await
        } else {
            record.requeue(true).await
        };
        if let Err(e) = settled {
            metrics.record_disposition_error();
            error!("Failed to settle record: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ShippingError;
    use crate::metrics::Counters;
    use crate::record::tests::{recorded, Settled};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Forwards every payload to the test and answers with a fixed outcome.
    struct ScriptedShipper {
        tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Shipper for ScriptedShipper {
        async fn send(&self, log_type: &str, payload: Vec<u8>) -> Result<(), ShippingError> {
            let _ = self.tx.send((log_type.to_string(), payload));
            if self.fail.load(Ordering::SeqCst) {
                return Err(ShippingError::Status {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        batcher: Arc<Batcher>,
        sent: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
        counters: Arc<Counters>,
        log: Arc<Mutex<Vec<Settled>>>,
    }

    fn harness(batch_size: usize, flush_interval: Duration, fail: bool) -> Harness {
        let (tx, sent) = mpsc::unbounded_channel();
        let shipper = Arc::new(ScriptedShipper {
            tx,
            fail: AtomicBool::new(fail),
        });
        let counters = Arc::new(Counters::new());
        let batcher = Batcher::new(
            BatcherConfig {
                batch_size,
                flush_interval,
                log_type: "QueueLogs".to_string(),
            },
            shipper,
            counters.clone(),
        );
        Harness {
            batcher,
            sent,
            counters,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn settle_tasks() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_flushes_when_batch_size_reached() {
        let mut h = harness(3, Duration::ZERO, false);

        h.batcher.accept(recorded("a", &h.log));
        h.batcher.accept(recorded("b", &h.log));
        assert_eq!(h.batcher.pending(), 2);
        settle_tasks().await;
        assert!(h.sent.try_recv().is_err());

        h.batcher.accept(recorded("c", &h.log));
        assert_eq!(h.batcher.pending(), 0);

        let (log_type, payload) = h.sent.recv().await.expect("no batch shipped");
        assert_eq!(log_type, "QueueLogs");
        assert_eq!(payload, br#"[{"id":"a"},{"id":"b"},{"id":"c"}]"#.to_vec());

        h.batcher.shutdown().await;
        assert_eq!(
            *h.log.lock().unwrap(),
            vec![
                Settled::Acked("a".to_string()),
                Settled::Acked("b".to_string()),
                Settled::Acked("c".to_string()),
            ]
        );
        let snapshot = h.counters.snapshot();
        assert_eq!(snapshot.batches_total, 1);
        assert_eq!(snapshot.records_succeeded, 3);
        assert_eq!(snapshot.records_failed, 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_requeues_whole_batch() {
        let mut h = harness(2, Duration::ZERO, true);

        h.batcher.accept(recorded("a", &h.log));
        h.batcher.accept(recorded("b", &h.log));
        h.sent.recv().await.expect("no batch shipped");
        h.batcher.shutdown().await;

        assert_eq!(
            *h.log.lock().unwrap(),
            vec![
                Settled::Requeued("a".to_string(), true),
                Settled::Requeued("b".to_string(), true),
            ]
        );
        let snapshot = h.counters.snapshot();
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.records_failed, 2);
        assert_eq!(snapshot.records_succeeded, 0);
    }

    #[tokio::test]
    async fn test_flush_of_empty_batch_is_noop() {
        let mut h = harness(10, Duration::ZERO, false);

        h.batcher.flush();
        h.batcher.flush();
        settle_tasks().await;

        assert!(h.sent.try_recv().is_err());
        let snapshot = h.counters.snapshot();
        assert_eq!(snapshot.flushes, 2);
        assert_eq!(snapshot.batches_total, 0);
    }

    #[tokio::test]
    async fn test_manual_flush_ships_partial_batch() {
        let mut h = harness(10, Duration::ZERO, false);

        h.batcher.accept(recorded("a", &h.log));
        h.batcher.flush();

        let (_, payload) = h.sent.recv().await.expect("no batch shipped");
        assert_eq!(payload, br#"[{"id":"a"}]"#.to_vec());
        assert_eq!(h.batcher.pending(), 0);
        h.batcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush_waits_full_interval() {
        let mut h = harness(500, Duration::from_secs(1), false);

        h.batcher.accept(recorded("a", &h.log));
        h.batcher.accept(recorded("b", &h.log));

        tokio::time::advance(Duration::from_millis(999)).await;
        settle_tasks().await;
        assert!(h.sent.try_recv().is_err());
        assert_eq!(h.batcher.pending(), 2);

        tokio::time::advance(Duration::from_millis(1)).await;
        let (_, payload) = h.sent.recv().await.expect("no batch shipped");
        assert_eq!(payload, br#"[{"id":"a"},{"id":"b"}]"#.to_vec());

        h.batcher.shutdown().await;
        assert_eq!(h.counters.snapshot().batches_total, 1);
        assert_eq!(h.log.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_skips_after_recent_size_flush() {
        let h = harness(2, Duration::from_secs(10), false);

        tokio::time::advance(Duration::from_secs(6)).await;
        h.batcher.accept(recorded("a", &h.log));
        h.batcher.accept(recorded("b", &h.log));
        h.batcher.accept(recorded("c", &h.log));

        // The tick at 10s sees a flush only 4s old and leaves "c" alone.
        tokio::time::advance(Duration::from_secs(4)).await;
        settle_tasks().await;
        assert_eq!(h.batcher.pending(), 1);
        assert!(!h.batcher.flush_if_due());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(h.batcher.flush_if_due());
        assert_eq!(h.batcher.pending(), 0);

        h.batcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_interval_disables_interval_flush() {
        let mut h = harness(10, Duration::MAX, false);
        assert!(h.batcher.lock_interval_task().is_none());

        h.batcher.accept(recorded("a", &h.log));
        tokio::time::advance(Duration::from_secs(3600)).await;
        settle_tasks().await;
        assert!(h.sent.try_recv().is_err());

        h.batcher.shutdown().await;
        let (_, payload) = h.sent.recv().await.expect("no batch shipped");
        assert_eq!(payload, br#"[{"id":"a"}]"#.to_vec());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_records() {
        let mut h = harness(100, Duration::from_secs(3600), false);

        h.batcher.accept(recorded("a", &h.log));
        h.batcher.shutdown().await;

        let (_, payload) = h.sent.recv().await.expect("no batch shipped");
        assert_eq!(payload, br#"[{"id":"a"}]"#.to_vec());
        assert_eq!(*h.log.lock().unwrap(), vec![Settled::Acked("a".to_string())]);
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_requeues() {
        let mut h = harness(1, Duration::ZERO, false);

        h.batcher.shutdown().await;
        h.batcher.accept(recorded("late", &h.log));
        h.batcher.shutdown().await;

        assert!(h.sent.try_recv().is_err());
        assert_eq!(
            *h.log.lock().unwrap(),
            vec![Settled::Requeued("late".to_string(), true)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_lose_nothing() {
        let mut h = harness(7, Duration::from_millis(1), false);
        let total = 1_000;

        let flusher = {
            let batcher = Arc::clone(&h.batcher);
            tokio::spawn(async move {
                for _ in 0..200 {
                    batcher.flush();
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..total {
            h.batcher.accept(recorded(&i.to_string(), &h.log));
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
        flusher.await.expect("flusher task failed");
        h.batcher.shutdown().await;

        let mut shipped = 0;
        while let Ok((_, payload)) = h.sent.try_recv() {
            let parsed: serde_json::Value =
                serde_json::from_slice(&payload).expect("payload is not JSON");
            shipped += parsed.as_array().expect("payload is not an array").len();
        }
        assert_eq!(shipped, total);

        let log = h.log.lock().unwrap();
        let mut acked: Vec<&str> = log
            .iter()
            .map(|s| match s {
                Settled::Acked(id) => id.as_str(),
                other => panic!("unexpected disposition {other:?}"),
            })
            .collect();
        acked.sort_unstable();
        acked.dedup();
        assert_eq!(acked.len(), total);
        assert_eq!(h.counters.snapshot().records_succeeded, total as u64);
    }
}
