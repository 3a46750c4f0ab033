// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record sources and the loop that drains them into a [`Batcher`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batcher::Batcher;
use crate::errors::DispositionError;
use crate::metrics::MetricsRecorder;
use crate::record::{Disposition, Record};

/// Yields records one at a time. `None` marks the end of the stream.
#[async_trait]
pub trait RecordSource: Send {
    async fn next(&mut self) -> Option<Record>;
}

#[async_trait]
impl RecordSource for mpsc::Receiver<Record> {
    async fn next(&mut self) -> Option<Record> {
        self.recv().await
    }
}

#[async_trait]
impl RecordSource for mpsc::UnboundedReceiver<Record> {
    async fn next(&mut self) -> Option<Record> {
        self.recv().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Connected,
    Consuming,
    /// End of stream seen, final flush in progress.
    Draining,
    Closed,
}

/// Feeds every record from a source into the batcher, then drains it.
pub struct SourceLoop<S> {
    source: S,
    batcher: Arc<Batcher>,
    metrics: Arc<dyn MetricsRecorder>,
    state: SourceState,
}

impl<S: RecordSource> SourceLoop<S> {
    pub fn new(source: S, batcher: Arc<Batcher>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        SourceLoop {
            source,
            batcher,
            metrics,
            state: SourceState::Connected,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Consumes until the source ends or `cancel_token` fires, then performs
    /// the final flush and waits for in-flight deliveries. Returns the number
    /// of records consumed.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> u64 {
        self.state = SourceState::Consuming;
        let mut consumed = 0;

        loop {
            let record = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!("Source loop cancelled");
                    break;
                }
                record = self.source.next() => record,
            };

            match record {
                Some(record) => {
                    consumed += 1;
                    self.metrics.record_received();
                    self.batcher.accept(record);
                }
                None => {
                    info!("Source closed after {consumed} records");
                    break;
                }
            }
        }

        self.state = SourceState::Draining;
        self.batcher.shutdown().await;
        self.state = SourceState::Closed;

        consumed
    }
}

/// In-process queue with broker-like settlement.
///
/// Acknowledged messages are gone for good; messages requeued with
/// `redeliver = true` go back to the tail of the queue and will be consumed
/// again, as are messages whose handle is dropped without being settled.
/// Closing the queue ends the consumer's stream while leaving any unconsumed
/// messages in place.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
    published: AtomicU64,
    acknowledged: AtomicU64,
    requeued: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: u64,
    pub acknowledged: u64,
    pub requeued: u64,
    pub discarded: u64,
    /// Messages currently waiting to be consumed.
    pub depth: usize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, body: impl Into<Vec<u8>>) -> Result<(), DispositionError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DispositionError::Closed);
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner.push(body.into());
        Ok(())
    }

    /// Ends the consumer's stream. Further publishes are refused; requeues of
    /// records still in flight are kept for a later consumer.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn consumer(&self) -> QueueConsumer {
        QueueConsumer {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            published: self.inner.published.load(Ordering::Relaxed),
            acknowledged: self.inner.acknowledged.load(Ordering::Relaxed),
            requeued: self.inner.requeued.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            depth: self.inner.lock_messages().len(),
        }
    }
}

impl QueueInner {
    fn push(&self, body: Vec<u8>) {
        self.lock_messages().push_back(body);
        self.notify.notify_one();
    }

    fn redeliver(&self, body: Vec<u8>) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        self.push(body);
    }

    #[allow(clippy::expect_used)]
    fn lock_messages(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.messages.lock().expect("lock poisoned")
    }
}

pub struct QueueConsumer {
    inner: Arc<QueueInner>,
}

#[async_trait]
impl RecordSource for QueueConsumer {
    async fn next(&mut self) -> Option<Record> {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            let body = self.inner.lock_messages().pop_front();
            if let Some(body) = body {
                let delivery = QueueDelivery {
                    body: Some(body.clone()),
                    inner: Arc::clone(&self.inner),
                };
                return Some(Record::new(body, Box::new(delivery)));
            }
            notified.await;
        }
    }
}

/// Settlement handle for one consumed message. A handle dropped without being
/// settled puts its message back on the queue.
struct QueueDelivery {
    body: Option<Vec<u8>>,
    inner: Arc<QueueInner>,
}

#[async_trait]
impl Disposition for QueueDelivery {
    async fn acknowledge(self: Box<Self>) -> Result<(), DispositionError> {
        let mut delivery = self;
        delivery.body = None;
        delivery.inner.acknowledged.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn requeue(self: Box<Self>, redeliver: bool) -> Result<(), DispositionError> {
        let mut delivery = self;
        let Some(body) = delivery.body.take() else {
            return Ok(());
        };
        if redeliver {
            delivery.inner.redeliver(body);
        } else {
            delivery.inner.discarded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Drop for QueueDelivery {
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            debug!("Unsettled delivery dropped, requeueing");
            self.inner.redeliver(body);
        }
    }
}
