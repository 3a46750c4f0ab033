// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery counters injected into the pipeline.
//!
//! The batcher and source loop report through a [`MetricsRecorder`] handed to
//! them at construction. [`Counters`] keeps plain atomics that can be read back
//! as a [`MetricsSnapshot`] for the end-of-run summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub trait MetricsRecorder: Send + Sync {
    /// A record was read from the source.
    fn record_received(&self) {}

    /// A flush swapped out the open batch, empty or not.
    fn record_flush(&self) {}

    /// A non-empty batch was handed to the shipper.
    fn record_attempt(&self);

    /// A batch of `records` records was delivered.
    fn record_success(&self, records: usize);

    /// A batch of `records` records failed and was requeued.
    fn record_failure(&self, records: usize);

    /// Settling a record on its source failed.
    fn record_disposition_error(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn record_attempt(&self) {}
    fn record_success(&self, _records: usize) {}
    fn record_failure(&self, _records: usize) {}
}

#[derive(Debug, Default)]
pub struct Counters {
    received: AtomicU64,
    flushes: AtomicU64,
    batches_total: AtomicU64,
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    records_succeeded: AtomicU64,
    records_failed: AtomicU64,
    disposition_errors: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_succeeded: self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_succeeded: self.records_succeeded.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            disposition_errors: self.disposition_errors.load(Ordering::Relaxed),
        }
    }
}

impl MetricsRecorder for Counters {
    fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attempt(&self) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, records: usize) {
        self.batches_succeeded.fetch_add(1, Ordering::Relaxed);
        self.records_succeeded
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    fn record_failure(&self, records: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records as u64, Ordering::Relaxed);
    }

    fn record_disposition_error(&self) {
        self.disposition_errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub flushes: u64,
    pub batches_total: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub records_succeeded: u64,
    pub records_failed: u64,
    pub disposition_errors: u64,
}

impl MetricsSnapshot {
    /// Records handed to the shipper, whatever the outcome.
    pub fn records_total(&self) -> u64 {
        self.records_succeeded + self.records_failed
    }

    /// Fraction of shipped records that were delivered. `None` before any
    /// delivery was attempted.
    pub fn availability(&self) -> Option<f64> {
        let total = self.records_total();
        if total == 0 {
            return None;
        }
        Some(self.records_succeeded as f64 / total as f64)
    }

    /// Shipped records per second over `elapsed`.
    pub fn rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.records_total() as f64 / secs
    }
}
