// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use azure_log_shipper::{
    Batcher, BatcherConfig, Counters, MemoryQueue, ShippingError, Shipper, SourceLoop,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const SHARED_KEY: &str = "YXp1cmUtbG9nLXNoaXBwZXItdGVzdC1zaGFyZWQta2V5";

/// Hands every payload to the test and fails the first `failures` sends.
pub struct ScriptedShipper {
    payloads: mpsc::UnboundedSender<(String, Vec<u8>)>,
    failures: AtomicUsize,
}

impl ScriptedShipper {
    pub fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shipper = Arc::new(ScriptedShipper {
            payloads: tx,
            failures: AtomicUsize::new(failures),
        });
        (shipper, rx)
    }
}

#[async_trait]
impl Shipper for ScriptedShipper {
    async fn send(&self, log_type: &str, payload: Vec<u8>) -> Result<(), ShippingError> {
        let _ = self.payloads.send((log_type.to_string(), payload));
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ShippingError::Client("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Signals when a send starts and never completes it.
pub struct StallingShipper {
    started: mpsc::UnboundedSender<()>,
}

impl StallingShipper {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(StallingShipper { started: tx }), rx)
    }
}

#[async_trait]
impl Shipper for StallingShipper {
    async fn send(&self, _log_type: &str, _payload: Vec<u8>) -> Result<(), ShippingError> {
        let _ = self.started.send(());
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// A source loop running in the background over a [`MemoryQueue`].
pub struct Pipeline {
    pub queue: MemoryQueue,
    pub counters: Arc<Counters>,
    pub cancel_token: CancellationToken,
    pub handle: JoinHandle<u64>,
}

impl Pipeline {
    pub fn start(config: BatcherConfig, shipper: Arc<dyn Shipper>) -> Self {
        let queue = MemoryQueue::new();
        let counters = Arc::new(Counters::new());
        let batcher = Batcher::new(config, shipper, counters.clone());
        let mut source_loop = SourceLoop::new(queue.consumer(), batcher, counters.clone());

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let handle = tokio::spawn(async move { source_loop.run(token).await });

        Pipeline {
            queue,
            counters,
            cancel_token,
            handle,
        }
    }

    /// Cancels consumption and waits for the final flush to settle.
    pub async fn stop(self) -> (u64, MemoryQueue, Arc<Counters>) {
        self.cancel_token.cancel();
        let consumed = self.handle.await.expect("source loop panicked");
        (consumed, self.queue, self.counters)
    }
}

pub fn batcher_config(batch_size: usize, flush_interval: Duration) -> BatcherConfig {
    BatcherConfig {
        batch_size,
        flush_interval,
        log_type: "QueueLogs".to_string(),
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn ids(payload: &[u8]) -> Vec<String> {
    let values: Vec<serde_json::Value> =
        serde_json::from_slice(payload).expect("payload is not a JSON array");
    values
        .iter()
        .map(|v| v["id"].as_str().expect("missing id").to_string())
        .collect()
}
