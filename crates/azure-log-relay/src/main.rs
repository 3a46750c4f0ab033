// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use azure_log_shipper::{
    AzureLogShipper, Batcher, Counters, MemoryQueue, RelayConfig, SourceLoop,
};

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run());
    // The stdin reader can still be parked in a blocking read.
    runtime.shutdown_background();
    code
}

async fn run() -> ExitCode {
    let log_level = env::var("AZURE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on azure log relay startup: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Loaded configuration: {config:?}");

    let shipper = match AzureLogShipper::new(config.shipper_config()) {
        Ok(shipper) => Arc::new(shipper),
        Err(e) => {
            error!("Error creating shipper: {e}");
            return ExitCode::FAILURE;
        }
    };

    let counters = Arc::new(Counters::new());
    let batcher = Batcher::new(config.batcher_config(), shipper, counters.clone());

    let queue = MemoryQueue::new();
    tokio::spawn(read_stdin(queue.clone()));

    let cancel_token = CancellationToken::new();
    tokio::spawn(stop_after(config.lifetime, cancel_token.clone()));

    info!(
        "Relaying records as {} in batches of {} to workspace {}",
        config.log_type, config.batch_size, config.workspace_id
    );

    let started = Instant::now();
    let mut source_loop = SourceLoop::new(queue.consumer(), batcher, counters.clone());
    let consumed = source_loop.run(cancel_token).await;
    let elapsed = started.elapsed();

    let snapshot = counters.snapshot();
    let stats = queue.stats();
    info!(
        "Consumed {consumed} records in {:.1}s: {} batches ({} failed), {} records delivered, {} requeued, {} still queued",
        elapsed.as_secs_f64(),
        snapshot.batches_total,
        snapshot.batches_failed,
        snapshot.records_succeeded,
        stats.requeued,
        stats.depth,
    );
    match snapshot.availability() {
        Some(availability) => info!(
            "Availability {:.2}%, {:.1} records/s",
            availability * 100.0,
            snapshot.rate(elapsed)
        ),
        None => info!("No batches were shipped"),
    }
    if snapshot.disposition_errors > 0 {
        warn!("{} records could not be settled", snapshot.disposition_errors);
    }

    ExitCode::SUCCESS
}

/// Publishes every non-empty stdin line as one record.
async fn read_stdin(queue: MemoryQueue) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if queue.publish(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("Reached end of input");
                break;
            }
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        }
    }
}

/// Cancels consumption after `lifetime`, or on Ctrl-C. A zero lifetime only
/// stops on Ctrl-C.
async fn stop_after(lifetime: Duration, cancel_token: CancellationToken) {
    let deadline = async {
        if lifetime.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(lifetime).await;
        }
    };

    tokio::pin!(deadline);

    tokio::select! {
        _ = &mut deadline => info!("Lifetime of {}s elapsed, shutting down", lifetime.as_secs()),
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {e}");
                deadline.await;
            }
        },
    }
    cancel_token.cancel();
}
