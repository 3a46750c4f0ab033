// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays queued log records to the Azure Log Analytics Data Collector API.
//!
//! Records are pulled from a [`RecordSource`], grouped by a [`Batcher`] and
//! shipped as one signed JSON array per batch. A delivered batch is
//! acknowledged record by record; a failed one is requeued as a whole.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod config;
pub mod constants;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod record;
pub mod shipper;
pub mod signer;
pub mod source;

pub use batcher::{Batcher, BatcherConfig};
pub use config::RelayConfig;
pub use errors::{ConfigError, DispositionError, ShippingError, SignError};
pub use metrics::{Counters, MetricsRecorder, MetricsSnapshot, NoopRecorder};
pub use record::{Batch, Disposition, Record};
pub use shipper::{serialize_batch, AzureLogShipper, Shipper, ShipperConfig};
pub use signer::Signer;
pub use source::{MemoryQueue, QueueConsumer, QueueStats, RecordSource, SourceLoop, SourceState};
