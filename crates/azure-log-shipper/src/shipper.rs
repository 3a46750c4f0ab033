// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, error};

use crate::constants::{self, API_VERSION, CONTENT_TYPE_JSON, DATE_HEADER, LOG_TYPE_HEADER};
use crate::errors::ShippingError;
use crate::http::build_client;
use crate::record::Record;
use crate::signer::{rfc1123_now, Signer};

#[async_trait]
pub trait Shipper: Send + Sync {
    /// Delivers one serialized batch under the given `Log-Type`.
    /// The batch either lands as a whole or not at all.
    async fn send(&self, log_type: &str, payload: Vec<u8>) -> Result<(), ShippingError>;
}

/// Serializes records into a JSON array by joining their raw bodies.
///
/// Bodies are expected to already be JSON values; they are not re-encoded.
pub fn serialize_batch(records: &[Record]) -> Vec<u8> {
    let size = records.iter().map(|r| r.body().len() + 1).sum::<usize>() + 2;
    let mut buffer = Vec::with_capacity(size);

    buffer.push(b'[');
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            buffer.push(b',');
        }
        buffer.extend_from_slice(record.body());
    }
    buffer.push(b']');

    buffer
}

pub struct ShipperConfig {
    pub workspace_id: String,
    pub shared_key: String,
    /// Overrides the public-cloud ingestion URL (without query string).
    pub endpoint: Option<String>,
    pub https_proxy: Option<String>,
    pub timeout: Option<Duration>,
}

/// Ships batches to the Azure Log Analytics Data Collector API.
#[derive(Debug, Clone)]
pub struct AzureLogShipper {
    client: reqwest::Client,
    url: String,
    signer: Signer,
}

impl AzureLogShipper {
    pub fn new(config: ShipperConfig) -> Result<Self, ShippingError> {
        let client = build_client(config.https_proxy.as_deref(), config.timeout)?;
        let endpoint = config
            .endpoint
            .unwrap_or_else(|| constants::default_endpoint(&config.workspace_id));

        Ok(AzureLogShipper {
            client,
            url: format!("{endpoint}?api-version={API_VERSION}"),
            signer: Signer::new(config.workspace_id, config.shared_key),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Shipper for AzureLogShipper {
    async fn send(&self, log_type: &str, payload: Vec<u8>) -> Result<(), ShippingError> {
        let date = rfc1123_now();
        let authorization = self.signer.sign(payload.len(), &date)?;
        let length = payload.len();

        let resp = self
            .client
            .post(&self.url)
            .header(LOG_TYPE_HEADER, log_type)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(DATE_HEADER, &date)
            .header(AUTHORIZATION, authorization)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send {length} bytes to {}: {e}", self.url);
                ShippingError::Transport(e)
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            error!("{status}: Failed to push logs: {body:?}");
            return Err(ShippingError::Status { status, body });
        }

        debug!("Shipped {length} bytes as {log_type}");
        Ok(())
    }
}
