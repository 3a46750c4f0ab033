// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Failure to compute the `Authorization` token for a request.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("shared key is not valid base64: {0}")]
    InvalidSharedKey(#[from] base64::DecodeError),

    /// The `hmac` constructor is fallible in general; HMAC-SHA256 itself
    /// accepts keys of any length, so this is not expected in practice.
    #[error("shared key decodes to an unusable HMAC key")]
    InvalidKeyLength,
}

/// Failure to deliver one batch to the ingestion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// The request could not be signed, so no HTTP call was made.
    #[error("failed to sign request: {0}")]
    Signing(#[from] SignError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status code {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl ShippingError {
    /// Status code returned by the endpoint, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ShippingError::Status { status, .. } => Some(*status),
            ShippingError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

/// Failure to apply a terminal disposition to a record on its source.
#[derive(Debug, thiserror::Error)]
pub enum DispositionError {
    #[error("source channel closed")]
    Closed,

    #[error("disposition rejected by source: {0}")]
    Rejected(String),
}

/// Invalid relay configuration, detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid shared key: {0}")]
    SharedKey(#[from] SignError),
}
