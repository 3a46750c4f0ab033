// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared Key authorization for the Data Collector API.
//!
//! Every request carries an `Authorization: SharedKey {workspace}:{signature}`
//! header, where the signature is an HMAC-SHA256 over a canonical string built
//! from the request method, body length, content type, `x-ms-date` value and
//! resource path, keyed with the base64-decoded workspace shared key.

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::constants::{API_RESOURCE, CONTENT_TYPE_JSON, DATE_HEADER};
use crate::errors::SignError;

type HmacSha256 = Hmac<Sha256>;

/// Computes `Authorization` tokens for a single workspace.
///
/// The shared key is kept in its base64 form and decoded on every call so a
/// malformed key surfaces as a [`SignError`] at the point of use.
#[derive(Clone)]
pub struct Signer {
    workspace_id: String,
    shared_key: String,
}

impl Signer {
    pub fn new(workspace_id: impl Into<String>, shared_key: impl Into<String>) -> Self {
        Signer {
            workspace_id: workspace_id.into(),
            shared_key: shared_key.into(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Signs a POST of `content_length` bytes sent with the given `x-ms-date`.
    pub fn sign(&self, content_length: usize, date: &str) -> Result<String, SignError> {
        let key = decode_shared_key(&self.shared_key)?;
        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignError::InvalidKeyLength)?;
        mac.update(canonical_string(content_length, date).as_bytes());
        let digest = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.workspace_id, digest))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("workspace_id", &self.workspace_id)
            .finish_non_exhaustive()
    }
}

fn canonical_string(content_length: usize, date: &str) -> String {
    format!("POST\n{content_length}\n{CONTENT_TYPE_JSON}\n{DATE_HEADER}:{date}\n{API_RESOURCE}")
}

fn decode_shared_key(shared_key: &str) -> Result<Vec<u8>, SignError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(shared_key)?)
}

/// Checks a shared key without signing anything, for startup validation.
pub fn validate_shared_key(shared_key: &str) -> Result<(), SignError> {
    let key = decode_shared_key(shared_key)?;
    HmacSha256::new_from_slice(&key).map_err(|_| SignError::InvalidKeyLength)?;
    Ok(())
}

/// RFC 1123 date with the zone spelled `GMT`, as the API requires.
pub fn rfc1123_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn rfc1123_now() -> String {
    rfc1123_date(Utc::now())
}
