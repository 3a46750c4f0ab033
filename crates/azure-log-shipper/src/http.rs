// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use crate::errors::ShippingError;

const PROXY_SCHEMES: [&str; 4] = ["http", "https", "socks5", "socks5h"];

/// Builds the client shared by every delivery of one shipper.
///
/// The proxy, when set, applies to all outbound traffic. An unparseable proxy
/// address or a scheme other than http(s)/socks5(h) is a construction error
/// rather than a silent direct connection.
pub fn build_client(
    https_proxy: Option<&str>,
    timeout: Option<Duration>,
) -> Result<reqwest::Client, ShippingError> {
    let mut client = reqwest::Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(timeout) = timeout {
        client = client.timeout(timeout);
    }

    if let Some(proxy) = https_proxy {
        client = client.proxy(parse_proxy(proxy)?);
    }

    client
        .build()
        .map_err(|e| ShippingError::Client(e.to_string()))
}

fn parse_proxy(proxy: &str) -> Result<reqwest::Proxy, ShippingError> {
    let url = reqwest::Url::parse(proxy)
        .map_err(|e| ShippingError::Client(format!("invalid proxy {proxy}: {e}")))?;
    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(ShippingError::Client(format!(
            "unsupported proxy scheme {} in {proxy}",
            url.scheme()
        )));
    }
    reqwest::Proxy::all(url)
        .map_err(|e| ShippingError::Client(format!("invalid proxy {proxy}: {e}")))
}
