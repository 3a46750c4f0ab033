// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Data Collector API version sent as the `api-version` query parameter.
pub const API_VERSION: &str = "2016-04-01";

/// Resource path signed into every request and appended to the workspace host.
pub const API_RESOURCE: &str = "/api/logs";

pub const CONTENT_TYPE_JSON: &str = "application/json";

pub const LOG_TYPE_HEADER: &str = "Log-Type";
pub const DATE_HEADER: &str = "x-ms-date";

pub const DEFAULT_LOG_TYPE: &str = "DemoExample2";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(120);

/// Ingestion endpoint for a workspace in the public cloud.
pub fn default_endpoint(workspace_id: &str) -> String {
    format!("https://{workspace_id}.ods.opinsights.azure.com{API_RESOURCE}")
}
