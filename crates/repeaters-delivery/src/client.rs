// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for destinations.
//!
//! Sends a [`WireRequest`] with a repeater's connection settings and maps
//! the response onto the record-level error taxonomy.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use repeaters_config::model::HttpConfig;
use repeaters_core::{AuthSettings, ConnectionSettings, DeliveryError, RepeaterError};
use serde_json::Value;
use tracing::debug;

use crate::transform::WireRequest;

/// Longest response excerpt kept in attempt messages.
const MAX_SUMMARY_CHARS: usize = 300;

/// A 2xx response from a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationResponse {
    pub status: u16,
    pub body: String,
}

impl DestinationResponse {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// `"201 Created"` style summary for the attempt log.
    pub fn summary(&self) -> String {
        status_line(self.status)
    }
}

/// Reusable client for all destinations.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct DestinationClient {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl DestinationClient {
    pub fn new(config: &HttpConfig) -> Result<Self, RepeaterError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, application/fhir+json, */*"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RepeaterError::Http {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            default_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Request timeout for a destination: its own setting, else the default.
    pub fn timeout_for(&self, connection: &ConnectionSettings) -> Duration {
        connection
            .timeout_secs
            .map_or(self.default_timeout, Duration::from_secs)
    }

    /// Send one request. Only 2xx responses are `Ok`.
    pub async fn send(
        &self,
        connection: &ConnectionSettings,
        request: &WireRequest,
    ) -> Result<DestinationResponse, DeliveryError> {
        let url = join_url(&connection.url, &request.path);
        let timeout = self.timeout_for(connection);
        let body = request.body.to_bytes()?;

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout)
            .header(CONTENT_TYPE, request.content_type)
            .body(body);
        builder = match &connection.auth {
            AuthSettings::None => builder,
            AuthSettings::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthSettings::Bearer { token } => builder.bearer_auth(token),
        };

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| network_error(&e, timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| network_error(&e, timeout))?;
        debug!(
            method = %request.method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "destination responded"
        );

        if status.is_success() {
            Ok(DestinationResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(classify_status(status.as_u16(), &body))
        }
    }
}

/// Map a non-2xx status onto the error taxonomy.
///
/// 408 and 429 are retryable like server errors; every other 4xx is a
/// permanent rejection.
pub fn classify_status(status: u16, body: &str) -> DeliveryError {
    let message = summarize(status, body);
    match status {
        408 | 429 => DeliveryError::DestinationServer { status, message },
        400..=499 => DeliveryError::DestinationClient { status, message },
        _ => DeliveryError::DestinationServer { status, message },
    }
}

/// Join a request path onto a base URL with exactly one separator.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

fn network_error(err: &reqwest::Error, timeout: Duration) -> DeliveryError {
    let message = if err.is_timeout() {
        format!("request timed out after {timeout:?}")
    } else {
        err.to_string()
    };
    DeliveryError::TransientNetwork { message }
}

fn status_line(status: u16) -> String {
    match StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{status} {reason}"),
        None => status.to_string(),
    }
}

fn summarize(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status_line(status);
    }
    let excerpt: String = body.chars().take(MAX_SUMMARY_CHARS).collect();
    if excerpt.len() < body.len() {
        format!("{}: {excerpt}...", status_line(status))
    } else {
        format!("{}: {excerpt}", status_line(status))
    }
}
