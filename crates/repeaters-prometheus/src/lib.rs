// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metrics for the delivery pipeline.
//!
//! Recording helpers use the metrics-rs facade; [`PrometheusExporter`]
//! installs the Prometheus recorder and, optionally, its scrape listener.

pub mod recording;

use std::net::SocketAddr;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use repeaters_core::RepeaterError;

pub use recording::{
    record_attempt, record_selection_error, record_send_latency, record_write_back_failure,
    set_due_records,
};

/// Installed Prometheus recorder.
///
/// Only one recorder can be installed per process.
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    /// Install the recorder and serve `/metrics` on `listen_address`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(listen_address: &str) -> Result<Self, RepeaterError> {
        let addr: SocketAddr = listen_address.parse().map_err(|e| {
            RepeaterError::Config(format!(
                "invalid prometheus listen address `{listen_address}`: {e}"
            ))
        })?;
        let builder = PrometheusBuilder::new().with_http_listener(addr);
        let handle = builder.install_recorder().map_err(|e| {
            RepeaterError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;
        recording::register_metrics();
        tracing::info!(%addr, "prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Install the recorder without an HTTP listener, for rendering on demand.
    pub fn install_recorder_only() -> Result<Self, RepeaterError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            RepeaterError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;
        recording::register_metrics();
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
