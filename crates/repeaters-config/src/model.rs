// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the delivery pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatersConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    /// Backoff and retry budget.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Dispatcher polling, leasing and concurrency.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prometheus metrics exporter.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("repeaters").join("repeaters.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("repeaters.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_true() -> bool {
    true
}

/// Exponential backoff: `delay(n) = min(base * 2^(n-1), max)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay after the first failed attempt.
    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,

    /// Ceiling on any single delay.
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,

    /// Attempts after which a retryable failure cancels the record instead.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age after which a retryable failure cancels the record instead.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: default_base_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            max_attempts: default_max_attempts(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_base_interval_secs() -> u64 {
    3600
}

fn default_max_interval_secs() -> u64 {
    7 * 24 * 3600
}

fn default_max_attempts() -> u32 {
    6
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 3600
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Sleep between polls when the last page was not full.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum records selected per poll.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Delay before retrying a failed selection query.
    #[serde(default = "default_selection_retry_delay_secs")]
    pub selection_retry_delay_secs: u64,

    /// How long a claim is held before another worker may take the record.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,

    /// Maximum repeater batches processed concurrently.
    #[serde(default = "default_max_concurrent_repeaters")]
    pub max_concurrent_repeaters: usize,

    /// Records due longer ago than this are reported as overdue by `status`.
    #[serde(default = "default_overdue_threshold_secs")]
    pub overdue_threshold_secs: u64,

    /// Restrict selection to these domains. Empty selects all.
    #[serde(default)]
    pub domains: Vec<String>,

    /// Restrict selection to these repeater ids. Empty selects all.
    #[serde(default)]
    pub repeater_ids: Vec<String>,

    /// Claimant identity written into leases. Generated when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            page_size: default_page_size(),
            selection_retry_delay_secs: default_selection_retry_delay_secs(),
            claim_lease_secs: default_claim_lease_secs(),
            max_concurrent_repeaters: default_max_concurrent_repeaters(),
            overdue_threshold_secs: default_overdue_threshold_secs(),
            domains: Vec::new(),
            repeater_ids: Vec::new(),
            worker_id: None,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    500
}

fn default_selection_retry_delay_secs() -> u64 {
    5
}

fn default_claim_lease_secs() -> u64 {
    300
}

fn default_max_concurrent_repeaters() -> usize {
    8
}

fn default_overdue_threshold_secs() -> u64 {
    600
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Default request timeout. Repeaters may override it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("repeaters/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error). `RUST_LOG`
    /// takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Address the scrape endpoint binds to.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: default_listen_address(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:9464".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults_match_documented_policy() {
        let retry = RetryConfig::default();
        assert_eq!(retry.base_interval_secs, 3600);
        assert_eq!(retry.max_interval_secs, 604_800);
        assert_eq!(retry.max_attempts, 6);
        assert_eq!(retry.max_age_secs, 604_800);
    }

    #[test]
    fn partial_scheduler_section_keeps_other_defaults() {
        let config: RepeatersConfig = toml::from_str(
            r#"
[scheduler]
page_size = 50
domains = ["demo"]
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.page_size, 50);
        assert_eq!(config.scheduler.domains, vec!["demo"]);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert!(config.scheduler.worker_id.is_none());
    }

    #[test]
    fn unknown_retry_key_is_rejected() {
        let result = toml::from_str::<RepeatersConfig>("[retry]\nmax_atempts = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn user_agent_carries_version() {
        assert!(HttpConfig::default().user_agent.starts_with("repeaters/"));
    }
}
