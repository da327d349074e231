// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates constraints that serde attributes cannot express, such as
//! non-zero intervals, interval ordering and socket addresses.

use std::net::SocketAddr;

use crate::diagnostic::ConfigError;
use crate::model::RepeatersConfig;

/// Validate a deserialized configuration.
///
/// Collects every violation rather than failing on the first one.
pub fn validate_config(config: &RepeatersConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::invalid(
            "storage.database_path",
            "must not be empty",
        ));
    }

    let retry = &config.retry;
    for (key, value) in [
        ("retry.base_interval_secs", retry.base_interval_secs),
        ("retry.max_interval_secs", retry.max_interval_secs),
        ("retry.max_age_secs", retry.max_age_secs),
    ] {
        if value == 0 {
            errors.push(ConfigError::invalid(key, "must be greater than zero"));
        }
    }
    if retry.base_interval_secs > retry.max_interval_secs {
        errors.push(ConfigError::invalid(
            "retry.base_interval_secs",
            format!(
                "{} exceeds retry.max_interval_secs ({})",
                retry.base_interval_secs, retry.max_interval_secs
            ),
        ));
    }
    if retry.max_attempts == 0 {
        errors.push(ConfigError::invalid(
            "retry.max_attempts",
            "must be at least 1",
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.page_size == 0 {
        errors.push(ConfigError::invalid(
            "scheduler.page_size",
            "must be at least 1",
        ));
    }
    if scheduler.max_concurrent_repeaters == 0 {
        errors.push(ConfigError::invalid(
            "scheduler.max_concurrent_repeaters",
            "must be at least 1",
        ));
    }
    for (key, value) in [
        ("scheduler.poll_interval_secs", scheduler.poll_interval_secs),
        ("scheduler.claim_lease_secs", scheduler.claim_lease_secs),
        (
            "scheduler.selection_retry_delay_secs",
            scheduler.selection_retry_delay_secs,
        ),
    ] {
        if value == 0 {
            errors.push(ConfigError::invalid(key, "must be greater than zero"));
        }
    }
    // A lease shorter than a request could expire mid-send.
    if scheduler.claim_lease_secs <= config.http.timeout_secs {
        errors.push(ConfigError::invalid(
            "scheduler.claim_lease_secs",
            format!(
                "must exceed http.timeout_secs ({})",
                config.http.timeout_secs
            ),
        ));
    }
    if let Some(worker_id) = &scheduler.worker_id
        && worker_id.trim().is_empty()
    {
        errors.push(ConfigError::invalid(
            "scheduler.worker_id",
            "must not be blank when set",
        ));
    }

    if config.http.timeout_secs == 0 {
        errors.push(ConfigError::invalid(
            "http.timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.logging.level.trim().is_empty() {
        errors.push(ConfigError::invalid("logging.level", "must not be empty"));
    }

    if config.prometheus.enabled
        && config
            .prometheus
            .listen_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ConfigError::invalid(
            "prometheus.listen_address",
            format!(
                "`{}` is not a valid socket address",
                config.prometheus.listen_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
