// SPDX-FileCopyrightText: 2026 Repeaters Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./repeaters.toml` > `~/.config/repeaters/repeaters.toml`
//! > `/etc/repeaters/repeaters.toml` with environment variable overrides via the
//! `REPEATERS_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::RepeatersConfig;

/// Config file name looked up in every layer of the hierarchy.
pub const CONFIG_FILE_NAME: &str = "repeaters.toml";

/// Section names recognised by the env mapping, in match order.
const SECTIONS: &[&str] = &[
    "storage",
    "retry",
    "scheduler",
    "http",
    "logging",
    "prometheus",
];

/// Standard config file locations, lowest precedence first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/repeaters").join(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("repeaters").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from(CONFIG_FILE_NAME));
    paths
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/repeaters/repeaters.toml`
/// 3. `~/.config/repeaters/repeaters.toml`
/// 4. `./repeaters.toml`
/// 5. `REPEATERS_*` environment variables
pub fn load_config() -> Result<RepeatersConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<RepeatersConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(RepeatersConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<RepeatersConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(RepeatersConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for hierarchy loading, before extraction.
pub fn build_figment() -> Figment {
    config_paths().into_iter().fold(
        Figment::new().merge(Serialized::defaults(RepeatersConfig::default())),
        |figment, path| figment.merge(Toml::file(path)),
    )
    .merge(env_provider())
}

/// Maps `REPEATERS_SCHEDULER_PAGE_SIZE` to `scheduler.page_size`.
///
/// Only the first underscore after a known section name becomes a dot, since
/// key names themselves contain underscores.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("REPEATERS_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(map_env_key("scheduler_page_size"), "scheduler.page_size");
        assert_eq!(
            map_env_key("retry_base_interval_secs"),
            "retry.base_interval_secs"
        );
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn local_file_has_highest_file_precedence() {
        let paths = config_paths();
        assert_eq!(paths.last(), Some(&PathBuf::from(CONFIG_FILE_NAME)));
        assert!(paths[0].starts_with("/etc/repeaters"));
    }

    #[test]
    fn env_overrides_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "[scheduler]\npage_size = 20\n")?;
            jail.set_env("REPEATERS_SCHEDULER_PAGE_SIZE", "75");
            jail.set_env("REPEATERS_HTTP_TIMEOUT_SECS", "9");
            let config: RepeatersConfig = Figment::new()
                .merge(Serialized::defaults(RepeatersConfig::default()))
                .merge(Toml::file(CONFIG_FILE_NAME))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.scheduler.page_size, 75);
            assert_eq!(config.http.timeout_secs, 9);
            Ok(())
        });
    }
}
