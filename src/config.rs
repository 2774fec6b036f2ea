// src/config.rs

//! Configuration for reaching and being patient with the backing store.
//!
//! Filter *parameters* (`m`, `k`, `max_life`) never live here: they are
//! always explicit arguments to `LocalGcbf::new` / `RemoteGcbf::open`,
//! because getting them wrong against an already-populated remote store
//! is a correctness bug, not a tuning knob. What belongs here is how to
//! reach the store and how long to wait on it.

use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paging::PAGE_SIZE_CELLS;
use crate::remote::DEFAULT_TRANSACTION_RETRIES;

/// Settings for the `backend::resp` client, loaded from a `[remote]`
/// TOML table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `redis://host:port`-style address of the backing store.
    #[serde(default = "default_url")]
    pub url: String,
    /// Cells held per page, before a logical cell array is sharded
    /// across `N_0`, `N_1`, ... keys. Override only for tests.
    #[serde(default = "default_page_cells")]
    pub page_cells: u64,
    /// Attempts budgeted to an optimistic `WATCH`/commit cycle before
    /// giving up with `TransactionFailed`.
    #[serde(default = "default_transaction_retries")]
    pub transaction_retries: u32,
    /// How long a single round-trip may take before it is treated as a
    /// transport failure.
    #[serde(default = "default_round_trip_timeout_ms")]
    pub round_trip_timeout_ms: u64,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_page_cells() -> u64 {
    PAGE_SIZE_CELLS
}
fn default_transaction_retries() -> u32 {
    DEFAULT_TRANSACTION_RETRIES
}
fn default_round_trip_timeout_ms() -> u64 {
    2000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: default_url(),
            page_cells: default_page_cells(),
            transaction_retries: default_transaction_retries(),
            round_trip_timeout_ms: default_round_trip_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default)]
    remote: RemoteConfig,
}

impl RemoteConfig {
    /// Reads and parses a TOML file whose `[remote]` table holds these
    /// settings. A missing file is an error; a file present but missing
    /// some or all of `[remote]`'s fields falls back to their defaults.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig =
            toml::from_str(&contents).with_context(|| format!("failed to parse TOML from '{path}'"))?;
        Ok(raw.remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RemoteConfig::default();
        assert_eq!(cfg.url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.page_cells, PAGE_SIZE_CELLS);
        assert_eq!(cfg.transaction_retries, 5);
        assert_eq!(cfg.round_trip_timeout_ms, 2000);
    }

    #[test]
    fn parses_partial_table() {
        let raw: RawConfig = toml::from_str("[remote]\nurl = \"redis://example:1234\"\n").unwrap();
        assert_eq!(raw.remote.url, "redis://example:1234");
        assert_eq!(raw.remote.transaction_retries, 5);
    }

    #[test]
    fn parses_full_table() {
        let toml_str = r#"
            [remote]
            url = "redis://127.0.0.1:6380"
            page_cells = 1024
            transaction_retries = 3
            round_trip_timeout_ms = 500
        "#;
        let raw: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(raw.remote.page_cells, 1024);
        assert_eq!(raw.remote.transaction_retries, 3);
        assert_eq!(raw.remote.round_trip_timeout_ms, 500);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(RemoteConfig::from_file("/nonexistent/path/gcbf.toml").is_err());
    }
}
