//! Store configuration
//!
//! Settings are read from the environment with a default for every value:
//!
//! | Variable                   | Default                              |
//! |----------------------------|--------------------------------------|
//! | `CODETREE_DB_PATH`         | `~/.codetree/database/codetree.db`   |
//! | `CODETREE_BUSY_TIMEOUT_MS` | `5000`                               |
//! | `CODETREE_EVENT_CAPACITY`  | `128`                                |
//!
//! Values that do not parse fall back to the default.

use std::path::PathBuf;

pub const DB_PATH_VAR: &str = "CODETREE_DB_PATH";
pub const BUSY_TIMEOUT_VAR: &str = "CODETREE_BUSY_TIMEOUT_MS";
pub const EVENT_CAPACITY_VAR: &str = "CODETREE_EVENT_CAPACITY";

/// SQLite busy timeout applied to every connection, in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
/// Buffer size of the tree event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// libsql database file
    pub db_path: PathBuf,
    /// SQLite busy timeout applied to every connection
    pub busy_timeout_ms: u64,
    /// Buffer size of the tree event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            event_channel_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// `~/.codetree/database/codetree.db`, or a relative path if there is no home directory
pub fn default_db_path() -> PathBuf {
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(".codetree").join("database").join("codetree.db")
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment, in `from_env`)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = match lookup(DB_PATH_VAR) {
            Some(path) if !path.trim().is_empty() => {
                tracing::info!("Using database path from {}: {}", DB_PATH_VAR, path);
                PathBuf::from(path)
            }
            _ => defaults.db_path,
        };
        let busy_timeout_ms = lookup(BUSY_TIMEOUT_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(defaults.busy_timeout_ms);
        let event_channel_capacity = lookup(EVENT_CAPACITY_VAR)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(defaults.event_channel_capacity);

        Self {
            db_path,
            busy_timeout_ms,
            event_channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.event_channel_capacity, 128);
        assert!(config.db_path.ends_with(".codetree/database/codetree.db"));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = StoreConfig::from_lookup(lookup(&[
            (DB_PATH_VAR, "/tmp/trees.db"),
            (BUSY_TIMEOUT_VAR, "250"),
            (EVENT_CAPACITY_VAR, "16"),
        ]));
        assert_eq!(config.db_path, PathBuf::from("/tmp/trees.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.event_channel_capacity, 16);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = StoreConfig::from_lookup(lookup(&[
            (BUSY_TIMEOUT_VAR, "soon"),
            (EVENT_CAPACITY_VAR, "0"),
        ]));
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.event_channel_capacity, 128);
    }
}
