//! Configuration loading and management.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tally_core::{AggregationConfig, CacheConfig, Dimension, Freshness};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Identity to query as when `--as` is not given.
    pub user: Option<String>,

    /// Same-context heartbeats at most this far apart count as continuous.
    pub collapse_gap_ms: i64,

    /// Longest span a single heartbeat may claim otherwise.
    pub max_heartbeat_ms: i64,

    /// Deadline for one event-store read.
    pub store_timeout_ms: u64,

    /// Dimensions summaries are broken down by.
    pub dimensions: BTreeSet<Dimension>,

    /// How long summaries of closed windows stay cached.
    pub bounded_freshness: Freshness,

    /// Open-ended summaries younger than this are not extended.
    pub open_refresh_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let aggregation = AggregationConfig::default();
        let cache = CacheConfig::default();
        Self {
            database_path: data_dir.join("tally.db"),
            user: None,
            collapse_gap_ms: aggregation.collapse_gap_ms,
            max_heartbeat_ms: aggregation.max_heartbeat_ms,
            store_timeout_ms: aggregation.store_timeout_ms,
            dimensions: aggregation.dimensions,
            bounded_freshness: cache.bounded_freshness,
            open_refresh_ms: cache.open_refresh_ms,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (TALLY_*)
        figment = figment.merge(Env::prefixed("TALLY_"));

        figment.extract()
    }

    /// Aggregation settings for the engine.
    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            collapse_gap_ms: self.collapse_gap_ms,
            max_heartbeat_ms: self.max_heartbeat_ms,
            store_timeout_ms: self.store_timeout_ms,
            dimensions: self.dimensions.clone(),
        }
    }

    /// Cache policy for the engine.
    pub const fn cache(&self) -> CacheConfig {
        CacheConfig {
            bounded_freshness: self.bounded_freshness,
            open_refresh_ms: self.open_refresh_ms,
        }
    }
}

/// Returns the platform-specific config directory for tally.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tally"))
}

/// Returns the platform-specific data directory for tally.
///
/// On Linux: `~/.local/share/tally`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tally"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_data_path_ends_with_tally() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "tally");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_db() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.database_path, data_dir.join("tally.db"));
    }

    #[test]
    fn test_default_config_matches_engine_defaults() {
        let config = Config::default();
        assert_eq!(config.aggregation(), AggregationConfig::default());
        assert_eq!(config.cache(), CacheConfig::default());
        assert!(config.user.is_none());
    }

    #[test]
    fn test_config_file_overrides_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
user = "alice"
max_heartbeat_ms = 60000
dimensions = ["project", "machine"]

[bounded_freshness.ttl]
ttl_ms = 5000
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(config.user.as_deref(), Some("alice"));
        assert_eq!(config.aggregation().max_heartbeat_ms, 60_000);
        assert_eq!(config.aggregation().collapse_gap_ms, 300_000);
        assert_eq!(
            config.dimensions,
            [Dimension::Project, Dimension::Machine].into_iter().collect()
        );
        assert_eq!(
            config.cache().bounded_freshness,
            Freshness::Ttl { ttl_ms: 5_000 }
        );
    }
}
