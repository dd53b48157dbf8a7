//! Harvester configuration.
//!
//! Loaded once at startup from an optional TOML file and passed explicitly to
//! every worker. Every field has a default, so an empty file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    /// Directory owned by the harvester where clones live while indexed
    pub clone_root: PathBuf,

    /// Repositories awaiting clone
    pub clone_queue_capacity: usize,

    /// Repositories resident on disk awaiting indexing. This is the primary
    /// disk-usage control.
    pub index_queue_capacity: usize,

    pub cloners: usize,
    pub indexers: usize,

    pub clone_timeout_secs: u64,

    /// Immediate retries when the clone process cannot be spawned
    pub clone_spawn_retries: u32,

    /// Delay before retrying a failed platform request
    pub retry_delay_secs: u64,

    /// Delay before polling again once a listing is exhausted
    pub poll_interval_secs: u64,

    /// Rank given to repositories with no discoverable popularity signal
    pub default_rank: f64,

    /// JSON-lines output file for built code units
    pub output: PathBuf,

    pub user_agent: String,
    pub request_timeout_secs: u64,

    pub github: GitHubConfig,
    pub bitbucket: BitbucketConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub enabled: bool,
    pub api_url: String,
    pub token: Option<String>,
    pub rank_base: f64,
    pub popularity_batch_size: usize,
    pub skip_forks: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BitbucketConfig {
    pub enabled: bool,
    pub api_url: String,
    pub rank_base: f64,
    pub page_length: u32,
    pub popularity_concurrency: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            clone_root: std::env::temp_dir().join("repo-harvester"),
            clone_queue_capacity: 5000,
            index_queue_capacity: 10,
            cloners: 1,
            indexers: 1,
            clone_timeout_secs: 600,
            clone_spawn_retries: 2,
            retry_delay_secs: 5,
            poll_interval_secs: 60,
            default_rank: 0.5,
            output: PathBuf::from("code_units.jsonl"),
            user_agent: format!("repo-harvester/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            github: GitHubConfig::default(),
            bitbucket: BitbucketConfig::default(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.github.com".to_string(),
            token: None,
            rank_base: 5000.0,
            popularity_batch_size: 25,
            skip_forks: true,
        }
    }
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.bitbucket.org/2.0".to_string(),
            rank_base: 500.0,
            page_length: 100,
            popularity_concurrency: 8,
        }
    }
}

impl HarvesterConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("clone_queue_capacity", self.clone_queue_capacity)?;
        positive("index_queue_capacity", self.index_queue_capacity)?;
        positive("cloners", self.cloners)?;
        positive("indexers", self.indexers)?;
        positive("clone_timeout_secs", self.clone_timeout_secs as usize)?;
        positive(
            "github.popularity_batch_size",
            self.github.popularity_batch_size,
        )?;
        positive(
            "bitbucket.popularity_concurrency",
            self.bitbucket.popularity_concurrency,
        )?;

        if !(0.0..=1.0).contains(&self.default_rank) {
            return Err(ConfigError::Invalid {
                field: "default_rank",
                reason: format!("{} is outside [0, 1]", self.default_rank),
            });
        }
        for (field, base) in [
            ("github.rank_base", self.github.rank_base),
            ("bitbucket.rank_base", self.bitbucket.rank_base),
        ] {
            if base <= 1.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("logarithm base {} must exceed 1", base),
                });
            }
        }
        Ok(())
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = HarvesterConfig::from_toml_str("").unwrap();
        assert_eq!(config.clone_queue_capacity, 5000);
        assert_eq!(config.index_queue_capacity, 10);
        assert_eq!(config.github.rank_base, 5000.0);
        assert_eq!(config.bitbucket.rank_base, 500.0);
        assert!(config.github.skip_forks);
    }

    #[test]
    fn test_partial_sections_override() {
        let raw = r#"
            cloners = 4
            clone_root = "/var/tmp/clones"

            [github]
            token = "abc"
            popularity_batch_size = 10

            [bitbucket]
            enabled = false
        "#;
        let config = HarvesterConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.cloners, 4);
        assert_eq!(config.clone_root, PathBuf::from("/var/tmp/clones"));
        assert_eq!(config.github.token.as_deref(), Some("abc"));
        assert_eq!(config.github.popularity_batch_size, 10);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert!(!config.bitbucket.enabled);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = HarvesterConfig::from_toml_str("index_queue_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "index_queue_capacity",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_out_of_range_rank() {
        assert!(HarvesterConfig::from_toml_str("default_rank = 1.5").is_err());
        assert!(HarvesterConfig::from_toml_str("[github]\nrank_base = 1.0").is_err());
    }
}
