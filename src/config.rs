//! Service Configuration
//!
//! File-based settings for the cache service. Every field has a default, so
//! an empty or partial YAML document is valid; the CLI overrides a handful
//! of fields after loading.

use crate::cache::backend::RestRowStoreConfig;
use crate::cache::storage::{LocalTierConfig, MemoryTierConfig, RemoteTierConfig, DEFAULT_PREFIX};
use crate::cache::tier::{LOCAL_DEFAULT_TTL, MEMORY_DEFAULT_MAX_ENTRIES, MEMORY_DEFAULT_TTL, REMOTE_DEFAULT_TTL};
use crate::cache::TieredCacheConfig;
use crate::error::{Error, Result};
use crate::network::{NetworkCacheConfig, DEFAULT_API_PATTERNS, DEFAULT_IMAGE_HOSTS};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Sections
// =============================================================================

/// Ephemeral tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_entries: MEMORY_DEFAULT_MAX_ENTRIES,
            ttl_secs: MEMORY_DEFAULT_TTL.as_secs(),
        }
    }
}

/// Persistent-local tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub prefix: String,
    pub ttl_secs: u64,
    /// Byte quota of the file store; unlimited when absent
    pub quota_bytes: Option<u64>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            ttl_secs: LOCAL_DEFAULT_TTL.as_secs(),
            quota_bytes: Some(5 * 1024 * 1024),
        }
    }
}

/// Persistent-remote tier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL of the row service; rows stay in process memory when absent
    pub url: Option<String>,
    pub api_key: String,
    pub table: String,
    pub ttl_secs: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: String::new(),
            table: "unified_cache".to_string(),
            ttl_secs: REMOTE_DEFAULT_TTL.as_secs(),
            timeout_secs: 10,
        }
    }
}

/// Network cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Origin the proxy fronts
    pub origin: String,
    pub prefix: String,
    pub version: String,
    pub api_patterns: Vec<String>,
    pub image_hosts: Vec<String>,
    pub api_max_age_secs: u64,
    pub image_max_age_secs: u64,
    pub image_max_entries: usize,
    pub api_max_entries: usize,
    pub static_max_entries: usize,
    pub sweep_interval_secs: u64,
    pub upstream_timeout_secs: u64,
    pub precache: Vec<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            prefix: "dextrends".to_string(),
            version: "1.1.0".to_string(),
            api_patterns: DEFAULT_API_PATTERNS.iter().map(|p| p.to_string()).collect(),
            image_hosts: DEFAULT_IMAGE_HOSTS.iter().map(|h| h.to_string()).collect(),
            api_max_age_secs: 24 * 60 * 60,
            image_max_age_secs: 24 * 60 * 60,
            image_max_entries: 200,
            api_max_entries: 500,
            static_max_entries: 300,
            sweep_interval_secs: 30 * 60,
            upstream_timeout_secs: 30,
            precache: vec!["/".to_string(), "/manifest.json".to_string()],
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Complete service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub memory: MemorySettings,
    pub local: LocalSettings,
    pub remote: RemoteSettings,
    pub network: NetworkSettings,
    /// Period of the tiered cache cleanup task
    pub cleanup_interval_secs: u64,
    /// JSON documents loaded into the cache at startup
    pub warm_urls: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memory: MemorySettings::default(),
            local: LocalSettings::default(),
            remote: RemoteSettings::default(),
            network: NetworkSettings::default(),
            cleanup_interval_secs: 5 * 60,
            warm_urls: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse settings from a YAML document
    pub fn from_yaml(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let settings = Self::from_yaml(&source)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.max_entries == 0 {
            return Err(Error::Configuration("memory.max_entries must be positive".into()));
        }
        let network = &self.network;
        if network.image_max_entries == 0 || network.api_max_entries == 0 || network.static_max_entries == 0 {
            return Err(Error::Configuration("network bucket bounds must be positive".into()));
        }
        if self.cleanup_interval_secs == 0 || self.network.sweep_interval_secs == 0 {
            return Err(Error::Configuration("task intervals must be positive".into()));
        }
        if self.local.prefix.is_empty() {
            return Err(Error::Configuration("local.prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.network.sweep_interval_secs)
    }

    /// Orchestrator configuration
    pub fn tiered_cache_config(&self) -> TieredCacheConfig {
        TieredCacheConfig {
            memory: MemoryTierConfig {
                max_entries: self.memory.max_entries,
                default_ttl: Duration::from_secs(self.memory.ttl_secs),
            },
            local: LocalTierConfig {
                prefix: self.local.prefix.clone(),
                default_ttl: Duration::from_secs(self.local.ttl_secs),
            },
            remote: RemoteTierConfig {
                default_ttl: Duration::from_secs(self.remote.ttl_secs),
            },
            ..Default::default()
        }
    }

    /// Row service configuration, if a remote URL is set
    pub fn row_store_config(&self) -> Option<RestRowStoreConfig> {
        self.remote.url.as_ref().map(|url| RestRowStoreConfig {
            base_url: url.clone(),
            api_key: self.remote.api_key.clone(),
            table: self.remote.table.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
        })
    }

    /// Network cache configuration
    pub fn network_cache_config(&self) -> Result<NetworkCacheConfig> {
        let origin = Url::parse(&self.network.origin)
            .map_err(|e| Error::Configuration(format!("invalid origin '{}': {}", self.network.origin, e)))?;

        let mut config = NetworkCacheConfig::for_origin(origin).with_api_patterns(&self.network.api_patterns)?;
        config.prefix = self.network.prefix.clone();
        config.version = self.network.version.clone();
        config.image_hosts = self.network.image_hosts.clone();
        config.api_max_age = Duration::from_secs(self.network.api_max_age_secs);
        config.image_max_age = Duration::from_secs(self.network.image_max_age_secs);
        config.image_max_entries = self.network.image_max_entries;
        config.api_max_entries = self.network.api_max_entries;
        config.static_max_entries = self.network.static_max_entries;
        config.precache = self.network.precache.clone();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.memory.max_entries, 100);
        assert_eq!(settings.memory.ttl_secs, 300);
        assert_eq!(settings.local.prefix, "dextrends_cache_");
        assert_eq!(settings.remote.table, "unified_cache");
        assert_eq!(settings.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(settings.sweep_interval(), Duration::from_secs(1800));
        assert!(settings.row_store_config().is_none());

        let network = settings.network_cache_config().unwrap();
        assert_eq!(network.version, "1.1.0");
        assert_eq!(network.image_max_entries, 200);
        assert_eq!(network.api_max_entries, 500);
        assert_eq!(network.static_max_entries, 300);
        assert_eq!(network.api_patterns.len(), DEFAULT_API_PATTERNS.len());
    }

    #[test]
    fn test_partial_yaml() {
        let settings = Settings::from_yaml(
            r#"
memory:
  max_entries: 500
remote:
  url: https://cache.dextrends.app
  api_key: anon
warm_urls:
  - https://pokeapi.co/api/v2/pokemon/25
"#,
        )
        .unwrap();

        assert_eq!(settings.memory.max_entries, 500);
        assert_eq!(settings.memory.ttl_secs, 300);
        assert_eq!(settings.warm_urls.len(), 1);

        let rows = settings.row_store_config().unwrap();
        assert_eq!(rows.base_url, "https://cache.dextrends.app");
        assert_eq!(rows.table, "unified_cache");

        let tiers = settings.tiered_cache_config();
        assert_eq!(tiers.memory.max_entries, 500);
        assert_eq!(tiers.remote.default_ttl, Duration::from_secs(86400));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Settings::from_yaml("").unwrap(), Settings::default());
    }

    #[test]
    fn test_invalid_settings() {
        assert_matches!(
            Settings::from_yaml("memory:\n  max_entries: 0\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(Settings::from_yaml("memory: [1, 2"), Err(Error::YamlParse(_)));
        assert_matches!(
            Settings::from_yaml("network:\n  static_max_entries: 0\n"),
            Err(Error::Configuration(_))
        );

        let mut settings = Settings::default();
        settings.network.origin = "not a url".into();
        assert_matches!(settings.network_cache_config(), Err(Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cleanup_interval_secs: 60").unwrap();
        writeln!(file, "network:\n  version: 1.2.0").unwrap();

        let settings = tokio_test::assert_ok!(Settings::load(file.path()).await);
        assert_eq!(settings.cleanup_interval_secs, 60);
        assert_eq!(settings.network.version, "1.2.0");
    }
}
