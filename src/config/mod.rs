use serde::Deserialize;
use serde::Serialize;

use super::election::DEFAULT_REFRESH_RETRIES;
use super::election::DEFAULT_REFRESH_RETRY_INTERVAL;

mod zookeeper;

pub use self::zookeeper::ZookeeperConfig;

/// Backend specific configuration options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", content = "options", deny_unknown_fields)]
pub enum Backend {
    /// Use zookeeper as a coordination system (recommended, default).
    #[serde(rename = "zookeeper")]
    Zookeeper(ZookeeperConfig),
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::Zookeeper(ZookeeperConfig::default())
    }
}

/// Coordination primitives configuration options.
#[derive(Clone, Default, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub backend: Backend,

    /// Service discovery options.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Leader election options.
    #[serde(default)]
    pub election: ElectionConfig,

    /// Recursive service enumeration options.
    #[serde(default)]
    pub enumerator: EnumeratorConfig,

    /// Service provider options.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Service discovery options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Path under which services are registered.
    #[serde(default = "DiscoveryConfig::default_base_path")]
    pub base_path: String,
}

impl Default for DiscoveryConfig {
    fn default() -> DiscoveryConfig {
        DiscoveryConfig {
            base_path: DiscoveryConfig::default_base_path(),
        }
    }
}

impl DiscoveryConfig {
    fn default_base_path() -> String {
        "/services".into()
    }
}

/// Leader election options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Automatically run for election again when the coordinator connection is restored.
    ///
    /// When disabled, elections that lose their session must be started again explicitly.
    #[serde(default)]
    pub rejoin: bool,

    /// Extra attempts to refresh the candidates after a transient error.
    #[serde(default = "ElectionConfig::default_refresh_retries")]
    pub refresh_retries: u32,

    /// Pause (in milliseconds) between candidates refresh attempts.
    #[serde(default = "ElectionConfig::default_refresh_retry_interval")]
    pub refresh_retry_interval: u64,
}

impl Default for ElectionConfig {
    fn default() -> ElectionConfig {
        ElectionConfig {
            rejoin: false,
            refresh_retries: ElectionConfig::default_refresh_retries(),
            refresh_retry_interval: ElectionConfig::default_refresh_retry_interval(),
        }
    }
}

impl ElectionConfig {
    fn default_refresh_retries() -> u32 {
        DEFAULT_REFRESH_RETRIES
    }

    fn default_refresh_retry_interval() -> u64 {
        DEFAULT_REFRESH_RETRY_INTERVAL.as_millis() as u64
    }
}

/// Recursive service enumeration options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct EnumeratorConfig {
    /// Maximum time (in milliseconds) a full walk may take.
    #[serde(default = "EnumeratorConfig::default_timeout")]
    pub timeout: u64,
}

impl Default for EnumeratorConfig {
    fn default() -> EnumeratorConfig {
        EnumeratorConfig {
            timeout: EnumeratorConfig::default_timeout(),
        }
    }
}

impl EnumeratorConfig {
    fn default_timeout() -> u64 {
        2000
    }
}

/// Service provider options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Time (in seconds) a service instances listing is cached for.
    #[serde(default = "ProviderConfig::default_cache_ttl")]
    pub cache_ttl: u64,

    /// Instance selection strategy.
    #[serde(default)]
    pub strategy: Strategy,
}

impl Default for ProviderConfig {
    fn default() -> ProviderConfig {
        ProviderConfig {
            cache_ttl: ProviderConfig::default_cache_ttl(),
            strategy: Strategy::default(),
        }
    }
}

impl ProviderConfig {
    fn default_cache_ttl() -> u64 {
        10
    }
}

/// Supported instance selection strategies.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Strategy {
    /// Pick an instance uniformly at random on each call.
    #[serde(rename = "random")]
    Random,

    /// Cycle through instances in order.
    #[serde(rename = "round-robin")]
    RoundRobin,
}

impl Default for Strategy {
    fn default() -> Strategy {
        Strategy::Random
    }
}

#[cfg(test)]
mod tests {
    use super::Backend;
    use super::Config;
    use super::Strategy;

    #[test]
    fn defaults_for_missing_options() {
        let config: Config =
            serde_json::from_str(r#"{"backend": "zookeeper", "options": {}}"#).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.discovery.base_path, "/services");
        assert_eq!(config.enumerator.timeout, 2000);
        assert_eq!(config.provider.cache_ttl, 10);
        assert_eq!(config.provider.strategy, Strategy::Random);
        assert!(!config.election.rejoin);
        assert_eq!(config.election.refresh_retries, 3);
        assert_eq!(config.election.refresh_retry_interval, 100);
        let Backend::Zookeeper(zookeeper) = config.backend;
        assert_eq!(zookeeper.ensemble, "localhost:2181");
        assert_eq!(zookeeper.reconnect_attempts, 5);
    }

    #[test]
    fn explicit_options() {
        let config: Config = serde_json::from_str(
            r#"{
                "backend": "zookeeper",
                "options": {"ensemble": "zoo1:2181,zoo2:2181", "timeout": 5},
                "election": {"rejoin": true},
                "provider": {"strategy": "round-robin", "cache_ttl": 1}
            }"#,
        )
        .unwrap();
        let Backend::Zookeeper(zookeeper) = config.backend;
        assert_eq!(zookeeper.ensemble, "zoo1:2181,zoo2:2181");
        assert_eq!(zookeeper.timeout, 5);
        assert!(config.election.rejoin);
        assert_eq!(config.provider.strategy, Strategy::RoundRobin);
        assert_eq!(config.provider.cache_ttl, 1);
    }
}
