use serde::Deserialize;
use serde::Serialize;

/// Zookeeper distributed coordination configuration options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct ZookeeperConfig {
    /// Zookeeper ensemble connection string.
    #[serde(default = "ZookeeperConfig::default_ensemble")]
    pub ensemble: String,

    /// Maximum number of consecutive reconnection attempts after a session is lost.
    ///
    /// Set to 0 to retry forever.
    #[serde(default = "ZookeeperConfig::default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Delay (in milliseconds) between reconnection attempts.
    #[serde(default = "ZookeeperConfig::default_reconnect_interval")]
    pub reconnect_interval: u64,

    /// Zookeeper session timeout (in seconds).
    #[serde(default = "ZookeeperConfig::default_timeout")]
    pub timeout: u64,
}

impl Default for ZookeeperConfig {
    fn default() -> ZookeeperConfig {
        ZookeeperConfig {
            ensemble: ZookeeperConfig::default_ensemble(),
            reconnect_attempts: ZookeeperConfig::default_reconnect_attempts(),
            reconnect_interval: ZookeeperConfig::default_reconnect_interval(),
            timeout: ZookeeperConfig::default_timeout(),
        }
    }
}

impl ZookeeperConfig {
    fn default_ensemble() -> String {
        "localhost:2181".into()
    }

    fn default_reconnect_attempts() -> u32 {
        5
    }

    fn default_reconnect_interval() -> u64 {
        1000
    }

    fn default_timeout() -> u64 {
        10
    }
}
