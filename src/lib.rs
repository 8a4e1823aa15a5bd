//! Leader election and service discovery on top of ZooKeeper.
//!
//! A `Coordinator` owns the session with the coordination store and hands out
//! the primitives built on it:
//!
//!   * `Election`: group leader and follower tracking through ephemeral sequential nodes.
//!   * `ServiceDiscovery`: advertise and look up service instances.
//!   * `ServiceProvider`: pick one instance of a service through a `ProviderStrategy`.
//!   * `ServiceNames`: recursively enumerate registered service names.
use prometheus::Registry;
use slog::Logger;

pub mod backend;
mod config;
mod coordinator;
mod discovery;
mod election;
mod enumerate;
mod error;
mod metrics;
mod provider;
mod sequence;

#[cfg(debug_assertions)]
pub mod mock;

pub use self::config::Backend as BackendConfig;
pub use self::config::Config;
pub use self::config::DiscoveryConfig;
pub use self::config::ElectionConfig;
pub use self::config::EnumeratorConfig;
pub use self::config::ProviderConfig;
pub use self::config::Strategy;
pub use self::config::ZookeeperConfig;
pub use self::coordinator::Coordinator;
pub use self::discovery::ServiceDiscovery;
pub use self::discovery::ServiceInstance;
pub use self::discovery::ServiceInstanceBuilder;
pub use self::discovery::ServiceType;
pub use self::discovery::UriPart;
pub use self::discovery::UriSpec;
pub use self::discovery::DEFAULT_SCHEME;
pub use self::election::Election;
pub use self::election::ElectionEvent;
pub use self::election::ElectionOpts;
pub use self::election::ElectionStatus;
pub use self::enumerate::ServiceNames;
pub use self::error::failure_info;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::provider::ListingCache;
pub use self::provider::ProviderStrategy;
pub use self::provider::RandomStrategy;
pub use self::provider::ResolvedInstance;
pub use self::provider::RoundRobinStrategy;
pub use self::provider::ServiceProvider;

/// Attemps to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    self::metrics::register_metrics(logger, registry);
}
