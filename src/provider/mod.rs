use std::sync::Arc;
use std::time::Duration;

use failure::ResultExt;
use slog::debug;
use slog::Logger;

use super::backend::join_path;
use super::backend::normalise_path;
use super::backend::Backend;
use super::backend::ClientError;
use super::config::ProviderConfig;
use super::discovery::ServiceInstance;
use super::metrics::PROVIDER_CACHE_HIT;
use super::metrics::PROVIDER_CACHE_MISS;
use super::metrics::PROVIDER_LOOKUP_TOTAL;
use super::metrics::PROVIDER_NOT_FOUND;
use super::Error;
use super::ErrorKind;
use super::Result;

mod cache;
mod strategy;

pub use self::cache::ListingCache;
pub use self::strategy::from_config as strategy_from_config;
pub use self::strategy::ProviderStrategy;
pub use self::strategy::RandomStrategy;
pub use self::strategy::RoundRobinStrategy;

/// Instance selected by a `ServiceProvider` along with its rendered URIs.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedInstance {
    pub instance: ServiceInstance,

    /// The instance URI template rendered against the instance.
    pub uri_spec: String,

    /// `uri_spec` followed by the service name.
    pub service_url: String,
}

/// Resolve a service name to one of its registered instances.
pub struct ServiceProvider {
    backend: Arc<dyn Backend>,
    cache: Arc<ListingCache>,
    logger: Logger,
    name: String,
    path: String,
    strategy: Box<dyn ProviderStrategy>,
}

impl ServiceProvider {
    /// Provider with a random strategy and a private listing cache.
    pub fn new<S: Into<String>>(
        backend: Arc<dyn Backend>,
        base_path: &str,
        name: S,
        logger: Logger,
    ) -> ServiceProvider {
        let name = name.into();
        let path = join_path(&normalise_path(base_path), &name);
        ServiceProvider {
            backend,
            cache: Arc::new(ListingCache::new(Duration::from_secs(
                ProviderConfig::default().cache_ttl,
            ))),
            logger,
            name,
            path,
            strategy: Box::new(RandomStrategy),
        }
    }

    /// Use the given listing cache, possibly shared with other providers.
    pub fn with_cache(mut self, cache: Arc<ListingCache>) -> ServiceProvider {
        self.cache = cache;
        self
    }

    pub fn with_strategy(mut self, strategy: Box<dyn ProviderStrategy>) -> ServiceProvider {
        self.strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the service instances.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ServiceProvider {
    /// Select an instance of the service.
    ///
    /// An empty or missing service and an instance that vanished after being
    /// selected are all reported as `ErrorKind::NotFound`.
    pub fn get_instance(&self) -> Result<ResolvedInstance> {
        PROVIDER_LOOKUP_TOTAL.inc();
        let listing = self.listing()?;
        let id = match self.strategy.choose(&listing) {
            Some(id) => id.clone(),
            None => return Err(self.not_found()),
        };

        let path = join_path(&self.path, &id);
        let data = match self.backend.data(&path) {
            Ok(data) => data,
            Err(ClientError::NoNode) => {
                debug!(
                    self.logger, "Selected instance vanished, evicting cached listing";
                    "service" => &self.name, "path" => &path
                );
                self.cache.invalidate(&self.path);
                return Err(self.not_found());
            }
            Err(error) => return Err(Error::backend("service instance lookup", error)),
        };
        let instance: ServiceInstance =
            serde_json::from_slice(&data).context(ErrorKind::Decode("service instance"))?;
        let uri_spec = instance.uri();
        let service_url = format!("{}/{}", uri_spec, instance.name);
        Ok(ResolvedInstance {
            instance,
            uri_spec,
            service_url,
        })
    }

    /// Instance ids from the cache or, on a miss, from the store.
    fn listing(&self) -> Result<Vec<String>> {
        if let Some(listing) = self.cache.get(&self.path) {
            PROVIDER_CACHE_HIT.inc();
            debug!(self.logger, "Using cached instances listing"; "service" => &self.name);
            return Ok(listing);
        }
        PROVIDER_CACHE_MISS.inc();
        let mut listing = match self.backend.children(&self.path) {
            Ok((listing, _)) => listing,
            Err(ClientError::NoNode) => return Err(self.not_found()),
            Err(error) => return Err(Error::backend("service instances lookup", error)),
        };
        if listing.is_empty() {
            return Err(self.not_found());
        }
        listing.sort();
        self.cache.insert(self.path.clone(), listing.clone());
        Ok(listing)
    }

    fn not_found(&self) -> Error {
        PROVIDER_NOT_FOUND.inc();
        let message = format!("no instances found for service '{}'", self.name);
        ErrorKind::NotFound(message).into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::config::ProviderConfig;
    use super::super::discovery::ServiceDiscovery;
    use super::super::discovery::ServiceInstance;
    use super::super::mock::MockCoordinator;
    use super::ListingCache;
    use super::RoundRobinStrategy;
    use super::ServiceProvider;

    const BASE: &str = "/services";

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn discovery(mock: &MockCoordinator, name: &str, port: u16) -> ServiceDiscovery {
        let instance = ServiceInstance::builder()
            .name(name)
            .address("localhost")
            .port(port)
            .build();
        ServiceDiscovery::new(mock.session(), BASE, instance, logger())
    }

    fn provider(mock: &MockCoordinator, name: &str) -> ServiceProvider {
        ServiceProvider::new(mock.session(), BASE, name, logger())
    }

    fn uncached(provider: ServiceProvider) -> ServiceProvider {
        provider.with_cache(Arc::new(ListingCache::new(Duration::from_secs(0))))
    }

    #[test]
    fn private_cache_uses_configured_default_ttl() {
        let mock = MockCoordinator::new(logger());
        let provider = provider(&mock, "svc");
        let ttl = Duration::from_secs(ProviderConfig::default().cache_ttl);
        assert_eq!(provider.cache.ttl(), ttl);
    }

    #[test]
    fn missing_or_empty_service_is_not_found() {
        let mock = MockCoordinator::new(logger());
        let error = provider(&mock, "svc").get_instance().unwrap_err();
        assert!(error.is_not_found());
        mock.store.put("/services/svc", b"");
        let error = provider(&mock, "svc").get_instance().unwrap_err();
        assert!(error.is_not_found());
    }

    #[test]
    fn resolves_registered_instance() {
        let mock = MockCoordinator::new(logger());
        let registered = discovery(&mock, "svc/v1", 12345).register_service().unwrap();
        let resolved = provider(&mock, "svc/v1").get_instance().unwrap();
        assert_eq!(resolved.instance, registered);
        assert_eq!(resolved.instance.address, "localhost");
        assert_eq!(resolved.instance.port, 12345);
        assert_eq!(resolved.uri_spec, "http://localhost:12345");
        assert_eq!(resolved.service_url, "http://localhost:12345/svc/v1");
    }

    #[test]
    fn round_robin_visits_each_instance_once_per_cycle() {
        let mock = MockCoordinator::new(logger());
        let discovery = discovery(&mock, "svc", 80);
        for _ in 0..3 {
            discovery.register_service().unwrap();
        }
        let provider =
            provider(&mock, "svc").with_strategy(Box::new(RoundRobinStrategy::default()));
        let ids: Vec<String> = (0..6)
            .map(|_| provider.get_instance().unwrap().instance.id)
            .collect();
        let mut cycle = ids[0..3].to_vec();
        assert_eq!(&ids[3..], &cycle[..]);
        cycle.sort();
        cycle.dedup();
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn round_robin_survives_shrinking_listing() {
        let mock = MockCoordinator::new(logger());
        let discovery = discovery(&mock, "svc", 80);
        let ids: Vec<String> = (0..3)
            .map(|_| discovery.register_service().unwrap().id)
            .collect();
        let provider = uncached(provider(&mock, "svc"))
            .with_strategy(Box::new(RoundRobinStrategy::default()));
        provider.get_instance().unwrap();
        provider.get_instance().unwrap();
        discovery.unregister_service(&ids[0]).unwrap();
        discovery.unregister_service(&ids[1]).unwrap();
        let sole = provider.get_instance().unwrap();
        assert_eq!(sole.instance.id, ids[2]);
    }

    #[test]
    fn cache_hit_skips_the_store() {
        let mock = MockCoordinator::new(logger());
        let discovery = discovery(&mock, "svc", 80);
        let first = discovery.register_service().unwrap();
        let cached = provider(&mock, "svc");
        assert_eq!(cached.get_instance().unwrap().instance.id, first.id);
        discovery.register_service().unwrap();
        for _ in 0..10 {
            assert_eq!(cached.get_instance().unwrap().instance.id, first.id);
        }

        let fresh = uncached(provider(&mock, "svc"))
            .with_strategy(Box::new(RoundRobinStrategy::default()));
        let mut seen: Vec<String> = (0..2)
            .map(|_| fresh.get_instance().unwrap().instance.id)
            .collect();
        seen.dedup();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn vanished_instance_is_not_found_and_evicted() {
        let mock = MockCoordinator::new(logger());
        let discovery = discovery(&mock, "svc", 80);
        let registered = discovery.register_service().unwrap();
        let cache = Arc::new(ListingCache::new(Duration::from_secs(60)));
        let provider = provider(&mock, "svc").with_cache(Arc::clone(&cache));
        provider.get_instance().unwrap();
        assert!(cache.get("/services/svc").is_some());

        discovery.unregister_service(&registered.id).unwrap();
        let error = provider.get_instance().unwrap_err();
        assert!(error.is_not_found());
        assert!(cache.get("/services/svc").is_none());
        assert!(provider.get_instance().unwrap_err().is_not_found());
    }

    #[test]
    fn shared_cache_serves_all_providers() {
        let mock = MockCoordinator::new(logger());
        let discovery = discovery(&mock, "svc", 80);
        let first = discovery.register_service().unwrap();
        let cache = Arc::new(ListingCache::new(Duration::from_secs(60)));
        let one = provider(&mock, "svc").with_cache(Arc::clone(&cache));
        let two = provider(&mock, "svc").with_cache(Arc::clone(&cache));
        one.get_instance().unwrap();
        discovery.register_service().unwrap();
        for _ in 0..5 {
            assert_eq!(two.get_instance().unwrap().instance.id, first.id);
        }
    }
}
