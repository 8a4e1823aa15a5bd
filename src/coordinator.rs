use std::sync::Arc;
use std::time::Duration;

use slog::Logger;

use super::backend::zookeeper::Zookeeper;
use super::backend::Backend;
use super::config::Backend as BackendConfig;
use super::discovery::ServiceDiscovery;
use super::discovery::ServiceInstance;
use super::enumerate::ServiceNames;
use super::provider::strategy_from_config;
use super::provider::ListingCache;
use super::provider::ServiceProvider;
use super::Config;
use super::Election;
use super::ElectionOpts;
use super::Result;

/// Interface to access distributed coordination services.
///
/// All primitives created from the same `Coordinator` share its session
/// with the coordination store.
#[derive(Clone)]
pub struct Coordinator {
    backend: Arc<dyn Backend>,
    config: Config,
    logger: Logger,
}

impl Coordinator {
    pub fn new(config: Config, logger: Logger) -> Result<Coordinator> {
        let backend: Arc<dyn Backend> = match config.backend.clone() {
            BackendConfig::Zookeeper(zookeeper) => {
                Arc::new(Zookeeper::new(zookeeper, logger.clone())?)
            }
        };
        Ok(Coordinator::with_backend(backend, config, logger))
    }

    /// Create a `Coordinator` from the given backend.
    pub fn with_backend(backend: Arc<dyn Backend>, config: Config, logger: Logger) -> Coordinator {
        Coordinator {
            backend,
            config,
            logger,
        }
    }

    /// End the session with the coordination store.
    ///
    /// Ephemeral nodes (election candidates, service registrations) are removed by the store.
    pub fn close(&self) {
        self.backend.close();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Coordinator {
    /// Participate in the election at `path`, identified by `identity`.
    ///
    /// The election starts unstarted: call `Election::start` to run.
    pub fn election<P, I>(&self, path: P, identity: I) -> Election
    where
        P: Into<String>,
        I: Into<String>,
    {
        let config = &self.config.election;
        let opts = ElectionOpts::new(path, identity)
            .rejoin(config.rejoin)
            .retries(config.refresh_retries)
            .retry_interval(Duration::from_millis(config.refresh_retry_interval));
        self.election_with(opts)
    }

    pub fn election_with(&self, opts: ElectionOpts) -> Election {
        Election::new(Arc::clone(&self.backend), opts, self.logger.clone())
    }

    /// Advertise and look up service instances under the configured base path.
    pub fn service_discovery(&self, instance: ServiceInstance) -> ServiceDiscovery {
        let timeout = Duration::from_millis(self.config.enumerator.timeout);
        ServiceDiscovery::new(
            Arc::clone(&self.backend),
            &self.config.discovery.base_path,
            instance,
            self.logger.clone(),
        )
        .with_names_timeout(timeout)
    }

    /// Resolve instances of the named service.
    ///
    /// Each provider gets its own listing cache: use `ServiceProvider::with_cache` to share one.
    pub fn service_provider<S: Into<String>>(&self, name: S) -> ServiceProvider {
        let ttl = Duration::from_secs(self.config.provider.cache_ttl);
        let cache = Arc::new(ListingCache::new(ttl));
        let strategy = strategy_from_config(self.config.provider.strategy);
        ServiceProvider::new(
            Arc::clone(&self.backend),
            &self.config.discovery.base_path,
            name,
            self.logger.clone(),
        )
        .with_cache(cache)
        .with_strategy(strategy)
    }

    /// Recursively enumerate registered service names.
    pub fn service_names(&self) -> ServiceNames {
        let timeout = Duration::from_millis(self.config.enumerator.timeout);
        ServiceNames::new(Arc::clone(&self.backend), timeout, self.logger.clone())
    }
}

#[cfg(test)]
mod tests {
    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::config::Strategy;
    use super::super::discovery::ServiceInstance;
    use super::super::mock::MockCoordinator;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn primitives_share_the_session() {
        let mock = MockCoordinator::new(logger());
        let session = mock.session();
        let coordinator = mock.with_session(session.clone());
        let election = coordinator.election("/election", "alpha");
        election.start().unwrap();
        let instance = ServiceInstance::builder()
            .name("svc")
            .address("localhost")
            .port(80)
            .build();
        coordinator.service_discovery(instance).register_service().unwrap();

        session.expire();
        assert!(mock.store.children("/election").is_empty());
        assert!(mock.store.children("/services/svc").is_empty());
    }

    #[test]
    fn configuration_is_applied() {
        let mut mock = MockCoordinator::new(logger());
        mock.config.discovery.base_path = "registry".into();
        mock.config.provider.strategy = Strategy::RoundRobin;
        mock.config.election.rejoin = true;
        let coordinator = mock.mock();

        let instance = ServiceInstance::builder()
            .name("svc")
            .address("localhost")
            .port(80)
            .build();
        let discovery = coordinator.service_discovery(instance);
        assert_eq!(discovery.base_path(), "/registry");
        let first = discovery.register_service().unwrap();
        let second = discovery.register_service().unwrap();

        let provider = coordinator.service_provider("svc");
        assert_eq!(provider.path(), "/registry/svc");
        let mut expected = vec![first.id, second.id];
        expected.sort();
        let picks: Vec<String> = (0..2)
            .map(|_| provider.get_instance().unwrap().instance.id)
            .collect();
        assert_eq!(picks, expected);

        let names = coordinator.service_names().for_path("/registry").unwrap();
        assert_eq!(names, vec!["svc".to_string()]);
    }

    #[test]
    fn rejoin_follows_configuration() {
        let mut mock = MockCoordinator::new(logger());
        mock.config.election.rejoin = true;
        let session = mock.session();
        let coordinator = mock.with_session(session.clone());
        let election = coordinator.election("/election", "alpha");
        election.start().unwrap();
        session.expire();
        session.connect();
        assert!(election.has_leadership());
        assert_eq!(mock.store.children("/election").len(), 1);
    }
}
