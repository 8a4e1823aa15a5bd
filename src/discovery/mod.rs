use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use failure::ResultExt;
use slog::debug;
use slog::info;
use slog::Logger;
use uuid::Uuid;

use super::backend::join_path;
use super::backend::normalise_path;
use super::backend::Backend;
use super::backend::ClientError;
use super::backend::NodeMode;
use super::backend::Transaction;
use super::config::EnumeratorConfig;
use super::enumerate::ServiceNames;
use super::metrics::DISCOVERY_REGISTER_FAIL;
use super::metrics::DISCOVERY_REGISTER_TOTAL;
use super::Error;
use super::ErrorKind;
use super::Result;

mod instance;

pub use self::instance::ServiceInstance;
pub use self::instance::ServiceInstanceBuilder;
pub use self::instance::ServiceType;
pub use self::instance::UriPart;
pub use self::instance::UriSpec;
pub use self::instance::DEFAULT_SCHEME;

/// Register and look up instances of services.
///
/// Instances are stored as ephemeral nodes at `<base_path>/<service name>/<instance id>`
/// with the JSON encoded `ServiceInstance` as the payload.
pub struct ServiceDiscovery {
    backend: Arc<dyn Backend>,
    base_path: String,
    instance: ServiceInstance,
    logger: Logger,
    names_timeout: Duration,
}

impl ServiceDiscovery {
    pub fn new(
        backend: Arc<dyn Backend>,
        base_path: &str,
        instance: ServiceInstance,
        logger: Logger,
    ) -> ServiceDiscovery {
        ServiceDiscovery {
            backend,
            base_path: normalise_path(base_path),
            instance,
            logger,
            names_timeout: Duration::from_millis(EnumeratorConfig::default().timeout),
        }
    }

    /// Limit how long `ServiceDiscovery::query_for_names` may take.
    pub fn with_names_timeout(mut self, timeout: Duration) -> ServiceDiscovery {
        self.names_timeout = timeout;
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Instance registered by `ServiceDiscovery::register_service`.
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    fn service_path(&self, name: &str) -> String {
        join_path(&self.base_path, name)
    }
}

impl ServiceDiscovery {
    /// Register a new copy of the instance and return the stored record.
    ///
    /// Every call creates a new registration with a fresh id.
    pub fn register_service(&self) -> Result<ServiceInstance> {
        DISCOVERY_REGISTER_TOTAL.inc();
        self.register().map_err(|error| {
            DISCOVERY_REGISTER_FAIL.inc();
            error
        })
    }

    fn register(&self) -> Result<ServiceInstance> {
        let service_path = self.service_path(&self.instance.name);
        self.backend
            .mkdir_path(&service_path)
            .map_err(|error| Error::backend("service path creation", error))?;

        let mut record = self.instance.clone();
        record.id = Uuid::new_v4().to_string();
        record.registration_time_utc = Utc::now().timestamp_millis();
        record.service_type = ServiceType::Dynamic;
        let data = serde_json::to_vec(&record).context(ErrorKind::Encode("service instance"))?;

        let path = join_path(&service_path, &record.id);
        let transaction = Transaction::new().create(path.clone(), data, NodeMode::Ephemeral);
        self.backend
            .commit(transaction)
            .map_err(|error| Error::backend("service registration", error))?;
        info!(
            self.logger, "Registered service instance";
            "service" => &record.name, "path" => &path
        );
        Ok(record)
    }

    /// Remove a registration of this service by instance id.
    pub fn unregister_service(&self, id: &str) -> Result<()> {
        let path = join_path(&self.service_path(&self.instance.name), id);
        let transaction = Transaction::new().remove(path.clone(), None);
        match self.backend.commit(transaction) {
            Ok(_) => (),
            Err(ClientError::NoNode) => {
                let message = format!("service instance '{}' is not registered", path);
                return Err(ErrorKind::NotFound(message).into());
            }
            Err(error) => return Err(Error::backend("service unregistration", error)),
        };
        info!(
            self.logger, "Unregistered service instance";
            "service" => &self.instance.name, "path" => &path
        );
        Ok(())
    }

    /// Sorted ids of the registered instances of a service.
    pub fn query_for_instances(&self, name: &str) -> Result<Vec<String>> {
        let path = self.service_path(name);
        let mut ids = match self.backend.children(&path) {
            Ok((ids, _)) => ids,
            Err(ClientError::NoNode) => {
                let message = format!("no service registered at '{}'", path);
                return Err(ErrorKind::NotFound(message).into());
            }
            Err(error) => return Err(Error::backend("service instances lookup", error)),
        };
        ids.sort();
        debug!(
            self.logger, "Found service instances";
            "service" => name, "instances" => ids.len()
        );
        Ok(ids)
    }

    /// Fetch a registered instance record.
    pub fn query_for_instance(&self, name: &str, id: &str) -> Result<ServiceInstance> {
        let path = join_path(&self.service_path(name), id);
        let data = match self.backend.data(&path) {
            Ok(data) => data,
            Err(ClientError::NoNode) => {
                let message = format!("service instance '{}' is not registered", path);
                return Err(ErrorKind::NotFound(message).into());
            }
            Err(error) => return Err(Error::backend("service instance lookup", error)),
        };
        let instance = serde_json::from_slice(&data).context(ErrorKind::Decode("service instance"))?;
        Ok(instance)
    }

    /// Names of all services registered under the base path.
    pub fn query_for_names(&self) -> Result<Vec<String>> {
        let names = ServiceNames::new(
            Arc::clone(&self.backend),
            self.names_timeout,
            self.logger.clone(),
        );
        names.for_path(&self.base_path)
    }
}
