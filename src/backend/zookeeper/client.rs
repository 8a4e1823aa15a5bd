use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Sender;
use failure::ResultExt;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use zookeeper::ZkState;
use zookeeper::ZooKeeper;

use super::super::super::config::ZookeeperConfig;
use super::super::super::ErrorKind;
use super::super::super::Result;
use super::super::ClientError;
use super::super::ClientResult;
use super::metrics::ZOO_CONNECTION_COUNT;

/// Messages for the connection events dispatcher.
pub enum Signal {
    /// Session state change, tagged with the generation of the session that reported it.
    State { generation: u64, state: ZkState },
    Shutdown,
}

/// Wrapper around a `ZooKeeper` instance to handle reconnection requests.
pub struct Client {
    closed: AtomicBool,
    config: ZookeeperConfig,
    current: Mutex<CurrentClient>,
    logger: Logger,
    signals: Sender<Signal>,
}

impl Client {
    pub fn new(config: ZookeeperConfig, signals: Sender<Signal>, logger: Logger) -> Result<Client> {
        let current = Client::connect(&config, 1, &signals, &logger)?;
        Ok(Client {
            closed: AtomicBool::new(false),
            config,
            current: Mutex::new(current),
            logger,
            signals,
        })
    }

    /// Return the current zookeeper client, if its session is still active.
    ///
    /// Replacing expired sessions is up to the dispatcher.
    pub fn get(&self) -> ClientResult<Arc<ZooKeeper>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ClientError::SessionExpired);
        }
        let current = self.current.lock().expect("zookeeper client lock was poisoned");
        if !current.active() {
            return Err(ClientError::SessionExpired);
        }
        Ok(current.client())
    }

    /// Generation of the current session, incremented on every reconnection.
    pub fn generation(&self) -> u64 {
        self.current
            .lock()
            .expect("zookeeper client lock was poisoned")
            .generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Close the current session and refuse further requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let current = self.current.lock().expect("zookeeper client lock was poisoned");
        current.active.store(false, Ordering::Relaxed);
        if let Err(error) = current.keeper.close() {
            debug!(self.logger, "Error while closing zookeeper session"; "error" => ?error);
        }
    }

    /// Establish a new session and make it the current one.
    pub fn reconnect(&self) -> Result<()> {
        let generation = self.generation() + 1;
        let fresh = Client::connect(&self.config, generation, &self.signals, &self.logger)?;
        let stale = {
            let mut current = self.current.lock().expect("zookeeper client lock was poisoned");
            ::std::mem::replace(&mut *current, fresh)
        };
        if let Err(error) = stale.keeper.close() {
            debug!(self.logger, "Error while closing expired zookeeper session"; "error" => ?error);
        }
        Ok(())
    }
}

impl Client {
    /// Return a new Zookeeper client that will clear itself when the session closes.
    fn connect(
        config: &ZookeeperConfig,
        generation: u64,
        signals: &Sender<Signal>,
        logger: &Logger,
    ) -> Result<CurrentClient> {
        info!(
            logger, "Initiating new zookeeper session";
            "ensemble" => &config.ensemble, "generation" => generation
        );
        let timeout = Duration::from_secs(config.timeout);
        let keeper = ZooKeeper::connect(&config.ensemble, timeout, |_| {})
            .context(ErrorKind::BackendConnect)?;
        // Wait for the session to be usable.
        keeper.exists("/", false).context(ErrorKind::BackendConnect)?;
        ZOO_CONNECTION_COUNT.inc();

        // Listen for connection events to close self and inform the dispatcher.
        let listener_logger = logger.clone();
        let active = Arc::new(AtomicBool::new(true));
        let notify_close = Arc::clone(&active);
        let signals = signals.clone();
        keeper.add_listener(move |state| {
            if let ZkState::Closed = state {
                notify_close.store(false, Ordering::Relaxed);
                debug!(listener_logger, "Zookeeper session marked as not active");
            }
            if signals.send(Signal::State { generation, state }).is_err() {
                warn!(listener_logger, "Zookeeper events dispatcher is gone");
            }
        });

        Ok(CurrentClient {
            active,
            generation,
            keeper: Arc::new(keeper),
        })
    }
}

/// Holder of the current zookeeper client with its `active` flag.
struct CurrentClient {
    active: Arc<AtomicBool>,
    generation: u64,
    keeper: Arc<ZooKeeper>,
}

impl CurrentClient {
    fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn client(&self) -> Arc<ZooKeeper> {
        Arc::clone(&self.keeper)
    }
}
