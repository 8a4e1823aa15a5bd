use std::sync::Arc;
use std::sync::Mutex;

use crossbeam_channel::Sender;
use humthreads::Thread;
use slog::debug;
use slog::error;
use slog::Logger;
use zookeeper::Acl;
use zookeeper::CreateMode;
use zookeeper::Stat;
use zookeeper::ZkError;
use zookeeper::ZooKeeperExt;

use super::super::config::ZookeeperConfig;
use super::super::error::failure_info;
use super::super::Result;
use super::Backend;
use super::ClientError;
use super::ClientResult;
use super::ConnectionListener;
use super::ListenerId;
use super::NodeMode;
use super::NodeStat;
use super::Op;
use super::OpResult;
use super::Transaction;
use super::Watcher;

mod client;
mod dispatcher;
mod metrics;

pub use self::metrics::register_metrics;

use self::client::Client;
use self::client::Signal;
use self::dispatcher::Listeners;
use self::metrics::ZOO_OP_DURATION;
use self::metrics::ZOO_OP_ERRORS_COUNT;
use self::metrics::ZOO_TIMEOUTS_COUNT;

/// Zookeeper-backed coordination store.
pub struct Zookeeper {
    client: Arc<Client>,
    dispatcher: Mutex<Option<Thread<()>>>,
    listeners: Arc<Listeners>,
    logger: Logger,
    signals: Sender<Signal>,
}

impl Zookeeper {
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Result<Zookeeper> {
        let (signals, receiver) = crossbeam_channel::unbounded();
        let client = Arc::new(Client::new(config.clone(), signals.clone(), logger.clone())?);
        let listeners = Arc::new(Listeners::default());
        let dispatcher = self::dispatcher::spawn(
            Arc::clone(&client),
            &config,
            Arc::clone(&listeners),
            receiver,
            logger.clone(),
        )?;
        Ok(Zookeeper {
            client,
            dispatcher: Mutex::new(Some(dispatcher)),
            listeners,
            logger,
            signals,
        })
    }
}

impl Backend for Zookeeper {
    fn children(&self, path: &str) -> ClientResult<(Vec<String>, NodeStat)> {
        let keeper = self.client.get()?;
        let children = timed("get_children", || keeper.get_children(path, false))?;
        let stat = self.stat(path)?;
        Ok((children, stat))
    }

    fn children_w(&self, path: &str, watcher: Watcher) -> ClientResult<(Vec<String>, NodeStat)> {
        let keeper = self.client.get()?;
        // Zookeeper watchers are `Fn` but ours fire at most once.
        let watcher = Mutex::new(Some(watcher));
        let children = timed("get_children", || {
            keeper.get_children_w(path, move |_| {
                let watcher = watcher
                    .lock()
                    .expect("zookeeper watcher lock poisoned")
                    .take();
                if let Some(watcher) = watcher {
                    watcher();
                }
            })
        })?;
        let stat = self.stat(path)?;
        Ok((children, stat))
    }

    fn close(&self) {
        if self.client.is_closed() {
            return;
        }
        debug!(self.logger, "Closing zookeeper backend");
        let _ = self.signals.send(Signal::Shutdown);
        self.client.close();
    }

    /// Zookeeper multi-ops are not available so operations are applied in order.
    ///
    /// The first failing operation aborts the commit but earlier operations are not undone.
    fn commit(&self, transaction: Transaction) -> ClientResult<Vec<OpResult>> {
        let mut results = Vec::new();
        for op in transaction.into_ops() {
            let result = match op {
                Op::Check { path, version } => {
                    let stat = self.stat(&path)?;
                    match version {
                        Some(version) if version != stat.version => {
                            return Err(ClientError::BadVersion)
                        }
                        _ => OpResult::Checked,
                    }
                }
                Op::Create { path, data, mode } => {
                    OpResult::Created(self.create(&path, data, mode)?)
                }
                Op::Remove { path, version } => {
                    self.remove(&path, version)?;
                    OpResult::Removed
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    fn create(&self, path: &str, data: Vec<u8>, mode: NodeMode) -> ClientResult<String> {
        let keeper = self.client.get()?;
        let mode = create_mode(mode);
        timed("create", || {
            keeper.create(path, data, Acl::open_unsafe().clone(), mode)
        })
    }

    fn data(&self, path: &str) -> ClientResult<Vec<u8>> {
        let keeper = self.client.get()?;
        let (data, _) = timed("get_data", || keeper.get_data(path, false))?;
        Ok(data)
    }

    fn exists(&self, path: &str) -> ClientResult<Option<NodeStat>> {
        let keeper = self.client.get()?;
        let stat = timed("exists", || keeper.exists(path, false))?;
        Ok(stat.map(|stat| node_stat(&stat)))
    }

    fn mkdir_path(&self, path: &str) -> ClientResult<()> {
        let keeper = self.client.get()?;
        timed("ensure_path", || keeper.ensure_path(path))
    }

    fn remove(&self, path: &str, version: Option<i32>) -> ClientResult<()> {
        let keeper = self.client.get()?;
        timed("delete", || keeper.delete(path, version))
    }

    fn subscribe(&self, listener: ConnectionListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

impl Zookeeper {
    fn stat(&self, path: &str) -> ClientResult<NodeStat> {
        match self.exists(path)? {
            Some(stat) => Ok(stat),
            None => Err(ClientError::NoNode),
        }
    }
}

impl Drop for Zookeeper {
    fn drop(&mut self) {
        self.close();
        let handle = self
            .dispatcher
            .lock()
            .expect("zookeeper dispatcher lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.join() {
                error!(
                    self.logger, "Zookeeper events dispatcher paniced";
                    failure_info(&error)
                );
            }
        }
    }
}

/// Run a zookeeper operation while tracking its duration and errors.
fn timed<F, T>(operation: &'static str, op: F) -> ClientResult<T>
where
    F: FnOnce() -> ::std::result::Result<T, ZkError>,
{
    let timer = ZOO_OP_DURATION.with_label_values(&[operation]).start_timer();
    let result = op();
    timer.observe_duration();
    result.map_err(|error| {
        match error {
            ZkError::NoNode | ZkError::NodeExists => (),
            ZkError::OperationTimeout => {
                ZOO_TIMEOUTS_COUNT.inc();
                ZOO_OP_ERRORS_COUNT.with_label_values(&[operation]).inc();
            }
            _ => ZOO_OP_ERRORS_COUNT.with_label_values(&[operation]).inc(),
        };
        client_error(error)
    })
}

fn client_error(error: ZkError) -> ClientError {
    match error {
        ZkError::BadVersion => ClientError::BadVersion,
        ZkError::ConnectionLoss => ClientError::ConnectionLoss,
        ZkError::NodeExists => ClientError::NodeExists,
        ZkError::NoNode => ClientError::NoNode,
        ZkError::NotEmpty => ClientError::NotEmpty,
        ZkError::OperationTimeout => ClientError::OperationTimeout,
        ZkError::SessionExpired => ClientError::SessionExpired,
        error => ClientError::Other(format!("{:?}", error)),
    }
}

fn create_mode(mode: NodeMode) -> CreateMode {
    match mode {
        NodeMode::Ephemeral => CreateMode::Ephemeral,
        NodeMode::EphemeralSequential => CreateMode::EphemeralSequential,
        NodeMode::Persistent => CreateMode::Persistent,
    }
}

fn node_stat(stat: &Stat) -> NodeStat {
    NodeStat {
        data_length: stat.data_length.max(0) as usize,
        num_children: stat.num_children.max(0) as usize,
        version: stat.version,
    }
}
