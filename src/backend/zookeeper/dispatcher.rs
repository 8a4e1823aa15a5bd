use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use failure::ResultExt;
use humthreads::Builder;
use humthreads::Thread;
use humthreads::ThreadScope;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use zookeeper::ZkState;

use super::super::super::config::ZookeeperConfig;
use super::super::super::error::failure_info;
use super::super::super::ErrorKind;
use super::super::super::Result;
use super::super::ConnectionEvent;
use super::super::ConnectionListener;
use super::super::ListenerId;
use super::client::Client;
use super::client::Signal;
use super::metrics::ZOO_RECONNECT_FAIL;

/// Registered connection listeners.
#[derive(Default)]
pub struct Listeners {
    next: AtomicU64,
    registered: Mutex<Vec<(u64, ConnectionListener)>>,
}

impl Listeners {
    pub fn add(&self, listener: ConnectionListener) -> ListenerId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.registered
            .lock()
            .expect("zookeeper listeners lock poisoned")
            .push((id, listener));
        ListenerId(id)
    }

    pub fn remove(&self, id: ListenerId) {
        self.registered
            .lock()
            .expect("zookeeper listeners lock poisoned")
            .retain(|(listener, _)| *listener != id.0);
    }

    /// Invoke all listeners with the event, without holding the registry lock.
    fn notify(&self, event: ConnectionEvent) {
        let listeners: Vec<ConnectionListener> = self
            .registered
            .lock()
            .expect("zookeeper listeners lock poisoned")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Start the background thread that turns session states into `ConnectionEvent`s.
///
/// The thread also replaces sessions that the ensemble closes.
pub fn spawn(
    client: Arc<Client>,
    config: &ZookeeperConfig,
    listeners: Arc<Listeners>,
    receiver: Receiver<Signal>,
    logger: Logger,
) -> Result<Thread<()>> {
    let attempts = config.reconnect_attempts;
    let interval = Duration::from_millis(config.reconnect_interval);
    let thread = Builder::new("zl:zk:dispatch")
        .full_name("zoologist:zookeeper:dispatcher")
        .spawn(move |scope| {
            scope.activity("waiting for zookeeper session events");
            let mut dispatcher = Dispatcher {
                attempts,
                client,
                connected: true,
                interval,
                listeners,
                logger,
                receiver,
                scope,
            };
            dispatcher.run();
        })
        .with_context(|_| ErrorKind::SpawnThread("zookeeper dispatcher"))?;
    Ok(thread)
}

struct Dispatcher {
    attempts: u32,
    client: Arc<Client>,
    connected: bool,
    interval: Duration,
    listeners: Arc<Listeners>,
    logger: Logger,
    receiver: Receiver<Signal>,
    scope: ThreadScope,
}

impl Dispatcher {
    fn run(&mut self) {
        while let Ok(signal) = self.receiver.recv() {
            let keep_running = match signal {
                Signal::Shutdown => false,
                Signal::State { generation, state } => self.handle(generation, state),
            };
            if !keep_running || self.scope.should_shutdown() {
                break;
            }
        }
        debug!(self.logger, "Zookeeper events dispatcher stopped");
    }

    /// Process a session state change, returning `false` to stop the dispatcher.
    fn handle(&mut self, generation: u64, state: ZkState) -> bool {
        if generation != self.client.generation() {
            debug!(
                self.logger, "Ignoring event from old zookeeper session";
                "generation" => generation
            );
            return true;
        }
        match state {
            ZkState::Connected | ZkState::ConnectedReadOnly => self.transition(true),
            ZkState::Connecting | ZkState::NotConnected => self.transition(false),
            ZkState::Closed => {
                warn!(self.logger, "Zookeeper session closed");
                self.transition(false);
                if self.client.is_closed() {
                    return false;
                }
                return self.reconnect();
            }
            ZkState::AuthFailed => {
                error!(self.logger, "Zookeeper authentication error");
            }
            event => {
                debug!(self.logger, "Ignoring zookeeper event"; "event" => ?event);
            }
        };
        true
    }

    /// Replace the closed session, returning `false` if the dispatcher should stop.
    fn reconnect(&mut self) -> bool {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.scope
                .activity(format!("reconnecting to zookeeper (attempt {})", attempt));
            match self.client.reconnect() {
                Ok(()) => {
                    info!(self.logger, "Zookeeper session re-established"; "attempt" => attempt);
                    self.scope.activity("waiting for zookeeper session events");
                    self.transition(true);
                    return true;
                }
                Err(error) => {
                    ZOO_RECONNECT_FAIL.inc();
                    warn!(
                        self.logger, "Failed to re-establish zookeeper session";
                        "attempt" => attempt, failure_info(&error)
                    );
                }
            };
            if self.attempts != 0 && attempt >= self.attempts {
                error!(
                    self.logger, "Giving up reconnecting to zookeeper";
                    "attempts" => attempt
                );
                self.scope.activity("zookeeper session lost");
                return true;
            }
            match self.receiver.recv_timeout(self.interval) {
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Ok(Signal::State { .. }) | Err(RecvTimeoutError::Timeout) => (),
            };
        }
    }

    /// Notify listeners of connectivity changes.
    fn transition(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        let event = if connected {
            info!(self.logger, "Zookeeper connection established");
            ConnectionEvent::Connected
        } else {
            warn!(self.logger, "Zookeeper connection lost");
            ConnectionEvent::Disconnected
        };
        self.listeners.notify(event);
    }
}
