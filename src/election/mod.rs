use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;

use super::backend::basename;
use super::backend::join_path;
use super::backend::normalise_path;
use super::backend::Backend;
use super::backend::ClientError;
use super::backend::ConnectionEvent;
use super::backend::ListenerId;
use super::backend::NodeMode;
use super::backend::OpResult;
use super::backend::Transaction;
use super::error::failure_info;
use super::metrics::ELECTION_PROMOTED;
use super::metrics::ELECTION_RUN_FAIL;
use super::metrics::ELECTION_RUN_TOTAL;
use super::metrics::ELECTION_TERMINATED;
use super::metrics::ELECTION_WITHDRAW_FAIL;
use super::metrics::ELECTION_WITHDRAW_TOTAL;
use super::sequence::SEQUENCE_SEPARATOR;
use super::Error;
use super::ErrorKind;
use super::Result;

mod state;

use self::state::ElectionState;
use self::state::Evaluation;

/// Payload stored in every candidate node.
const CANDIDATE_PAYLOAD: &[u8] = b"{}";

/// Default number of extra attempts made by a candidates refresh after a transient error.
pub const DEFAULT_REFRESH_RETRIES: u32 = 3;

/// Default pause between candidates refresh attempts.
pub const DEFAULT_REFRESH_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Notifications emitted by an `Election` as the candidates change.
#[derive(Debug)]
pub enum ElectionEvent {
    /// This participant now holds the lowest sequence number.
    GroupLeader,

    /// The candidate immediately ahead of this participant changed.
    LeaderChanged(Option<String>),

    /// The candidate immediately behind this participant changed.
    FollowerChanged(Option<String>),

    /// The sorted list of all candidates changed.
    TopologyChanged(Vec<String>),

    /// The election failed and, unless the error is a disconnection, was withdrawn.
    Error(Error),
}

/// Status of an `Election` instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ElectionStatus {
    /// The participant has not run for election yet.
    Unstarted,

    /// The candidate node is being created.
    Claiming,

    /// The candidate node exists but the candidates were not evaluated yet.
    Active,

    /// This participant is the group leader.
    Leader,

    /// This participant follows another candidate.
    Follower,

    /// The connection to the coordinator was lost while running.
    Disconnected,

    /// The participant left the election, voluntarily or because of an error.
    Withdrawn,
}

impl Default for ElectionStatus {
    fn default() -> ElectionStatus {
        ElectionStatus::Unstarted
    }
}

impl ElectionStatus {
    /// Check if the election is a candidate (holding a node) or not.
    pub fn is_candidate(&self) -> bool {
        matches!(
            self,
            ElectionStatus::Active | ElectionStatus::Leader | ElectionStatus::Follower
        )
    }
}

/// Options to customise an `Election`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ElectionOpts {
    identity: String,
    path: String,
    rejoin: bool,
    retries: u32,
    retry_interval: Duration,
}

impl ElectionOpts {
    pub fn new<P, I>(path: P, identity: I) -> ElectionOpts
    where
        P: Into<String>,
        I: Into<String>,
    {
        ElectionOpts {
            identity: identity.into(),
            path: normalise_path(&path.into()),
            rejoin: false,
            retries: DEFAULT_REFRESH_RETRIES,
            retry_interval: DEFAULT_REFRESH_RETRY_INTERVAL,
        }
    }

    /// Automatically run for election again once the coordinator connection is restored.
    pub fn rejoin(mut self, rejoin: bool) -> ElectionOpts {
        self.rejoin = rejoin;
        self
    }

    /// Extra attempts made to refresh the candidates after a transient error.
    ///
    /// Once these are used up the watcher is re-armed when the connection is restored.
    pub fn retries(mut self, retries: u32) -> ElectionOpts {
        self.retries = retries;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> ElectionOpts {
        self.retry_interval = interval;
        self
    }
}

/// Immutable data shared by the election and its callbacks.
struct ElectionContext {
    backend: Arc<dyn Backend>,
    events: Sender<ElectionEvent>,
    logger: Logger,
    path: String,
    prefix: String,
    receiver: Receiver<ElectionEvent>,
    rejoin: bool,
    retries: u32,
    retry_interval: Duration,

    /// Cuts refresh retry pauses short when the epoch changes.
    wake: Sender<()>,
    woken: Receiver<()>,
}

/// What to do once the coordinator connection is back.
enum Reconnect {
    Refresh(u64),
    Rejoin,
}

/// Reason a candidates refresh was requested.
#[derive(Clone, Copy, Debug)]
enum Trigger {
    /// Explicit `Election::start` calls: only arm a watcher if none is armed.
    Start,

    /// The watcher armed with the given token fired.
    Watch(u64),

    /// The coordinator connection was restored: watchers may have been lost.
    Reconnect,
}

/// Atomically manage the current election state.
#[derive(Clone)]
struct AtomicState {
    context: Arc<ElectionContext>,
    state: Arc<Mutex<ElectionState>>,
}

impl AtomicState {
    fn lock(&self) -> ::std::sync::MutexGuard<ElectionState> {
        self.state.lock().expect("ElectionState lock poisoned")
    }

    fn emit(&self, event: ElectionEvent) {
        // The context holds a receiver so the channel is never disconnected.
        let _ = self.context.events.send(event);
    }

    /// Path to the given candidate node.
    fn node_path(&self, node: &str) -> String {
        join_path(&self.context.path, node)
    }

    /// Interrupt any refresh waiting to retry.
    fn interrupt(&self) {
        let _ = self.context.wake.try_send(());
    }

    /// Wait before the next refresh attempt, returning early if the epoch changes.
    fn pause(&self, epoch: u64) {
        while self.context.woken.try_recv().is_ok() {}
        if !self.lock().accepts(epoch) {
            return;
        }
        let _ = self.context.woken.recv_timeout(self.context.retry_interval);
    }
}

impl AtomicState {
    /// Claim a candidate node and evaluate the election.
    fn start(&self) -> Result<()> {
        let context = &self.context;
        let previous = {
            let mut state = self.lock();
            if state.node.is_some() {
                Err(state.epoch)
            } else if state.status == ElectionStatus::Claiming {
                return Err(ErrorKind::ElectionRunning(context.path.clone()).into());
            } else {
                let previous = state.status;
                state.status = ElectionStatus::Claiming;
                state.withdrawn = false;
                Ok(previous)
            }
        };
        let previous = match previous {
            Ok(previous) => previous,
            Err(epoch) => {
                debug!(
                    context.logger, "Election already running, refreshing watcher";
                    "election" => &context.path
                );
                self.refresh(epoch, Trigger::Start);
                return Err(ErrorKind::ElectionRunning(context.path.clone()).into());
            }
        };

        let created = self.claim().map_err(|error| {
            let mut state = self.lock();
            if state.status == ElectionStatus::Claiming {
                // Rejoining is still pending until the connection is back.
                let pending = previous == ElectionStatus::Disconnected && error.is_transient();
                state.status = if pending {
                    ElectionStatus::Disconnected
                } else {
                    ElectionStatus::Unstarted
                };
            }
            error
        })?;
        let node = basename(&created).to_string();
        let epoch = {
            let mut state = self.lock();
            if state.status != ElectionStatus::Claiming {
                None
            } else {
                state.epoch += 1;
                state.armed = false;
                state.node = Some(node.clone());
                state.status = ElectionStatus::Active;
                Some(state.epoch)
            }
        };
        let epoch = match epoch {
            Some(epoch) => epoch,
            None => {
                // Withdrawn while the node was being created.
                debug!(
                    context.logger, "Election withdrawn while claiming, releasing node";
                    "election" => &context.path, "node" => &node
                );
                self.release(&node)?;
                return Ok(());
            }
        };
        info!(
            context.logger, "Joined election";
            "election" => &context.path, "node" => &node
        );
        self.refresh(epoch, Trigger::Start);
        Ok(())
    }

    /// Create the election path and the ephemeral sequential candidate node.
    fn claim(&self) -> Result<String> {
        let context = &self.context;
        let stale = self.lock().stale_node.take();
        if let Some(stale) = stale {
            debug!(
                context.logger, "Removing candidate node from previous session";
                "election" => &context.path, "node" => &stale
            );
            if let Err(error) = self.release(&stale) {
                warn!(
                    context.logger, "Failed to remove stale candidate node";
                    "election" => &context.path, "node" => &stale, failure_info(&error)
                );
                self.lock().stale_node = Some(stale);
                return Err(error);
            }
        }

        context
            .backend
            .mkdir_path(&context.path)
            .map_err(|error| Error::backend("election path creation", error))?;
        let candidate = join_path(&context.path, &context.prefix);
        let transaction = Transaction::new().create(
            candidate,
            CANDIDATE_PAYLOAD.to_vec(),
            NodeMode::EphemeralSequential,
        );
        let results = context
            .backend
            .commit(transaction)
            .map_err(|error| Error::backend("election registration", error))?;
        match results.into_iter().next() {
            Some(OpResult::Created(path)) => Ok(path),
            _ => Err(ErrorKind::Backend("election registration").into()),
        }
    }

    /// Remove a candidate node if it still exists.
    fn release(&self, node: &str) -> Result<()> {
        let path = self.node_path(node);
        let transaction = Transaction::new().check(path.clone(), None).remove(path, None);
        match self.context.backend.commit(transaction) {
            Ok(_) => Ok(()),
            Err(ClientError::NoNode) => Ok(()),
            Err(error) => Err(Error::backend("election withdrawal", error)),
        }
    }

    /// Fetch the candidates, re-arm the watcher and update the state.
    ///
    /// Transient errors are retried a bounded number of times.
    /// Every watcher is armed with a new token and only the watcher holding the
    /// current token may trigger a refresh, so forced re-arms never stack refreshes.
    fn refresh(&self, epoch: u64, trigger: Trigger) {
        let context = &self.context;
        let mut force = !matches!(trigger, Trigger::Start);
        let mut attempt = 0;
        loop {
            let token = {
                let mut state = self.lock();
                if !state.accepts(epoch) {
                    debug!(
                        context.logger, "Ignoring stale election refresh";
                        "election" => &context.path, "epoch" => epoch
                    );
                    return;
                }
                if let Trigger::Watch(token) = trigger {
                    if attempt == 0 && token != state.watch && state.armed {
                        debug!(
                            context.logger, "Ignoring superseded election watcher";
                            "election" => &context.path, "token" => token
                        );
                        return;
                    }
                }
                if force || !state.armed {
                    state.watch += 1;
                    state.armed = true;
                    Some(state.watch)
                } else {
                    None
                }
            };
            force = false;

            let result = match token {
                Some(token) => {
                    let closure_state = self.clone();
                    context.backend.children_w(
                        &context.path,
                        Box::new(move || closure_state.refresh(epoch, Trigger::Watch(token))),
                    )
                }
                None => context.backend.children(&context.path),
            };
            let error = match result {
                Ok((children, _)) => {
                    self.apply(epoch, children);
                    return;
                }
                Err(error) => error,
            };
            if let Some(token) = token {
                let mut state = self.lock();
                if state.epoch == epoch && state.watch == token {
                    state.armed = false;
                }
            }
            if !error.is_transient() {
                let error = Error::backend("election refresh", error);
                self.terminate(epoch, error);
                return;
            }
            if attempt >= context.retries {
                // Connectivity changes are reported by the connection listener.
                warn!(
                    context.logger, "Unable to refresh election, waiting for reconnection";
                    "election" => &context.path, "attempts" => attempt + 1,
                    failure_info(&error)
                );
                return;
            }
            attempt += 1;
            debug!(
                context.logger, "Retrying election refresh";
                "election" => &context.path, "attempt" => attempt, failure_info(&error)
            );
            self.pause(epoch);
        }
    }

    /// Evaluate a candidates listing and emit the resulting events.
    fn apply(&self, epoch: u64, children: Vec<String>) {
        let context = &self.context;
        let mut state = self.lock();
        if !state.accepts(epoch) {
            return;
        }
        debug!(
            context.logger, "Evaluating election candidates";
            "election" => &context.path, "candidates" => children.len()
        );
        let evaluation = state.evaluate(children);
        match evaluation {
            Evaluation::Stale => (),
            Evaluation::Changed(events) => {
                for event in events {
                    if let ElectionEvent::GroupLeader = event {
                        ELECTION_PROMOTED.inc();
                        info!(
                            context.logger, "Became group leader";
                            "election" => &context.path, "node" => ?state.node
                        );
                    }
                    self.emit(event);
                }
            }
            Evaluation::Empty => {
                drop(state);
                let error = ErrorKind::ElectionEmpty(context.path.clone()).into();
                self.terminate(epoch, error);
            }
            Evaluation::NodeMissing => {
                drop(state);
                let error = ErrorKind::ElectionNodeMissing(context.path.clone()).into();
                self.terminate(epoch, error);
            }
        };
    }

    /// Withdraw from the election because of an error and report it.
    fn terminate(&self, epoch: u64, error: Error) {
        let context = &self.context;
        let node = {
            let mut state = self.lock();
            if state.epoch != epoch || state.withdrawn {
                return;
            }
            state.withdraw()
        };
        self.interrupt();
        ELECTION_TERMINATED.inc();
        error!(
            context.logger, "Election terminated";
            "election" => &context.path, failure_info(&error)
        );
        if let Some(node) = node {
            if let Err(error) = self.release(&node) {
                error!(
                    context.logger, "Failed to remove candidate node for terminated election";
                    "election" => &context.path, "node" => &node, failure_info(&error)
                );
                self.lock().stale_node = Some(node);
            }
        }
        self.emit(ElectionEvent::Error(error));
    }

    /// Leave the election, removing the candidate node.
    fn withdraw(&self) -> Result<()> {
        let context = &self.context;
        let (node, stale) = {
            let mut state = self.lock();
            let node = state.withdraw();
            (node, state.stale_node.take())
        };
        self.interrupt();
        if let Some(stale) = stale {
            self.release(&stale).map_err(|error| {
                self.lock().stale_node = Some(stale.clone());
                error
            })?;
        }
        if let Some(node) = node {
            info!(
                context.logger, "Withdrawing from election";
                "election" => &context.path, "node" => &node
            );
            self.release(&node).map_err(|error| {
                self.lock().stale_node = Some(node.clone());
                error
            })?;
        }
        Ok(())
    }

    /// Handle coordinator connectivity transitions.
    fn connection_changed(&self, event: ConnectionEvent) {
        let context = &self.context;
        match event {
            ConnectionEvent::Disconnected => {
                {
                    let mut state = self.lock();
                    if !state.status.is_candidate() {
                        return;
                    }
                    state.reset_derived();
                    state.status = ElectionStatus::Disconnected;
                    if context.rejoin {
                        state.stale_node = state.node.take();
                        state.armed = false;
                        state.epoch += 1;
                    }
                }
                self.interrupt();
                warn!(
                    context.logger, "Election disconnected from coordinator";
                    "election" => &context.path, "rejoin" => context.rejoin
                );
                let error = ErrorKind::ElectionDisconnected(context.path.clone()).into();
                self.emit(ElectionEvent::Error(error));
            }
            ConnectionEvent::Connected => {
                let action = {
                    let mut state = self.lock();
                    if state.status != ElectionStatus::Disconnected {
                        return;
                    }
                    if context.rejoin {
                        Reconnect::Rejoin
                    } else {
                        state.status = ElectionStatus::Active;
                        Reconnect::Refresh(state.epoch)
                    }
                };
                match action {
                    Reconnect::Refresh(epoch) => self.refresh(epoch, Trigger::Reconnect),
                    Reconnect::Rejoin => {
                        info!(
                            context.logger, "Rejoining election after reconnection";
                            "election" => &context.path
                        );
                        ELECTION_RUN_TOTAL.inc();
                        if let Err(error) = self.start() {
                            ELECTION_RUN_FAIL.inc();
                            error!(
                                context.logger, "Failed to rejoin election";
                                "election" => &context.path, failure_info(&error)
                            );
                            self.emit(ElectionEvent::Error(error));
                        }
                    }
                };
            }
        };
    }
}

/// Participant in a leader election.
///
/// Candidates create an ephemeral sequential node under the election path and
/// the candidate with the lowest sequence number is the group leader.
/// Every candidate watches the full list of candidates (not just its leader)
/// so that topology changes can be reported as well.
///
/// Changes are reported as `ElectionEvent`s on the channel returned by `Election::events`.
/// There is no fencing: a participant that lost leadership is only notified.
pub struct Election {
    listener: ListenerId,
    state: AtomicState,
}

impl Election {
    pub fn new(backend: Arc<dyn Backend>, opts: ElectionOpts, logger: Logger) -> Election {
        let (events, receiver) = unbounded();
        let (wake, woken) = bounded(1);
        let prefix = format!("{}{}", opts.identity, SEQUENCE_SEPARATOR);
        let context = ElectionContext {
            backend: Arc::clone(&backend),
            events,
            logger,
            path: opts.path,
            prefix,
            receiver,
            rejoin: opts.rejoin,
            retries: opts.retries,
            retry_interval: opts.retry_interval,
            wake,
            woken,
        };
        let state = AtomicState {
            context: Arc::new(context),
            state: Arc::new(Mutex::new(ElectionState::default())),
        };
        let listener_state = state.clone();
        let listener = backend.subscribe(Arc::new(move |event| {
            listener_state.connection_changed(event);
        }));
        Election { listener, state }
    }
}

impl Election {
    /// Run for election.
    ///
    /// Returns `ErrorKind::ElectionRunning` if this participant already holds a node,
    /// after re-establishing the candidates watcher.
    pub fn start(&self) -> Result<()> {
        ELECTION_RUN_TOTAL.inc();
        self.state.start().map_err(|error| {
            if !matches!(error.kind(), ErrorKind::ElectionRunning(_)) {
                ELECTION_RUN_FAIL.inc();
            }
            error
        })
    }

    /// Leave the election (if running) and stop reacting to candidate changes.
    pub fn withdraw(&self) -> Result<()> {
        ELECTION_WITHDRAW_TOTAL.inc();
        self.state.withdraw().map_err(|error| {
            ELECTION_WITHDRAW_FAIL.inc();
            error
        })
    }

    /// Remove every candidate node and the election path itself.
    ///
    /// This affects all participants, not just this one.
    pub fn destroy(&self) -> Result<()> {
        self.withdraw()?;
        let context = &self.state.context;
        info!(context.logger, "Destroying election"; "election" => &context.path);
        let children = match context.backend.children(&context.path) {
            Ok((children, _)) => children,
            Err(ClientError::NoNode) => return Ok(()),
            Err(error) => return Err(Error::backend("election candidates lookup", error)),
        };
        for child in children {
            let path = self.state.node_path(&child);
            match context.backend.remove(&path, None) {
                Ok(()) | Err(ClientError::NoNode) => (),
                Err(error) => return Err(Error::backend("election candidate removal", error)),
            };
        }
        match context.backend.remove(&context.path, None) {
            Ok(()) | Err(ClientError::NoNode) => Ok(()),
            Err(error) => Err(Error::backend("election removal", error)),
        }
    }

    /// Notifications about changes to this election.
    ///
    /// All receivers share the same queue: each event is delivered to one of them.
    pub fn events(&self) -> Receiver<ElectionEvent> {
        self.state.context.receiver.clone()
    }

    /// Check if this participant is the group leader.
    pub fn has_leadership(&self) -> bool {
        self.state.lock().is_group_leader
    }

    /// Name of the candidate immediately ahead of this participant.
    pub fn leader(&self) -> Option<String> {
        self.state.lock().leader.clone()
    }

    /// Name of the candidate immediately behind this participant.
    pub fn follower(&self) -> Option<String> {
        self.state.lock().follower.clone()
    }

    /// Name of the candidate node owned by this participant.
    pub fn node(&self) -> Option<String> {
        self.state.lock().node.clone()
    }

    /// Path of the election.
    pub fn path(&self) -> &str {
        &self.state.context.path
    }

    pub fn status(&self) -> ElectionStatus {
        self.state.lock().status
    }

    /// Sorted candidates as of the last evaluation.
    pub fn topology(&self) -> Vec<String> {
        self.state.lock().topology.clone()
    }
}

impl Drop for Election {
    fn drop(&mut self) {
        let context = &self.state.context;
        context.backend.unsubscribe(self.listener);
        if let Err(error) = self.state.withdraw() {
            error!(
                context.logger, "Failed to automatically withdraw from election";
                "election" => &context.path, failure_info(&error)
            );
        }
    }
}
