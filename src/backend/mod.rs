use std::sync::Arc;

use failure::Fail;

pub mod zookeeper;

/// Create modes supported by the coordination store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeMode {
    /// Removed automatically when the session that created it ends.
    Ephemeral,

    /// Ephemeral node with a store-assigned, monotonically increasing suffix.
    EphemeralSequential,

    /// Node that outlives the session that created it.
    Persistent,
}

impl NodeMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, NodeMode::Ephemeral | NodeMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, NodeMode::EphemeralSequential)
    }
}

/// Subset of node metadata the coordination primitives rely on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct NodeStat {
    pub data_length: usize,
    pub num_children: usize,
    pub version: i32,
}

/// Errors reported by the coordination store.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Fail)]
pub enum ClientError {
    #[fail(display = "node version does not match")]
    BadVersion,

    #[fail(display = "connection to the coordination store lost")]
    ConnectionLoss,

    #[fail(display = "node already exists")]
    NodeExists,

    #[fail(display = "no such node")]
    NoNode,

    #[fail(display = "node has children")]
    NotEmpty,

    #[fail(display = "operation timed out")]
    OperationTimeout,

    #[fail(display = "coordination store session expired")]
    SessionExpired,

    #[fail(display = "coordination store error: {}", _0)]
    Other(String),
}

impl ClientError {
    /// Connection loss and session expiry are reported separately as connectivity events.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::ConnectionLoss | ClientError::SessionExpired)
    }
}

/// Short form alias for store operations.
pub type ClientResult<T> = ::std::result::Result<T, ClientError>;

/// Process-level connectivity transitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// One-shot callback invoked on the next structural change of a watched path.
pub type Watcher = Box<dyn FnOnce() + Send>;

/// Callback invoked on every connectivity transition.
pub type ConnectionListener = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// Handle to remove a `ConnectionListener`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ListenerId(pub(crate) u64);

/// Single step of a `Transaction`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Op {
    /// Assert the node exists, at the given version if one is set.
    Check { path: String, version: Option<i32> },
    Create { path: String, data: Vec<u8>, mode: NodeMode },
    Remove { path: String, version: Option<i32> },
}

/// Outcome of a committed `Op`, in the same order as the transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OpResult {
    Checked,
    Created(String),
    Removed,
}

/// Operations committed together: either all of them apply or none do.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transaction {
    ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction::default()
    }

    pub fn check<S: Into<String>>(mut self, path: S, version: Option<i32>) -> Transaction {
        let path = path.into();
        self.ops.push(Op::Check { path, version });
        self
    }

    pub fn create<S: Into<String>>(mut self, path: S, data: Vec<u8>, mode: NodeMode) -> Transaction {
        let path = path.into();
        self.ops.push(Op::Create { path, data, mode });
        self
    }

    pub fn remove<S: Into<String>>(mut self, path: S, version: Option<i32>) -> Transaction {
        let path = path.into();
        self.ops.push(Op::Remove { path, version });
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// Coordination store interface consumed by elections, discovery and providers.
///
/// Implementations must deliver watchers at most once and serially.
/// Watchers and connection listeners are free to call back into the backend.
pub trait Backend: Send + Sync {
    /// List the children of a node along with the node metadata.
    fn children(&self, path: &str) -> ClientResult<(Vec<String>, NodeStat)>;

    /// Like `Backend::children` but also installs a one-shot watcher for the next change.
    fn children_w(&self, path: &str, watcher: Watcher) -> ClientResult<(Vec<String>, NodeStat)>;

    /// Stop using the store, ending the session.
    fn close(&self);

    /// Atomically apply all operations in a transaction.
    fn commit(&self, transaction: Transaction) -> ClientResult<Vec<OpResult>>;

    /// Create a node and return its final path (including any sequence suffix).
    fn create(&self, path: &str, data: Vec<u8>, mode: NodeMode) -> ClientResult<String>;

    /// Fetch the payload of a node.
    fn data(&self, path: &str) -> ClientResult<Vec<u8>>;

    /// Fetch node metadata, if the node exists.
    fn exists(&self, path: &str) -> ClientResult<Option<NodeStat>>;

    /// Create the path and any missing parent as persistent empty nodes.
    ///
    /// Existing nodes are not an error.
    fn mkdir_path(&self, path: &str) -> ClientResult<()>;

    /// Delete a node, optionally only at the given version.
    fn remove(&self, path: &str, version: Option<i32>) -> ClientResult<()>;

    /// Register a listener for connectivity transitions.
    fn subscribe(&self, listener: ConnectionListener) -> ListenerId;

    /// Remove a previously registered listener.
    fn unsubscribe(&self, id: ListenerId);
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    format!("{}/{}", parent, child)
}

/// Ensure a path is absolute, as the coordination store requires.
pub fn normalise_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Return the last component of a path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::basename;
    use super::join_path;
    use super::normalise_path;
    use super::NodeMode;
    use super::Op;
    use super::Transaction;

    #[test]
    fn paths() {
        assert_eq!(join_path("/services", "svc/v1"), "/services/svc/v1");
        assert_eq!(join_path("/services/", "/id"), "/services/id");
        assert_eq!(normalise_path("services"), "/services");
        assert_eq!(normalise_path("/services/"), "/services");
        assert_eq!(basename("/election/worker-0000000004"), "worker-0000000004");
        assert_eq!(basename("worker"), "worker");
    }

    #[test]
    fn transaction_keeps_op_order() {
        let txn = Transaction::new()
            .check("/a", None)
            .remove("/a", Some(2))
            .create("/b", Vec::new(), NodeMode::Ephemeral);
        let ops = txn.into_ops();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], Op::Check { path: "/a".into(), version: None });
        assert_eq!(ops[1], Op::Remove { path: "/a".into(), version: Some(2) });
    }
}
