use std::sync::Arc;

use super::super::backend::Backend;
use super::super::backend::ClientError;
use super::super::backend::ClientResult;
use super::super::backend::ConnectionEvent;
use super::super::backend::ConnectionListener;
use super::super::backend::ListenerId;
use super::super::backend::NodeMode;
use super::super::backend::NodeStat;
use super::super::backend::OpResult;
use super::super::backend::Transaction;
use super::super::backend::Watcher;
use super::store::fire;
use super::store::MockStore;
use super::store::SessionState;

/// Client session attached to a `MockStore`.
///
/// Ephemeral nodes created through the session are owned by it and go away when
/// the session expires or is closed.
pub struct MockSession {
    id: u64,
    store: Arc<MockStore>,
}

impl MockSession {
    pub(super) fn new(store: Arc<MockStore>) -> MockSession {
        let id = {
            let mut inner = store.inner();
            inner.next_session += 1;
            let id = inner.next_session;
            inner.sessions.insert(id, SessionState::default());
            id
        };
        MockSession { id, store }
    }

    /// Restore connectivity after `MockSession::disconnect` or `MockSession::expire`.
    pub fn connect(&self) {
        self.transition(false, ConnectionEvent::Connected);
    }

    /// Simulate a temporary network partition: the session and its nodes survive.
    pub fn disconnect(&self) {
        self.transition(true, ConnectionEvent::Disconnected);
    }

    /// Simulate the store expiring the session.
    ///
    /// Ephemeral nodes and watchers of the session are dropped, the session stays
    /// disconnected until `MockSession::connect` is called.
    pub fn expire(&self) {
        let watchers = self.store.inner().expire(self.id);
        fire(watchers);
        self.transition(true, ConnectionEvent::Disconnected);
    }

    /// Fail the next operation performed through this session with the given error.
    pub fn fail_next(&self, error: ClientError) {
        let mut inner = self.store.inner();
        if let Some(state) = inner.sessions.get_mut(&self.id) {
            state.failures.push_back(error);
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store(&self) -> Arc<MockStore> {
        Arc::clone(&self.store)
    }

    /// Change the connected flag and notify listeners if it actually changed.
    fn transition(&self, disconnected: bool, event: ConnectionEvent) {
        let listeners: Vec<ConnectionListener> = {
            let mut inner = self.store.inner();
            let state = match inner.sessions.get_mut(&self.id) {
                Some(state) if !state.closed => state,
                _ => return,
            };
            if state.disconnected == disconnected {
                return;
            }
            state.disconnected = disconnected;
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in listeners {
            listener(event);
        }
    }
}

impl Backend for MockSession {
    fn children(&self, path: &str) -> ClientResult<(Vec<String>, NodeStat)> {
        let mut inner = self.store.inner();
        inner.precheck(self.id)?;
        inner.tree.children(path)
    }

    fn children_w(&self, path: &str, watcher: Watcher) -> ClientResult<(Vec<String>, NodeStat)> {
        let mut inner = self.store.inner();
        inner.precheck(self.id)?;
        let result = inner.tree.children(path)?;
        inner
            .watches
            .entry(path.to_string())
            .or_insert_with(Vec::new)
            .push((self.id, watcher));
        Ok(result)
    }

    fn close(&self) {
        let watchers = {
            let mut inner = self.store.inner();
            let watchers = inner.expire(self.id);
            if let Some(state) = inner.sessions.get_mut(&self.id) {
                state.closed = true;
                state.listeners.clear();
            }
            watchers
        };
        fire(watchers);
    }

    fn commit(&self, transaction: Transaction) -> ClientResult<Vec<OpResult>> {
        let watchers = {
            let mut inner = self.store.inner();
            inner.precheck(self.id)?;
            let mut tree = inner.tree.clone();
            let mut touched = Vec::new();
            let results = tree.apply(transaction.into_ops(), self.id, &mut touched)?;
            inner.tree = tree;
            (inner.triggered(touched), results)
        };
        let (watchers, results) = watchers;
        fire(watchers);
        Ok(results)
    }

    fn create(&self, path: &str, data: Vec<u8>, mode: NodeMode) -> ClientResult<String> {
        let (watchers, path) = {
            let mut inner = self.store.inner();
            inner.precheck(self.id)?;
            let mut touched = Vec::new();
            let path = inner.tree.create(path, data, mode, self.id, &mut touched)?;
            (inner.triggered(touched), path)
        };
        fire(watchers);
        Ok(path)
    }

    fn data(&self, path: &str) -> ClientResult<Vec<u8>> {
        let mut inner = self.store.inner();
        inner.precheck(self.id)?;
        inner.tree.data(path)
    }

    fn exists(&self, path: &str) -> ClientResult<Option<NodeStat>> {
        let mut inner = self.store.inner();
        inner.precheck(self.id)?;
        Ok(inner.tree.stat(path))
    }

    fn mkdir_path(&self, path: &str) -> ClientResult<()> {
        let watchers = {
            let mut inner = self.store.inner();
            inner.precheck(self.id)?;
            let mut touched = Vec::new();
            inner.tree.mkdir(path, &mut touched);
            inner.triggered(touched)
        };
        fire(watchers);
        Ok(())
    }

    fn remove(&self, path: &str, version: Option<i32>) -> ClientResult<()> {
        let watchers = {
            let mut inner = self.store.inner();
            inner.precheck(self.id)?;
            let mut touched = Vec::new();
            inner.tree.remove(path, version, &mut touched)?;
            inner.triggered(touched)
        };
        fire(watchers);
        Ok(())
    }

    fn subscribe(&self, listener: ConnectionListener) -> ListenerId {
        let mut inner = self.store.inner();
        inner.next_listener += 1;
        let id = inner.next_listener;
        if let Some(state) = inner.sessions.get_mut(&self.id) {
            state.listeners.push((id, listener));
        }
        ListenerId(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        let mut inner = self.store.inner();
        if let Some(state) = inner.sessions.get_mut(&self.id) {
            state.listeners.retain(|(listener, _)| *listener != id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::super::super::backend::Backend;
    use super::super::super::backend::ClientError;
    use super::super::super::backend::NodeMode;
    use super::super::super::backend::Transaction;
    use super::super::store::MockStore;
    use super::MockSession;

    #[test]
    fn watchers_fire_once() {
        let store = Arc::new(MockStore::new());
        let session = MockSession::new(Arc::clone(&store));
        session.mkdir_path("/a").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let watcher_count = Arc::clone(&count);
        session
            .children_w(
                "/a",
                Box::new(move || {
                    watcher_count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        session.create("/a/x", Vec::new(), NodeMode::Persistent).unwrap();
        session.create("/a/y", Vec::new(), NodeMode::Persistent).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.watch_count("/a"), 0);
    }

    #[test]
    fn failed_transactions_change_nothing() {
        let store = Arc::new(MockStore::new());
        let session = MockSession::new(Arc::clone(&store));
        session.mkdir_path("/a").unwrap();
        let txn = Transaction::new()
            .create("/a/x", Vec::new(), NodeMode::Persistent)
            .remove("/a/missing", None);
        assert_eq!(session.commit(txn), Err(ClientError::NoNode));
        assert!(!store.exists("/a/x"));
    }

    #[test]
    fn expiry_removes_ephemerals_only() {
        let store = Arc::new(MockStore::new());
        let session = MockSession::new(Arc::clone(&store));
        let other = MockSession::new(Arc::clone(&store));
        session.mkdir_path("/a").unwrap();
        session.create("/a/mine", Vec::new(), NodeMode::Ephemeral).unwrap();
        other.create("/a/theirs", Vec::new(), NodeMode::Ephemeral).unwrap();
        session.expire();
        assert_eq!(store.children("/a"), vec!["theirs".to_string()]);
        assert_eq!(session.children("/a"), Err(ClientError::ConnectionLoss));
        session.connect();
        assert!(session.children("/a").is_ok());
    }

    #[test]
    fn injected_failures_are_one_shot() {
        let store = Arc::new(MockStore::new());
        let session = MockSession::new(store);
        session.fail_next(ClientError::Other("boom".into()));
        assert_eq!(session.exists("/"), Err(ClientError::Other("boom".into())));
        assert!(session.exists("/").unwrap().is_some());
    }
}
