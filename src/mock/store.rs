use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::super::backend::ClientError;
use super::super::backend::ClientResult;
use super::super::backend::ConnectionListener;
use super::super::backend::NodeMode;
use super::super::backend::NodeStat;
use super::super::backend::Op;
use super::super::backend::OpResult;
use super::super::backend::Watcher;

/// Path of the parent of a node.
fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

#[derive(Clone, Debug)]
struct MockNode {
    data: Vec<u8>,
    owner: Option<u64>,
    version: i32,
}

/// In-memory node hierarchy.
#[derive(Clone, Debug, Default)]
pub(super) struct Tree {
    nodes: BTreeMap<String, MockNode>,
    sequences: HashMap<String, u64>,
}

impl Tree {
    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(String::from)
            .collect()
    }

    fn contains(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    pub fn children(&self, path: &str) -> ClientResult<(Vec<String>, NodeStat)> {
        if !self.contains(path) {
            return Err(ClientError::NoNode);
        }
        let children = self.child_names(path);
        let mut stat = self.stat(path).unwrap_or_default();
        stat.num_children = children.len();
        Ok((children, stat))
    }

    pub fn data(&self, path: &str) -> ClientResult<Vec<u8>> {
        match self.nodes.get(path) {
            Some(node) => Ok(node.data.clone()),
            None if path == "/" => Ok(Vec::new()),
            None => Err(ClientError::NoNode),
        }
    }

    pub fn stat(&self, path: &str) -> Option<NodeStat> {
        if path == "/" {
            return Some(NodeStat {
                data_length: 0,
                num_children: self.child_names(path).len(),
                version: 0,
            });
        }
        self.nodes.get(path).map(|node| NodeStat {
            data_length: node.data.len(),
            num_children: self.child_names(path).len(),
            version: node.version,
        })
    }

    fn check(&self, path: &str, version: Option<i32>) -> ClientResult<()> {
        let stat = self.stat(path).ok_or(ClientError::NoNode)?;
        match version {
            Some(version) if version != stat.version => Err(ClientError::BadVersion),
            _ => Ok(()),
        }
    }

    /// Create a node, returning its final path.
    pub fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        mode: NodeMode,
        session: u64,
        touched: &mut Vec<String>,
    ) -> ClientResult<String> {
        let parent = parent_of(path).to_string();
        if !self.contains(&parent) {
            return Err(ClientError::NoNode);
        }
        let path = if mode.is_sequential() {
            let counter = self.sequences.entry(parent.clone()).or_insert(0);
            let path = format!("{}{:010}", path, counter);
            *counter += 1;
            path
        } else {
            path.to_string()
        };
        if self.contains(&path) {
            return Err(ClientError::NodeExists);
        }
        let owner = if mode.is_ephemeral() {
            Some(session)
        } else {
            None
        };
        let node = MockNode {
            data,
            owner,
            version: 0,
        };
        self.nodes.insert(path.clone(), node);
        touched.push(parent);
        Ok(path)
    }

    pub fn remove(
        &mut self,
        path: &str,
        version: Option<i32>,
        touched: &mut Vec<String>,
    ) -> ClientResult<()> {
        self.check(path, version)?;
        if !self.child_names(path).is_empty() {
            return Err(ClientError::NotEmpty);
        }
        self.nodes.remove(path);
        touched.push(path.to_string());
        touched.push(parent_of(path).to_string());
        Ok(())
    }

    /// Create a path and all its missing parents as persistent nodes.
    pub fn mkdir(&mut self, path: &str, touched: &mut Vec<String>) {
        let mut current = String::new();
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let parent = if current.is_empty() {
                "/".to_string()
            } else {
                current.clone()
            };
            current = format!("{}/{}", current, part);
            if !self.nodes.contains_key(&current) {
                let node = MockNode {
                    data: Vec::new(),
                    owner: None,
                    version: 0,
                };
                self.nodes.insert(current.clone(), node);
                touched.push(parent);
            }
        }
    }

    /// Apply a list of operations to this tree, stopping at the first error.
    pub fn apply(
        &mut self,
        ops: Vec<Op>,
        session: u64,
        touched: &mut Vec<String>,
    ) -> ClientResult<Vec<OpResult>> {
        let mut results = Vec::new();
        for op in ops {
            let result = match op {
                Op::Check { path, version } => {
                    self.check(&path, version)?;
                    OpResult::Checked
                }
                Op::Create { path, data, mode } => {
                    let path = self.create(&path, data, mode, session, touched)?;
                    OpResult::Created(path)
                }
                Op::Remove { path, version } => {
                    self.remove(&path, version, touched)?;
                    OpResult::Removed
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Remove a node and its entire subtree.
    pub fn remove_all(&mut self, path: &str, touched: &mut Vec<String>) {
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|key| *key == path || key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in doomed {
            self.nodes.remove(&key);
            touched.push(parent_of(&key).to_string());
            touched.push(key);
        }
    }

    /// Remove all ephemeral nodes owned by a session.
    pub fn remove_ephemerals(&mut self, session: u64, touched: &mut Vec<String>) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.nodes.remove(&path);
            touched.push(parent_of(&path).to_string());
            touched.push(path);
        }
    }
}

/// Connectivity and fault injection state of a `MockSession`.
#[derive(Default)]
pub(super) struct SessionState {
    pub closed: bool,
    pub disconnected: bool,
    pub failures: VecDeque<ClientError>,
    pub listeners: Vec<(u64, ConnectionListener)>,
}

pub(super) struct StoreInner {
    pub next_listener: u64,
    pub next_session: u64,
    pub sessions: HashMap<u64, SessionState>,
    pub tree: Tree,
    pub watches: HashMap<String, Vec<(u64, Watcher)>>,
}

impl StoreInner {
    /// Validate the session can perform an operation.
    pub fn precheck(&mut self, session: u64) -> ClientResult<()> {
        let state = self
            .sessions
            .get_mut(&session)
            .ok_or(ClientError::SessionExpired)?;
        if state.closed {
            return Err(ClientError::SessionExpired);
        }
        if state.disconnected {
            return Err(ClientError::ConnectionLoss);
        }
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Remove the one-shot watchers triggered by changes to the given paths.
    pub fn triggered(&mut self, touched: Vec<String>) -> Vec<Watcher> {
        let mut watchers = Vec::new();
        for path in touched {
            if let Some(registered) = self.watches.remove(&path) {
                watchers.extend(registered.into_iter().map(|(_, watcher)| watcher));
            }
        }
        watchers
    }

    /// Drop everything a session owns: ephemeral nodes and watchers.
    pub fn expire(&mut self, session: u64) -> Vec<Watcher> {
        for registered in self.watches.values_mut() {
            registered.retain(|(owner, _)| *owner != session);
        }
        self.watches.retain(|_, registered| !registered.is_empty());
        let mut touched = Vec::new();
        self.tree.remove_ephemerals(session, &mut touched);
        self.triggered(touched)
    }
}

/// Shared in-memory coordination store.
///
/// Sessions created from the same store see the same nodes, like clients of
/// the same ensemble would.
pub struct MockStore {
    inner: Mutex<StoreInner>,
}

impl Default for MockStore {
    fn default() -> MockStore {
        MockStore::new()
    }
}

impl MockStore {
    pub fn new() -> MockStore {
        let inner = StoreInner {
            next_listener: 0,
            next_session: 0,
            sessions: HashMap::new(),
            tree: Tree::default(),
            watches: HashMap::new(),
        };
        MockStore {
            inner: Mutex::new(inner),
        }
    }

    pub(super) fn inner(&self) -> MutexGuard<StoreInner> {
        self.inner.lock().expect("MockStore::inner lock poisoned")
    }

    /// Sorted names of the children of a node (empty if the node does not exist).
    pub fn children(&self, path: &str) -> Vec<String> {
        self.inner()
            .tree
            .children(path)
            .map(|(children, _)| children)
            .unwrap_or_default()
    }

    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner().tree.data(path).ok()
    }

    /// Remove a node and its subtree from outside of any session.
    pub fn delete(&self, path: &str) {
        let watchers = {
            let mut inner = self.inner();
            let mut touched = Vec::new();
            inner.tree.remove_all(path, &mut touched);
            inner.triggered(touched)
        };
        fire(watchers);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner().tree.contains(path)
    }

    /// Create (or overwrite) a persistent node, along with any missing parent.
    pub fn put(&self, path: &str, data: &[u8]) {
        let watchers = {
            let mut inner = self.inner();
            let mut touched = Vec::new();
            inner.tree.mkdir(path, &mut touched);
            if let Some(node) = inner.tree.nodes.get_mut(path) {
                node.data = data.to_vec();
                node.version += 1;
            }
            inner.triggered(touched)
        };
        fire(watchers);
    }

    /// Number of pending watchers on a path.
    pub fn watch_count(&self, path: &str) -> usize {
        self.inner()
            .watches
            .get(path)
            .map(|registered| registered.len())
            .unwrap_or(0)
    }
}

/// Invoke watchers, outside of any store lock.
pub(super) fn fire(watchers: Vec<Watcher>) {
    for watcher in watchers {
        watcher();
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::backend::NodeMode;
    use super::super::super::backend::Op;
    use super::Tree;

    #[test]
    fn sequential_names_are_padded_per_parent() {
        let mut tree = Tree::default();
        let mut touched = Vec::new();
        tree.mkdir("/a", &mut touched);
        tree.mkdir("/b", &mut touched);
        let first = tree
            .create("/a/n-", Vec::new(), NodeMode::EphemeralSequential, 1, &mut touched)
            .unwrap();
        let second = tree
            .create("/a/n-", Vec::new(), NodeMode::EphemeralSequential, 1, &mut touched)
            .unwrap();
        let other = tree
            .create("/b/n-", Vec::new(), NodeMode::EphemeralSequential, 1, &mut touched)
            .unwrap();
        assert_eq!(first, "/a/n-0000000000");
        assert_eq!(second, "/a/n-0000000001");
        assert_eq!(other, "/b/n-0000000000");
    }

    #[test]
    fn children_are_direct_descendants_only() {
        let mut tree = Tree::default();
        let mut touched = Vec::new();
        tree.mkdir("/a/b/c", &mut touched);
        tree.mkdir("/a/d", &mut touched);
        tree.mkdir("/ab", &mut touched);
        let (children, stat) = tree.children("/a").unwrap();
        assert_eq!(children, vec!["b".to_string(), "d".to_string()]);
        assert_eq!(stat.num_children, 2);
        let (root, _) = tree.children("/").unwrap();
        assert_eq!(root, vec!["a".to_string(), "ab".to_string()]);
    }

    #[test]
    fn failed_ops_report_the_error() {
        let mut tree = Tree::default();
        let mut touched = Vec::new();
        tree.mkdir("/a", &mut touched);
        let ops = vec![
            Op::Check {
                path: "/a".into(),
                version: None,
            },
            Op::Remove {
                path: "/missing".into(),
                version: None,
            },
        ];
        let mut copy = tree.clone();
        assert!(copy.apply(ops, 1, &mut touched).is_err());
        assert!(tree.children("/a").is_ok());
    }
}
