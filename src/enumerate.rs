use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use failure::ResultExt;
use humthreads::Builder;
use humthreads::ThreadScope;
use serde::Deserialize;
use slog::debug;
use slog::warn;
use slog::Logger;

use super::backend::join_path;
use super::backend::normalise_path;
use super::backend::Backend;
use super::backend::ClientError;
use super::error::failure_info;
use super::metrics::ENUMERATE_TIMEOUTS;
use super::metrics::ENUMERATE_TOTAL;
use super::Error;
use super::ErrorKind;
use super::Result;

/// Subset of a service record needed to collect its name.
#[derive(Deserialize)]
struct LeafRecord {
    name: String,
}

fn timeout_error(root: &str) -> Error {
    let message = format!("enumerating services under '{}'", root);
    ErrorKind::Timeout(message).into()
}

/// State of a single walk, owned by the enumerator thread.
struct Walk {
    backend: Arc<dyn Backend>,
    deadline: Instant,
    logger: Logger,
    names: Vec<String>,
    root: String,
    scope: ThreadScope,
    seen: HashSet<String>,
}

impl Walk {
    /// Stop walking once the caller gave up or the deadline passed.
    fn check_deadline(&self) -> Result<()> {
        if self.scope.should_shutdown() || Instant::now() >= self.deadline {
            return Err(timeout_error(&self.root));
        }
        Ok(())
    }

    fn collect(&mut self, name: String) {
        if self.seen.insert(name.clone()) {
            self.names.push(name);
        }
    }

    fn run(mut self) -> Result<Vec<String>> {
        let root = self.root.clone();
        self.visit(&root)?;
        Ok(self.names)
    }

    fn visit(&mut self, path: &str) -> Result<()> {
        self.check_deadline()?;
        self.scope.activity(format!("listing '{}'", path));
        let (mut children, stat) = match self.backend.children(path) {
            Ok(result) => result,
            // Missing root or a node removed while walking.
            Err(ClientError::NoNode) => return Ok(()),
            Err(error) => return Err(Error::backend("service enumeration", error)),
        };

        if stat.data_length > 0 && stat.num_children == 0 {
            self.check_deadline()?;
            let data = match self.backend.data(path) {
                Ok(data) => data,
                Err(ClientError::NoNode) => return Ok(()),
                Err(error) => return Err(Error::backend("service enumeration", error)),
            };
            match serde_json::from_slice::<LeafRecord>(&data) {
                Ok(record) => self.collect(record.name),
                Err(error) => {
                    warn!(
                        self.logger, "Skipping undecodable service record";
                        "path" => path, failure_info(&error)
                    );
                }
            };
        }

        children.sort();
        for child in children {
            let child = join_path(path, &child);
            self.visit(&child)?;
        }
        Ok(())
    }
}

/// Recursively collect the names of services registered under a path.
///
/// Nodes with data and no children are service records: the `name` field of
/// their JSON payload is collected.
///
/// The walk runs on a background thread so a slow coordinator cannot hold
/// the caller past the timeout. A walk that is given up on stops at its next
/// store call.
pub struct ServiceNames {
    backend: Arc<dyn Backend>,
    logger: Logger,
    timeout: Duration,
}

impl ServiceNames {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration, logger: Logger) -> ServiceNames {
        ServiceNames {
            backend,
            logger,
            timeout,
        }
    }

    /// Distinct service names under `root`, in the order they are first found.
    ///
    /// A missing root is an empty result.
    /// Running out of time returns `ErrorKind::Timeout`.
    pub fn for_path(&self, root: &str) -> Result<Vec<String>> {
        ENUMERATE_TOTAL.inc();
        let root = normalise_path(root);
        let deadline = Instant::now() + self.timeout;
        let backend = Arc::clone(&self.backend);
        let logger = self.logger.clone();
        let walk_root = root.clone();
        let worker = Builder::new("zl:enumerate")
            .full_name("zoologist:service-enumerator")
            .spawn(move |scope| {
                let walk = Walk {
                    backend,
                    deadline,
                    logger,
                    names: Vec::new(),
                    root: walk_root,
                    scope,
                    seen: HashSet::new(),
                };
                walk.run()
            })
            .with_context(|_| ErrorKind::SpawnThread("service enumerator"))?;

        let result = match worker.join_timeout(self.timeout) {
            Ok(result) => result,
            Err(error) if matches!(error.kind(), humthreads::ErrorKind::JoinTimeout) => {
                worker.request_shutdown();
                Err(timeout_error(&root))
            }
            Err(error) => Err(error)
                .with_context(|_| ErrorKind::Backend("service enumeration"))
                .map_err(Error::from),
        };
        match &result {
            Ok(names) => debug!(
                self.logger, "Enumerated services";
                "path" => &root, "services" => names.len()
            ),
            Err(error) if error.is_timeout() => {
                ENUMERATE_TIMEOUTS.inc();
                warn!(
                    self.logger, "Service enumeration timed out";
                    "path" => &root, "timeout" => ?self.timeout
                );
            }
            Err(_) => (),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use std::time::Instant;

    use slog::o;
    use slog::Discard;
    use slog::Logger;

    use super::super::backend::Backend;
    use super::super::backend::ClientResult;
    use super::super::backend::ConnectionListener;
    use super::super::backend::ListenerId;
    use super::super::backend::NodeMode;
    use super::super::backend::NodeStat;
    use super::super::backend::OpResult;
    use super::super::backend::Transaction;
    use super::super::backend::Watcher;
    use super::super::mock::MockCoordinator;
    use super::super::mock::MockSession;
    use super::ServiceNames;

    /// Session that stalls on every children listing.
    struct SlowBackend {
        delay: Duration,
        session: Arc<MockSession>,
    }

    impl Backend for SlowBackend {
        fn children(&self, path: &str) -> ClientResult<(Vec<String>, NodeStat)> {
            thread::sleep(self.delay);
            self.session.children(path)
        }

        fn children_w(
            &self,
            path: &str,
            watcher: Watcher,
        ) -> ClientResult<(Vec<String>, NodeStat)> {
            self.session.children_w(path, watcher)
        }

        fn close(&self) {
            self.session.close()
        }

        fn commit(&self, transaction: Transaction) -> ClientResult<Vec<OpResult>> {
            self.session.commit(transaction)
        }

        fn create(&self, path: &str, data: Vec<u8>, mode: NodeMode) -> ClientResult<String> {
            self.session.create(path, data, mode)
        }

        fn data(&self, path: &str) -> ClientResult<Vec<u8>> {
            self.session.data(path)
        }

        fn exists(&self, path: &str) -> ClientResult<Option<NodeStat>> {
            self.session.exists(path)
        }

        fn mkdir_path(&self, path: &str) -> ClientResult<()> {
            self.session.mkdir_path(path)
        }

        fn remove(&self, path: &str, version: Option<i32>) -> ClientResult<()> {
            self.session.remove(path, version)
        }

        fn subscribe(&self, listener: ConnectionListener) -> ListenerId {
            self.session.subscribe(listener)
        }

        fn unsubscribe(&self, id: ListenerId) {
            self.session.unsubscribe(id)
        }
    }

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn names(mock: &MockCoordinator) -> ServiceNames {
        ServiceNames::new(mock.session(), Duration::from_secs(2), logger())
    }

    #[test]
    fn missing_root_is_empty() {
        let mock = MockCoordinator::new(logger());
        assert!(names(&mock).for_path("/nothing").unwrap().is_empty());
    }

    #[test]
    fn leaf_reachable_from_many_branches_is_reported_once() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/a/b", b"");
        mock.store.put("/root/c", b"");
        mock.store.put("/root/a/x/leaf1", br#"{"name": "svc/v2"}"#);
        mock.store.put("/root/a/b/leaf2", br#"{"name": "svc/v2"}"#);
        mock.store.put("/root/c/leaf3", br#"{"name": "svc/v2"}"#);
        let found = names(&mock).for_path("/root").unwrap();
        assert_eq!(found, vec!["svc/v2".to_string()]);
    }

    #[test]
    fn collects_in_traversal_order() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/b/i1", br#"{"name": "beta"}"#);
        mock.store.put("/root/a/i1", br#"{"name": "alpha"}"#);
        mock.store.put("/root/a/i2", br#"{"name": "alpha"}"#);
        let found = names(&mock).for_path("root").unwrap();
        assert_eq!(found, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn undecodable_leaves_are_skipped() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/bad", b"not json");
        mock.store.put("/root/nameless", br#"{"id": 1}"#);
        mock.store.put("/root/good", br#"{"name": "ok"}"#);
        let found = names(&mock).for_path("/root").unwrap();
        assert_eq!(found, vec!["ok".to_string()]);
    }

    #[test]
    fn nodes_with_children_are_not_leaves() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/parent", br#"{"name": "parent"}"#);
        mock.store.put("/root/parent/child", br#"{"name": "child"}"#);
        let found = names(&mock).for_path("/root").unwrap();
        assert_eq!(found, vec!["child".to_string()]);
    }

    #[test]
    fn slow_store_calls_are_bounded_by_the_timeout() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/leaf", br#"{"name": "svc"}"#);
        let backend = Arc::new(SlowBackend {
            delay: Duration::from_millis(500),
            session: mock.session(),
        });
        let names = ServiceNames::new(backend, Duration::from_millis(50), logger());
        let start = Instant::now();
        let error = names.for_path("/root").unwrap_err();
        assert!(error.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn slow_store_within_the_timeout_completes() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/leaf", br#"{"name": "svc"}"#);
        let backend = Arc::new(SlowBackend {
            delay: Duration::from_millis(5),
            session: mock.session(),
        });
        let names = ServiceNames::new(backend, Duration::from_secs(2), logger());
        assert_eq!(names.for_path("/root").unwrap(), vec!["svc".to_string()]);
    }

    #[test]
    fn timeout_is_distinct_from_not_found() {
        let mock = MockCoordinator::new(logger());
        mock.store.put("/root/leaf", br#"{"name": "svc"}"#);
        let names = ServiceNames::new(mock.session(), Duration::from_millis(0), logger());
        let error = names.for_path("/root").unwrap_err();
        assert!(error.is_timeout());
        assert!(!error.is_not_found());
    }
}
