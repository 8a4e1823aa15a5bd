use std::sync::Arc;

use slog::Logger;

use super::Config;
use super::Coordinator;

mod session;
mod store;

pub use self::session::MockSession;
pub use self::store::MockStore;

/// Helper to mock distributed coordination services.
///
/// Every `Coordinator` returned by `MockCoordinator::mock` uses its own session
/// against a store shared by all of them.
pub struct MockCoordinator {
    pub config: Config,
    pub store: Arc<MockStore>,
    logger: Logger,
}

impl MockCoordinator {
    pub fn new(logger: Logger) -> MockCoordinator {
        MockCoordinator {
            config: Config::default(),
            store: Arc::new(MockStore::new()),
            logger,
        }
    }

    /// Coordinator bound to a new session.
    pub fn mock(&self) -> Coordinator {
        self.with_session(self.session())
    }

    /// Open a new session against the shared store.
    pub fn session(&self) -> Arc<MockSession> {
        Arc::new(MockSession::new(Arc::clone(&self.store)))
    }

    /// Coordinator bound to the given session.
    pub fn with_session(&self, session: Arc<MockSession>) -> Coordinator {
        Coordinator::with_backend(session, self.config.clone(), self.logger.clone())
    }
}
