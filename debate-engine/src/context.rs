//! Collaborators and helpers shared by every controller.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::catalog::SharedCatalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{SessionEvent, SharedEventBus};
use crate::session::{Session, SessionKey};
use crate::store::SharedSessionStore;

/// Handles every controller needs: config, store, catalog and event bus.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub store: SharedSessionStore,
    pub catalog: SharedCatalog,
    pub events: SharedEventBus,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        store: SharedSessionStore,
        catalog: SharedCatalog,
        events: SharedEventBus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            catalog,
            events,
        }
    }

    /// Acquire a session lock, giving up after the configured timeout.
    pub async fn lock<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        key: &SessionKey,
    ) -> EngineResult<MutexGuard<'a, T>> {
        match tokio::time::timeout(self.config.lock_timeout(), mutex.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(session_key = %key, "Timed out waiting for session lock");
                Err(EngineError::SessionLocked {
                    session_key: key.to_string(),
                })
            }
        }
    }

    /// Bump the revision and write. On failure the revision is restored so
    /// the caller can discard the candidate state.
    pub async fn persist(&self, session: &mut Session) -> EngineResult<()> {
        session.revision += 1;
        if let Err(e) = self.store.save(session).await {
            session.revision -= 1;
            warn!(session_id = %session.id, error = %e, "Failed to persist session");
            return Err(e);
        }
        debug!(
            session_id = %session.id,
            revision = session.revision,
            status = %session.status,
            "Progress persisted"
        );
        Ok(())
    }

    pub fn publish(&self, event: SessionEvent) {
        self.events.publish(event);
    }
}
