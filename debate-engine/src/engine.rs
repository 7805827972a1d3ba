//! Engine facade. Wires collaborators together and hands out controllers.
//!
//! Opening the same (user, topic, mode) twice while the first handle is
//! alive returns the same controller, so every operation on a session goes
//! through one lock.

use std::collections::HashMap;
use std::sync::Weak;

use tokio::sync::Mutex;
use tracing::debug;

use crate::access::SharedAccessPolicy;
use crate::catalog::SharedCatalog;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, SharedEventBus};
use crate::generation::SharedGenerator;
use crate::live::{LiveController, LiveShared};
use crate::report::Report;
use crate::scripted::{ScriptedController, ScriptedShared};
use crate::session::{DebateMode, Session, SessionKey};
use crate::store::SharedSessionStore;
use crate::tree::{TreeController, TreeShared};

#[derive(Default)]
struct Registry {
    scripted: HashMap<SessionKey, Weak<ScriptedShared>>,
    tree: HashMap<SessionKey, Weak<TreeShared>>,
    live: HashMap<SessionKey, Weak<LiveShared>>,
}

impl Registry {
    fn prune(&mut self) {
        self.scripted.retain(|_, w| w.strong_count() > 0);
        self.tree.retain(|_, w| w.strong_count() > 0);
        self.live.retain(|_, w| w.strong_count() > 0);
    }
}

/// Entry point for driving debate sessions.
pub struct Engine {
    ctx: EngineContext,
    access: SharedAccessPolicy,
    generator: SharedGenerator,
    registry: Mutex<Registry>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: SharedSessionStore,
        catalog: SharedCatalog,
        access: SharedAccessPolicy,
        generator: SharedGenerator,
    ) -> Self {
        Self::with_events(config, store, catalog, access, generator, EventBus::new().shared())
    }

    pub fn with_events(
        config: EngineConfig,
        store: SharedSessionStore,
        catalog: SharedCatalog,
        access: SharedAccessPolicy,
        generator: SharedGenerator,
        events: SharedEventBus,
    ) -> Self {
        Self {
            ctx: EngineContext::new(config, store, catalog, events),
            access,
            generator,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn events(&self) -> SharedEventBus {
        self.ctx.events.clone()
    }

    /// Scripted playback for `(user, topic)`.
    pub async fn scripted(&self, user_id: &str, topic_id: &str) -> EngineResult<ScriptedController> {
        let key = SessionKey::new(user_id, topic_id, DebateMode::Scripted);
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.scripted.get(&key).and_then(ScriptedController::upgrade) {
            debug!(session_key = %key, "Reusing open scripted controller");
            return Ok(existing);
        }
        let controller = ScriptedController::open(self.ctx.clone(), user_id, topic_id).await?;
        registry.prune();
        registry.scripted.insert(key, controller.downgrade());
        Ok(controller)
    }

    /// Decision-tree exploration for `(user, topic)`.
    pub async fn tree(&self, user_id: &str, topic_id: &str) -> EngineResult<TreeController> {
        let key = SessionKey::new(user_id, topic_id, DebateMode::Tree);
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.tree.get(&key).and_then(TreeController::upgrade) {
            debug!(session_key = %key, "Reusing open tree controller");
            return Ok(existing);
        }
        let controller = TreeController::open(self.ctx.clone(), user_id, topic_id).await?;
        registry.prune();
        registry.tree.insert(key, controller.downgrade());
        Ok(controller)
    }

    /// Live debate for `(user, topic)`.
    pub async fn live(&self, user_id: &str, topic_id: &str) -> EngineResult<LiveController> {
        let key = SessionKey::new(user_id, topic_id, DebateMode::Live);
        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.live.get(&key).and_then(LiveController::upgrade) {
            debug!(session_key = %key, "Reusing open live controller");
            return Ok(existing);
        }
        let controller = LiveController::open(
            self.ctx.clone(),
            self.access.clone(),
            self.generator.clone(),
            user_id,
            topic_id,
        )
        .await?;
        registry.prune();
        registry.live.insert(key, controller.downgrade());
        Ok(controller)
    }

    /// Any stored session by id.
    pub async fn session(&self, session_id: &str) -> EngineResult<Session> {
        self.ctx
            .store
            .load_by_id(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    /// Report of a completed session.
    pub async fn get_report(&self, session_id: &str) -> EngineResult<Report> {
        let session = self.session(session_id).await?;
        if !session.is_completed() {
            return Err(EngineError::invalid_state(format!(
                "session {} is {}, no report yet",
                session_id, session.status
            )));
        }
        session.report.ok_or_else(|| {
            EngineError::invalid_state(format!("session {} completed without a report", session_id))
        })
    }
}
