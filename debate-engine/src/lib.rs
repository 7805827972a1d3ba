//! Debate Session Engine
//!
//! Drives a user through one of three interaction modes over a fixed debate
//! topic:
//! - Scripted AI-vs-AI playback with auto-advance
//! - A branching decision-tree conversation with backtracking
//! - A live, turn-based user-vs-AI debate with per-turn timers and scoring
//!
//! # Layout
//!
//! - [`engine::Engine`]: opens controllers and looks up reports
//! - [`scripted`], [`tree`], [`live`]: per-mode session controllers
//! - [`store`]: session persistence (in-memory and JSON files)
//! - [`report`]: scoring and report generation
//! - [`catalog`], [`access`], [`generation`]: external collaborators
//!
//! # Usage
//!
//! ```no_run
//! use debate_engine::{Engine, EngineConfig, InMemoryCatalog, MemorySessionStore,
//!     TierAccessPolicy, HttpAiTurnGenerator, GeneratorConfig};
//!
//! # async fn run() -> debate_engine::EngineResult<()> {
//! let config = EngineConfig::from_env()?;
//! let catalog = InMemoryCatalog::from_json_file("catalog.json").await?.shared();
//! let generator = HttpAiTurnGenerator::new(GeneratorConfig::default(), config.generation_timeout())?;
//! let engine = Engine::new(
//!     config,
//!     MemorySessionStore::new().shared(),
//!     catalog,
//!     TierAccessPolicy::new().shared(),
//!     generator.shared(),
//! );
//!
//! let tree = engine.tree("user-1", "uniforms").await?;
//! tree.select_option("agree").await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod access;
pub mod catalog;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod generation;
pub mod graph;
pub mod live;
pub mod report;
pub mod scripted;
pub mod session;
pub mod store;
pub mod timer;
pub mod topic;
pub mod tree;

pub use access::{AccessPolicy, Feature, PlanTier, SharedAccessPolicy, TierAccessPolicy};
pub use catalog::{CatalogData, InMemoryCatalog, SharedCatalog, TopicCatalog};
pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, StructuredError};
pub use events::{EventBus, SessionEvent, SharedEventBus};
pub use generation::{
    parse_ai_turn, AiTurn, AiTurnGenerator, GenerationRequest, GeneratorConfig,
    HttpAiTurnGenerator, SharedGenerator,
};
pub use graph::{GraphIssue, GraphReport, TreeGraph};
pub use live::{LiveController, TurnOutcome, TurnPhase};
pub use report::{LiveReport, Report, ScriptedSummary, StanceTally, TreeReport};
pub use scripted::{PlaybackPhase, ScriptedController};
pub use session::{
    DebateMode, ExploredEdge, HistoryEntry, LiveMessage, LiveState, ModeState, RoundScore,
    ScriptedState, Session, SessionKey, SessionStatus, Speaker, TreeState,
};
pub use store::{JsonFileSessionStore, MemorySessionStore, SessionStore, SharedSessionStore};
pub use topic::{OptionStance, Position, ScriptedRound, Stance, Topic, TreeNode, TreeOption};
pub use tree::{SelectionOutcome, TreeController};
