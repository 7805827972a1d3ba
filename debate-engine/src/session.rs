//! Session records. One record tracks one user's progress through one (topic, mode) pair.
//!
//! `ModeState` is a tagged union so a controller can only ever touch the
//! fields of its own mode.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::Report;

/// Interaction mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateMode {
    Scripted,
    Tree,
    Live,
}

impl std::fmt::Display for DebateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scripted => write!(f, "scripted"),
            Self::Tree => write!(f, "tree"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Store key: at most one active session per (user, topic, mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub topic_id: String,
    pub mode: DebateMode,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, topic_id: impl Into<String>, mode: DebateMode) -> Self {
        Self {
            user_id: user_id.into(),
            topic_id: topic_id.into(),
            mode,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.topic_id, self.mode)
    }
}

// ============================================================================
// Mode state
// ============================================================================

/// Scripted playback position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedState {
    pub current_round_index: usize,
}

/// One decision in a tree traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node_id: String,
    pub chosen_option_id: String,
}

/// A (node, option) pair the user has selected at least once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExploredEdge {
    pub node_id: String,
    pub option_id: String,
}

/// Decision tree traversal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    pub current_node_id: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub explored_edges: BTreeSet<ExploredEdge>,
}

impl TreeState {
    pub fn at_root(root_id: impl Into<String>) -> Self {
        Self {
            current_node_id: root_id.into(),
            history: Vec::new(),
            explored_edges: BTreeSet::new(),
        }
    }
}

/// Who produced a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Ai,
    System,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Ai => write!(f, "ai"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One utterance in a live debate. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub id: String,
    pub session_id: String,
    pub speaker: Speaker,
    pub content: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl LiveMessage {
    pub fn new(session_id: &str, speaker: Speaker, content: impl Into<String>, round: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            speaker,
            content: content.into(),
            round,
            timestamp: Utc::now(),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

/// Outcome of one resolved live round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundScore {
    pub round: u32,
    /// Collaborator rating in [0, 100]; `None` when the reply carried none.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timed_out: bool,
}

/// Live debate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub selected_position_id: String,
    pub opponent_persona: String,
    /// 1-based; `max_rounds + 1` marks a finalized debate.
    pub round: u32,
    pub max_rounds: u32,
    #[serde(default)]
    pub messages: Vec<LiveMessage>,
    #[serde(default)]
    pub feedback_log: Vec<String>,
    #[serde(default)]
    pub round_scores: Vec<RoundScore>,
}

impl LiveState {
    /// User message of the current round still waiting for an AI reply.
    ///
    /// Present after a failed generation call, including across a reload.
    pub fn retained_message(&self) -> Option<&LiveMessage> {
        self.messages
            .last()
            .filter(|m| m.speaker == Speaker::User && m.round == self.round)
    }

    pub fn count_by(&self, speaker: Speaker) -> usize {
        self.messages.iter().filter(|m| m.speaker == speaker).count()
    }
}

/// Mode-specific session payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeState {
    Scripted(ScriptedState),
    Tree(TreeState),
    Live(LiveState),
}

impl ModeState {
    pub fn mode(&self) -> DebateMode {
        match self {
            Self::Scripted(_) => DebateMode::Scripted,
            Self::Tree(_) => DebateMode::Tree,
            Self::Live(_) => DebateMode::Live,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub topic_id: String,
    pub mode: DebateMode,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Live mode only.
    #[serde(default)]
    pub score: Option<f64>,
    pub mode_state: ModeState,
    #[serde(default)]
    pub report: Option<Report>,
    /// Incremented on every accepted write.
    #[serde(default)]
    pub revision: u64,
}

impl Session {
    /// Create a new, not-yet-started session.
    pub fn new(user_id: &str, topic_id: &str, mode_state: ModeState) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            mode: mode_state.mode(),
            status: SessionStatus::NotStarted,
            started_at: Utc::now(),
            completed_at: None,
            score: None,
            mode_state,
            report: None,
            revision: 0,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.user_id, &self.topic_id, self.mode)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Mark in progress unless already completed.
    pub fn begin(&mut self) {
        if self.status == SessionStatus::NotStarted {
            self.status = SessionStatus::InProgress;
            self.started_at = Utc::now();
        }
    }

    /// Record completion with an optional report.
    pub fn complete(&mut self, report: Option<Report>) {
        self.status = SessionStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.report = report;
    }

    /// Clear a completion so the session can continue. The report and score
    /// belonged to the finished run and are dropped with it.
    pub fn reopen(&mut self) {
        self.status = SessionStatus::InProgress;
        self.completed_at = None;
        self.report = None;
        self.score = None;
    }

    pub fn scripted(&self) -> Option<&ScriptedState> {
        match &self.mode_state {
            ModeState::Scripted(s) => Some(s),
            _ => None,
        }
    }

    pub fn scripted_mut(&mut self) -> Option<&mut ScriptedState> {
        match &mut self.mode_state {
            ModeState::Scripted(s) => Some(s),
            _ => None,
        }
    }

    pub fn tree(&self) -> Option<&TreeState> {
        match &self.mode_state {
            ModeState::Tree(s) => Some(s),
            _ => None,
        }
    }

    pub fn tree_mut(&mut self) -> Option<&mut TreeState> {
        match &mut self.mode_state {
            ModeState::Tree(s) => Some(s),
            _ => None,
        }
    }

    pub fn live(&self) -> Option<&LiveState> {
        match &self.mode_state {
            ModeState::Live(s) => Some(s),
            _ => None,
        }
    }

    pub fn live_mut(&mut self) -> Option<&mut LiveState> {
        match &mut self.mode_state {
            ModeState::Live(s) => Some(s),
            _ => None,
        }
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        let progress = match &self.mode_state {
            ModeState::Scripted(s) => format!("round index {}", s.current_round_index),
            ModeState::Tree(s) => format!(
                "node {} | {} decisions | {} edges",
                s.current_node_id,
                s.history.len(),
                s.explored_edges.len()
            ),
            ModeState::Live(s) => format!("round {}/{}", s.round, s.max_rounds),
        };
        format!(
            "[{}] {} | {} | topic={} rev={}",
            self.status, self.mode, progress, self.topic_id, self.revision
        )
    }
}
