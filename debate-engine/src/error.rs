//! Engine error types
//!
//! Every controller operation returns [`EngineResult`]. Recoverable failures
//! (bad selection, unavailable generator, busy session) leave session state
//! untouched; callers can inspect [`EngineError::is_retryable`] or convert to
//! a [`StructuredError`] for display.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error payload for the page layer.
///
/// # Example Response
/// ```json
/// {
///   "code": "GENERATION_UNAVAILABLE",
///   "message": "AI generation unavailable: request timed out",
///   "recovery_action": "Retry the turn; your message has been kept",
///   "retryable": true,
///   "context": { "session_id": "abc123", "round": 3 }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code (e.g., "INVALID_SELECTION")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// What the caller can do next
    pub recovery_action: String,

    /// Relevant context for debugging and recovery
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Whether this error is retryable (transient failure)
    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    /// Create a new structured error
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
        }
    }

    /// Add context key-value pair
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Add session context (common pattern)
    pub fn with_session(self, session_id: &str) -> Self {
        self.with_context("session_id", session_id.to_string())
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Option is not offered by the current node
    #[error("Invalid selection: option '{option_id}' is not available at node '{node_id}'")]
    InvalidSelection { node_id: String, option_id: String },

    /// Graph structure is broken (missing node, dead-end option, no root)
    #[error("Broken graph: {message}")]
    BrokenGraph { message: String },

    /// External generation collaborator failed or timed out
    #[error("AI generation unavailable: {message}")]
    GenerationUnavailable { message: String },

    /// A prior call on this session is still outstanding
    #[error("Operation in progress: {operation}")]
    OperationInProgress { operation: String },

    /// Access policy denied the feature
    #[error("Access denied: user '{user_id}' is not entitled to {feature}")]
    AccessDenied { user_id: String, feature: String },

    /// Could not acquire the per-session lock in time
    #[error("Session {session_key} is locked by another operation")]
    SessionLocked { session_key: String },

    /// Mutation attempted on a completed session
    #[error("Session {session_id} is completed and read-only")]
    ReadOnly { session_id: String },

    /// Operation not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Entity lookup failed
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Write carries a revision older than the stored record
    #[error("Stale write for session {session_id}: stored revision {stored}, attempted {attempted}")]
    StaleWrite {
        session_id: String,
        stored: u64,
        attempted: u64,
    },

    /// Session store backend failure
    #[error("Store error: {message}")]
    Store { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an invalid selection error
    pub fn invalid_selection(node_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self::InvalidSelection {
            node_id: node_id.into(),
            option_id: option_id.into(),
        }
    }

    /// Create a broken graph error
    pub fn broken_graph(message: impl Into<String>) -> Self {
        Self::BrokenGraph {
            message: message.into(),
        }
    }

    /// Create a generation unavailable error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationUnavailable {
            message: message.into(),
        }
    }

    /// Create an operation-in-progress error
    pub fn in_progress(operation: impl Into<String>) -> Self {
        Self::OperationInProgress {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationUnavailable { .. }
                | Self::OperationInProgress { .. }
                | Self::SessionLocked { .. }
                | Self::Store { .. }
                | Self::Io(_)
        )
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSelection { .. } => "INVALID_SELECTION",
            Self::BrokenGraph { .. } => "BROKEN_GRAPH",
            Self::GenerationUnavailable { .. } => "GENERATION_UNAVAILABLE",
            Self::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::SessionLocked { .. } => "SESSION_LOCKED",
            Self::ReadOnly { .. } => "READ_ONLY",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::StaleWrite { .. } => "STALE_WRITE",
            Self::Store { .. } => "STORE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    fn recovery_action(&self) -> &'static str {
        match self {
            Self::InvalidSelection { .. } => "Choose one of the options offered at the current node",
            Self::BrokenGraph { .. } => {
                "Traversal stopped at the last valid node; report the topic content"
            }
            Self::GenerationUnavailable { .. } => "Retry the turn; your message has been kept",
            Self::OperationInProgress { .. } => "Wait for the pending response before submitting",
            Self::AccessDenied { .. } => "Upgrade the plan to use live debates",
            Self::SessionLocked { .. } => "Retry once the current operation finishes",
            Self::ReadOnly { .. } => "View the report or reset to start a new run",
            Self::InvalidState { .. } => "Check the session status before calling this operation",
            Self::NotFound { .. } => "Verify the identifier",
            Self::StaleWrite { .. } => "Reload the session and retry",
            Self::Store { .. } | Self::Io(_) => "Retry the operation",
            Self::Config { .. } => "Fix the engine configuration",
            Self::Json(_) => "Inspect the stored record for corruption",
        }
    }

    /// Convert to a structured error for callers
    pub fn to_structured(&self) -> StructuredError {
        let error = StructuredError::new(self.code(), self.to_string(), self.recovery_action());
        let error = match self {
            Self::InvalidSelection { node_id, option_id } => error
                .with_context("node_id", node_id.clone())
                .with_context("option_id", option_id.clone()),
            Self::AccessDenied { user_id, feature } => error
                .with_context("user_id", user_id.clone())
                .with_context("feature", feature.clone()),
            Self::ReadOnly { session_id } | Self::StaleWrite { session_id, .. } => {
                error.with_session(session_id)
            }
            _ => error,
        };
        if self.is_retryable() {
            error.retryable()
        } else {
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::generation("timeout").is_retryable());
        assert!(EngineError::in_progress("submit").is_retryable());
        assert!(!EngineError::invalid_selection("n1", "o9").is_retryable());
        assert!(!EngineError::broken_graph("no root").is_retryable());
        assert!(!EngineError::ReadOnly {
            session_id: "s1".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_structured_error_for_selection() {
        let structured = EngineError::invalid_selection("root", "opt-x").to_structured();
        assert_eq!(structured.code, "INVALID_SELECTION");
        assert!(!structured.retryable);
        assert_eq!(structured.context["node_id"], "root");
        assert_eq!(structured.context["option_id"], "opt-x");
    }

    #[test]
    fn test_structured_error_serialization() {
        let structured = EngineError::generation("connection refused").to_structured();
        assert!(structured.retryable);

        let json = serde_json::to_string(&structured).unwrap();
        assert!(json.contains("GENERATION_UNAVAILABLE"));
        assert!(!json.contains("context"));
    }

    #[test]
    fn test_display_messages() {
        let err = EngineError::AccessDenied {
            user_id: "u1".into(),
            feature: "live_debate".into(),
        };
        assert!(err.to_string().contains("u1"));
        assert!(err.to_string().contains("live_debate"));

        let err = EngineError::StaleWrite {
            session_id: "s1".into(),
            stored: 4,
            attempted: 3,
        };
        assert!(err.to_string().contains("revision 4"));
    }
}
