//! Error taxonomy for the conversation-tree runtime.
//!
//! Mirrors the error-kind pattern already used by [`crate::cloudllm::tool_protocol::ToolError`]:
//! a closed enum per failure domain, each implementing [`std::fmt::Display`] and
//! [`std::error::Error`], so callers can match on kind instead of parsing strings.

use std::fmt;

/// A failure raised anywhere in the tree/registry/step-machine/persistence/orchestrator stack.
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Network/timeout/429/5xx — retried by the adapter before this is ever surfaced.
    ProviderTransient(String),
    /// Non-retryable provider failure: bad auth, malformed response, 4xx other than 429.
    ProviderFatal(String),
    /// A tool name requested by the model is not present in the registry.
    ToolNotFound(String),
    /// A registered tool ran and returned/raised an application-level failure.
    ToolExecFailure { tool: String, detail: String },
    /// Snapshotting or rehydrating a tool module failed.
    ModuleLoadFailure(String),
    /// A disk save encountered an attribute that is not JSON-representable.
    PersistSchemaViolation(String),
    /// A cursor operation (`up`, `down`, `goto`, ...) targeted an invalid destination.
    NavigationError(String),
    /// Cooperative cancellation observed mid-turn. Not a logic error.
    Cancelled,
    /// A second turn was started on a bot that already has one in flight.
    ConcurrentTurnError,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ProviderTransient(msg) => write!(f, "provider transient error: {}", msg),
            CoreError::ProviderFatal(msg) => write!(f, "provider fatal error: {}", msg),
            CoreError::ToolNotFound(name) => write!(f, "tool not found: {}", name),
            CoreError::ToolExecFailure { tool, detail } => {
                write!(f, "tool '{}' execution failed: {}", tool, detail)
            }
            CoreError::ModuleLoadFailure(msg) => write!(f, "module load failure: {}", msg),
            CoreError::PersistSchemaViolation(msg) => {
                write!(f, "attribute is not JSON-representable: {}", msg)
            }
            CoreError::NavigationError(msg) => write!(f, "navigation error: {}", msg),
            CoreError::Cancelled => write!(f, "operation cancelled"),
            CoreError::ConcurrentTurnError => {
                write!(f, "a turn is already in flight on this bot")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Convenience alias used at most public boundaries in this crate.
pub type CoreResult<T> = Result<T, CoreError>;
