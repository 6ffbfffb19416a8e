//! Agent-specific error types.
//!
//! Only *terminal* conditions live here. Tool failures and permission
//! denials are observations — the loop absorbs them and keeps going.

use miette::Diagnostic;
use thiserror::Error;

/// Errors that terminate an agent run.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("model output could not be parsed after retry: {message}")]
    #[diagnostic(
        code(neuronos::agent::parse),
        help(
            "The model produced malformed action JSON twice in a row, even \
             with the stricter reminder. Lower the temperature or check that \
             the grammar is being applied."
        )
    )]
    Parse { message: String },

    #[error("re-entrant engine call exceeds depth limit {limit}")]
    #[diagnostic(
        code(neuronos::agent::reentrancy),
        help(
            "A tool invoked the agent recursively past the allowed depth. \
             Raise max_engine_depth only if the nested workload is bounded."
        )
    )]
    ReentrancyExceeded { limit: u8 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] crate::error::EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] crate::error::MemoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] crate::error::ToolError),
}

/// Convenience alias for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
