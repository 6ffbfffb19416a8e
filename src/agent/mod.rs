//! The agent layer: a single-threaded ReAct controller over the engine
//! adapter, the tool registry, and the tiered memory store.

pub mod context;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod grammar;

pub use controller::{Agent, AgentConfig, AgentOutcome, AgentStatus, StepEvent};
pub use conversation::{Conversation, Role, ToolCallRef, Turn};
pub use error::{AgentError, AgentResult};
