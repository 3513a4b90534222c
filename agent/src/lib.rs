//! Uniform subprocess-driven LLM backend used by the scout and execute
//! phases: a small tool-use loop with worktree-confined file/command
//! tools, an optional ndjson debug trace, and a backend trait the phase
//! machine depends on rather than any one CLI's wire format.

pub mod backend;
pub mod tools;
pub mod trace;
pub mod types;

pub use backend::{AgentBackend, CommandTemplate, ExecuteBackend, RunAllCapable, ScoutBackend};
pub use tools::{ToolCall, ToolDispatcher, ToolResult};
pub use trace::TraceSink;
pub use types::{AgentError, AgentOutcome, AgentRequest, AgentRole, ProgressEvent};
