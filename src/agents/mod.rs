//! Provider agents. The runner only ever sees `Box<dyn WebAgent>` built by
//! an [`AgentFactory`].

pub mod base;
pub mod chatgpt;
pub mod claude;
pub mod registry;

pub use base::{AgentContext, AgentState, ConversationMessage, Role, WebAgent};
pub use chatgpt::ChatGptAgent;
pub use claude::ClaudeAgent;
pub use registry::{AgentFactory, DefaultAgentFactory};
