pub mod agent;
pub mod blocklist;
pub mod collector;
pub mod config;
pub mod events;
pub mod watchers;

pub use agent::{Agent, AgentSources, AgentStatus};
pub use config::AgentConfig;
