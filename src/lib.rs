//! Plan a free-text request with a language model, then drive a browser
//! through the plan one grounded step at a time.

pub mod brain;
pub mod config;
pub mod dispatcher;
pub mod dom;
pub mod error;
pub mod events;
pub mod executor;
pub mod face;
pub mod hands;
pub mod orchestrator;
pub mod planner;
pub mod prompts;
pub mod retry;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
pub use orchestrator::{Orchestrator, RunResult};
pub use session::AgentSession;
