//! Error taxonomy shared by every layer of the agent.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("session is busy with another model call")]
    Busy,

    #[error("session exhausted: {failures} failures reached the ceiling of {ceiling}")]
    Exhausted { failures: u32, ceiling: u32 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid model reply: {0}")]
    InvalidModelReply(String),

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    ActionTimeout { what: String, timeout_ms: u64 },

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("failed to launch browser: {0}")]
    BrowserLaunchFailure(String),

    #[error("browser not launched")]
    BrowserNotLaunched,

    #[error("network error: {0}")]
    Network(String),

    #[error("browser driver error: {0}")]
    Driver(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether a step's retry loop may count this error and try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AgentError::UnknownActionType(_)
                | AgentError::InvalidPlan(_)
                | AgentError::Exhausted { .. }
                | AgentError::BrowserNotLaunched
                | AgentError::BrowserLaunchFailure(_)
                | AgentError::Config(_)
        )
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_is_not_retryable() {
        assert!(!AgentError::UnknownActionType("teleport".into()).is_retryable());
        assert!(
            !AgentError::Exhausted {
                failures: 3,
                ceiling: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn driver_and_gateway_errors_are_retryable() {
        assert!(AgentError::Network("refused".into()).is_retryable());
        assert!(
            AgentError::ElementNotFound {
                selector: "#go".into()
            }
            .is_retryable()
        );
        assert!(AgentError::InvalidModelReply("not json".into()).is_retryable());
        assert!(AgentError::Busy.is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let err = AgentError::ActionTimeout {
            what: "#results".into(),
            timeout_ms: 10_000,
        };
        assert!(err.to_string().contains("#results"));
        assert!(err.to_string().contains("10000"));
        let err = AgentError::Exhausted {
            failures: 3,
            ceiling: 3,
        };
        assert!(err.to_string().contains("ceiling of 3"));
    }
}
