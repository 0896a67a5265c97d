//! The snapshot → model → dispatch loop for one plan step.

use tracing::{debug, info, warn};

use crate::dispatcher::ActionDispatcher;
use crate::dom::DomSnapshotter;
use crate::error::{AgentError, Result};
use crate::hands::BrowserDriver;
use crate::prompts;
use crate::retry::RetryPolicy;
use crate::session::AgentSession;
use crate::types::{HistoryEntry, PROMPT_HISTORY_ENTRIES, Step, StepExecutionResponse};

/// What one round of the loop produced.
enum Attempt {
    /// The model reported success for the step.
    Done(StepExecutionResponse),
    /// The model asked for corrective actions and they were dispatched.
    Corrected,
    /// Neither success nor anything to do.
    NoProgress,
}

pub struct StepExecutor<'a> {
    session: &'a AgentSession,
    driver: &'a dyn BrowserDriver,
    snapshotter: &'a DomSnapshotter,
    policy: RetryPolicy,
    max_action_rounds: Option<u32>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        session: &'a AgentSession,
        driver: &'a dyn BrowserDriver,
        snapshotter: &'a DomSnapshotter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            session,
            driver,
            snapshotter,
            policy,
            max_action_rounds: None,
        }
    }

    pub fn with_max_action_rounds(mut self, rounds: Option<u32>) -> Self {
        self.max_action_rounds = rounds;
        self
    }

    /// Ground `step` against the live page until the model reports success.
    ///
    /// Returns `Ok(None)` once `max_failures` attempts in a row made no
    /// progress. Dispatched corrective actions do not count as failures.
    /// Errors are counted the same way; when the budget runs out on an error,
    /// that error is returned. Non-retryable errors return immediately.
    pub async fn execute(
        &self,
        step: &Step,
        max_failures: u32,
    ) -> Result<Option<StepExecutionResponse>> {
        let policy = self.policy.clone().with_max_attempts(max_failures);
        let mut failures = 0;
        let mut rounds = 0;

        loop {
            let last_error = match self.attempt(step).await {
                Ok(Attempt::Done(response)) => {
                    info!(step_id = %step.id, failures, "step grounded");
                    return Ok(Some(response));
                }
                Ok(Attempt::Corrected) => {
                    rounds += 1;
                    if self.max_action_rounds.is_some_and(|max| rounds >= max) {
                        warn!(step_id = %step.id, rounds, "corrective round limit reached");
                        return Ok(None);
                    }
                    continue;
                }
                Ok(Attempt::NoProgress) => None,
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => Some(e),
            };

            failures += 1;
            warn!(
                step_id = %step.id,
                failures,
                max_failures = policy.max_attempts,
                error = ?last_error.as_ref().map(ToString::to_string),
                "step attempt failed"
            );
            if !policy.allows_retry(failures) {
                return match last_error {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
            if let Err(e) = policy.recover(self.driver, failures).await {
                warn!(step_id = %step.id, error = %e, "recovery nudge failed");
            }
        }
    }

    async fn attempt(&self, step: &Step) -> Result<Attempt> {
        let snapshot = self.snapshotter.snapshot(self.driver).await?;
        let history = self.session.recent_history(PROMPT_HISTORY_ENTRIES);
        let prompt = prompts::execute_step(step, &snapshot, &history);
        debug!(step_id = %step.id, snapshot_chars = snapshot.len(), "asking model to ground step");

        let reply = self.session.call(&prompt).await?;
        let response: StepExecutionResponse = serde_json::from_value(reply)
            .map_err(|e| AgentError::InvalidModelReply(format!("step reply: {e}")))?;
        self.session
            .record_history(HistoryEntry::step(&step.id, summarize(&response)));

        if response.is_success() {
            return Ok(Attempt::Done(response));
        }
        if response.actions.is_empty() {
            return Ok(Attempt::NoProgress);
        }

        for action in &response.actions {
            ActionDispatcher::dispatch(self.driver, action).await?;
        }
        debug!(step_id = %step.id, count = response.actions.len(), "corrective actions dispatched");
        Ok(Attempt::Corrected)
    }
}

fn summarize(response: &StepExecutionResponse) -> String {
    let kinds: Vec<&str> = response.actions.iter().map(|a| a.kind.as_str()).collect();
    format!(
        "{:?}/{:?} actions=[{}]",
        response.response_status,
        response.step_status,
        kinds.join(",")
    )
    .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Recovery;
    use crate::testing::{RecordingDriver, ScriptedGateway};
    use std::sync::Arc;
    use std::time::Duration;

    const NO_PROGRESS: &str = r#"{"responseStatus": "failure", "stepStatus": "retry", "actions": []}"#;

    fn step() -> Step {
        serde_json::from_str(r#"{"id": "step_1", "title": "Press go"}"#).unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(3)).with_recovery(Recovery::ScrollBy(500))
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_failures_with_recovery_between() {
        let gateway = Arc::new(ScriptedGateway::always(NO_PROGRESS));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new();
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy());

        let started = tokio::time::Instant::now();
        let outcome = executor.execute(&step(), 2).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(gateway.calls(), 2);
        assert_eq!(driver.calls(), vec!["scroll 500"]);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn corrective_actions_do_not_count_as_failures() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Ok(r##"{"responseStatus": "failure", "actions": [{"type": "click", "selector": "#go"}]}"##.into()),
            Ok(r#"{"responseStatus": "success", "stepStatus": "completed", "actions": []}"#.into()),
        ]));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new();
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy());

        let response = executor.execute(&step(), 1).await.unwrap().unwrap();

        assert!(response.is_success());
        assert_eq!(driver.calls(), vec!["click #go"]);
        assert_eq!(gateway.calls(), 2);
        assert_eq!(session.status().failure_count, 0);
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_errors_are_retried_then_returned() {
        let gateway = Arc::new(ScriptedGateway::always(
            r##"{"responseStatus": "failure", "actions": [{"type": "click", "selector": "#missing"}]}"##,
        ));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new().without("#missing");
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy());

        let err = executor.execute(&step(), 2).await.unwrap_err();
        assert!(matches!(err, AgentError::ElementNotFound { .. }));
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_action_type_stops_immediately() {
        let gateway = Arc::new(ScriptedGateway::always(
            r#"{"responseStatus": "failure", "actions": [{"type": "teleport"}]}"#,
        ));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new();
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy());

        let err = executor.execute(&step(), 5).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownActionType(_)));
        assert_eq!(gateway.calls(), 1);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_failure_then_success() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Err(AgentError::Network("blip".into())),
            Ok(r#"{"responseStatus": "success"}"#.into()),
        ]));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new();
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy());

        let response = executor.execute(&step(), 2).await.unwrap();
        assert!(response.is_some());
        assert_eq!(driver.calls(), vec!["scroll 500"]);
        assert_eq!(session.status().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn action_round_cap_ends_the_step() {
        let gateway = Arc::new(ScriptedGateway::always(
            r#"{"responseStatus": "failure", "actions": [{"type": "scroll", "value": 100}]}"#,
        ));
        let session = AgentSession::new(gateway.clone(), 3);
        let driver = RecordingDriver::new();
        let snapshotter = DomSnapshotter::default();
        let executor = StepExecutor::new(&session, &driver, &snapshotter, policy())
            .with_max_action_rounds(Some(3));

        assert!(executor.execute(&step(), 1).await.unwrap().is_none());
        assert_eq!(gateway.calls(), 3);
    }
}
