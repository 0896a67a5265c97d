//! Drives one request end to end: plan once, then ground and execute each step.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::RunSettings;
use crate::dispatcher::ActionDispatcher;
use crate::dom::DomSnapshotter;
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventSender};
use crate::executor::StepExecutor;
use crate::hands::{BrowserDriver, BrowserManager};
use crate::planner::Planner;
use crate::session::AgentSession;
use crate::types::{ActionDescriptor, Plan, Step, StepExecutionResponse};

/// How the next step is picked after one finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvanceMode {
    /// Always the next step in plan order.
    #[default]
    Sequential,
    /// The step named by the reply's `nextStepId` when it exists, plan order otherwise.
    FollowNextStepId,
}

/// Each step may be visited this many times when id jumps are followed.
const VISITS_PER_STEP: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RunOutcome {
    /// Every step ran without an early exit.
    Completed,
    /// The model declared the whole request done at `step_index`.
    AllStepsCompleted { step_index: usize },
    Stopped {
        step_index: usize,
        step_title: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub plan: Plan,
    pub outcome: RunOutcome,
}

/// What `/plan_and_execute` hands back: the plan with its outcome, or an error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunResult {
    Finished(RunReport),
    Failed { error: String },
}

pub struct Orchestrator<'a> {
    session: &'a AgentSession,
    browser: &'a BrowserManager,
    settings: RunSettings,
    events: EventSender,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        session: &'a AgentSession,
        browser: &'a BrowserManager,
        settings: RunSettings,
        events: EventSender,
    ) -> Self {
        Self {
            session,
            browser,
            settings,
            events,
        }
    }

    pub async fn run(&self, request: &str) -> RunResult {
        info!(%request, "run started");
        self.emit(AgentEvent::Planning {
            request: request.to_string(),
        });

        let planner = Planner::new(self.session);
        let plan = match self
            .settings
            .plan_policy
            .run("plan", || planner.plan(request))
            .await
        {
            Ok(plan) => plan,
            Err(e) => return self.abort(e),
        };
        self.emit(AgentEvent::Planned {
            goal: plan.goal.clone(),
            steps: plan.steps.len(),
        });

        match self.execute_plan(&plan).await {
            Ok(outcome) => {
                info!(?outcome, "run finished");
                RunResult::Finished(RunReport { plan, outcome })
            }
            Err(e) => self.abort(e),
        }
    }

    async fn execute_plan(&self, plan: &Plan) -> Result<RunOutcome> {
        let driver = self.browser.launch().await?;
        let snapshotter = DomSnapshotter::new(self.settings.snapshot_max_chars);
        let policy = self.settings.step_policy.clone();
        let max_failures = policy.max_attempts;
        let executor = StepExecutor::new(self.session, driver.as_ref(), &snapshotter, policy)
            .with_max_action_rounds(self.settings.max_action_rounds);

        let budget = plan.steps.len() * VISITS_PER_STEP;
        let mut visits = 0;
        let mut steps_run = 0;
        let mut index = 0;

        while let Some(step) = plan.steps.get(index) {
            visits += 1;
            if visits > budget {
                return Ok(self.stopped(index, step, "step visit budget exhausted".into()));
            }
            self.emit(AgentEvent::StepStarted {
                index,
                id: step.id.clone(),
                title: step.label().to_string(),
            });

            let response = match executor.execute(step, max_failures).await {
                Ok(Some(response)) => response,
                Ok(None) => {
                    return Ok(self.stopped(index, step, "step ran out of attempts".into()));
                }
                Err(e) if e.is_retryable() => return Ok(self.stopped(index, step, e.to_string())),
                Err(e) => return Err(e),
            };

            match self.dispatch_all(driver.as_ref(), step, &response.actions).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => return Ok(self.stopped(index, step, e.to_string())),
                Err(e) => return Err(e),
            }
            steps_run += 1;
            self.emit(AgentEvent::StepFinished {
                index,
                id: step.id.clone(),
            });

            if response.all_steps_completed {
                if let Err(e) = self.browser.close().await {
                    warn!(error = %e, "failed to release browser context");
                }
                self.emit(AgentEvent::RunCompleted { steps_run });
                return Ok(RunOutcome::AllStepsCompleted { step_index: index });
            }
            if response.stop_agent {
                return Ok(self.stopped(index, step, "model asked to stop".into()));
            }

            let next = self.next_index(plan, index, &response);
            if next < plan.steps.len() {
                tokio::time::sleep(self.settings.step_delay).await;
            }
            index = next;
        }

        self.emit(AgentEvent::RunCompleted { steps_run });
        Ok(RunOutcome::Completed)
    }

    /// Run the actions of a successful reply, pausing between them.
    async fn dispatch_all(
        &self,
        driver: &dyn BrowserDriver,
        step: &Step,
        actions: &[ActionDescriptor],
    ) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        for (i, action) in actions.iter().enumerate() {
            if i > 0 {
                pause(self.settings.action_delay).await;
            }
            ActionDispatcher::dispatch(driver, action).await?;
        }
        self.emit(AgentEvent::ActionsDispatched {
            step_id: step.id.clone(),
            actions: actions.iter().map(|a| a.kind.clone()).collect(),
        });
        Ok(())
    }

    fn next_index(&self, plan: &Plan, index: usize, response: &StepExecutionResponse) -> usize {
        if self.settings.advance == AdvanceMode::FollowNextStepId {
            if let Some(id) = response.next_step_id.as_deref() {
                match plan.step_index(id) {
                    Some(next) => return next,
                    None => warn!(next_step_id = id, "unknown nextStepId, advancing in order"),
                }
            }
        }
        index + 1
    }

    fn stopped(&self, step_index: usize, step: &Step, reason: String) -> RunOutcome {
        warn!(step_index, step_id = %step.id, %reason, "run stopped");
        self.emit(AgentEvent::RunStopped {
            step_index,
            step_title: step.label().to_string(),
            reason: reason.clone(),
        });
        RunOutcome::Stopped {
            step_index,
            step_title: step.label().to_string(),
            reason,
        }
    }

    /// Terminal failure: the session is reset so the next request starts
    /// clean. `Busy` belongs to whoever holds the session, so it is left alone.
    fn abort(&self, e: AgentError) -> RunResult {
        error!(error = %e, "run aborted");
        if !matches!(e, AgentError::Busy) {
            self.session.reset();
        }
        self.emit(AgentEvent::RunFailed {
            error: e.to_string(),
        });
        RunResult::Failed {
            error: e.to_string(),
        }
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
