use tracing::info;

use crate::error::{AgentError, Result};
use crate::prompts;
use crate::session::AgentSession;
use crate::types::{HistoryEntry, Plan, ResponseStatus};

/// Turns a user request into a [`Plan`] with a single model call. Retrying is
/// the caller's business.
pub struct Planner<'a> {
    session: &'a AgentSession,
}

impl<'a> Planner<'a> {
    pub fn new(session: &'a AgentSession) -> Self {
        Self { session }
    }

    pub async fn plan(&self, request: &str) -> Result<Plan> {
        let reply = self.session.call(&prompts::planning(request)).await?;
        let plan = validate(reply)?;

        info!(goal = %plan.goal, steps = plan.steps.len(), "plan ready");
        self.session.record_history(HistoryEntry::plan(format!(
            "planned {} steps: {}",
            plan.steps.len(),
            plan.goal
        )));
        Ok(plan)
    }
}

fn validate(reply: serde_json::Value) -> Result<Plan> {
    if !reply.is_object() {
        return Err(AgentError::InvalidPlan("reply is not a JSON object".into()));
    }
    match reply.get("steps") {
        None => return Err(AgentError::InvalidPlan("missing `steps`".into())),
        Some(steps) if !steps.is_array() => {
            return Err(AgentError::InvalidPlan("`steps` is not an array".into()));
        }
        Some(_) => {}
    }

    let plan: Plan =
        serde_json::from_value(reply).map_err(|e| AgentError::InvalidPlan(e.to_string()))?;
    if plan.response_status != ResponseStatus::Success {
        return Err(AgentError::InvalidPlan(format!(
            "model declined to plan: {}",
            plan.goal
        )));
    }
    Ok(plan)
}
