use serde::Serialize;
use tokio::sync::broadcast;

/// Progress of a run, fanned out to `/events` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    Planning {
        request: String,
    },
    Planned {
        goal: String,
        steps: usize,
    },
    StepStarted {
        index: usize,
        id: String,
        title: String,
    },
    ActionsDispatched {
        step_id: String,
        actions: Vec<String>,
    },
    StepFinished {
        index: usize,
        id: String,
    },
    RunCompleted {
        steps_run: usize,
    },
    RunStopped {
        step_index: usize,
        step_title: String,
        reason: String,
    },
    RunFailed {
        error: String,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Planning { .. } => "planning",
            AgentEvent::Planned { .. } => "planned",
            AgentEvent::StepStarted { .. } => "step_started",
            AgentEvent::ActionsDispatched { .. } => "actions_dispatched",
            AgentEvent::StepFinished { .. } => "step_finished",
            AgentEvent::RunCompleted { .. } => "run_completed",
            AgentEvent::RunStopped { .. } => "run_stopped",
            AgentEvent::RunFailed { .. } => "run_failed",
        }
    }
}

pub type EventSender = broadcast::Sender<AgentEvent>;

pub fn channel() -> EventSender {
    broadcast::channel(64).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_tag() {
        let event = AgentEvent::RunStopped {
            step_index: 1,
            step_title: "Search".into(),
            reason: "gave up".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "run_stopped");
        assert_eq!(json["stepIndex"], 1);
        assert_eq!(event.kind(), "run_stopped");
    }
}
