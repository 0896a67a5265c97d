use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Outcome flag the model attaches to every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// A multi-step plan produced once per user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(alias = "response_status", default = "default_success")]
    pub response_status: ResponseStatus,
    #[serde(default)]
    pub goal: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Plan {
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

fn default_success() -> ResponseStatus {
    ResponseStatus::Success
}

/// One unit of user-visible progress within a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub error_handling: String,
}

impl Step {
    /// Human label: the title when present, the action otherwise.
    pub fn label(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.action
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Retry,
    Failed,
}

/// The model's grounding of one step against the current page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionResponse {
    #[serde(alias = "response_status")]
    pub response_status: ResponseStatus,
    #[serde(alias = "step_status", default = "default_retry")]
    pub step_status: StepStatus,
    #[serde(alias = "all_steps_completed", default)]
    pub all_steps_completed: bool,
    #[serde(alias = "stop_agent", default)]
    pub stop_agent: bool,
    #[serde(alias = "playwrightActions", default)]
    pub actions: Vec<ActionDescriptor>,
    #[serde(alias = "next_step_id", default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    #[serde(alias = "error_handling", default)]
    pub error_handling: String,
}

impl StepExecutionResponse {
    pub fn is_success(&self) -> bool {
        self.response_status == ResponseStatus::Success
    }
}

fn default_retry() -> StepStatus {
    StepStatus::Retry
}

/// Untyped action as the model emits it. Validated into a
/// [`crate::dispatcher::Action`] right before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
}

impl ActionDescriptor {
    pub fn new(kind: &str, selector: Option<&str>, value: Option<&str>) -> Self {
        Self {
            kind: kind.to_string(),
            selector: selector.map(String::from),
            value: value.map(String::from),
        }
    }
}

/// Models emit `"value": 500` as often as `"value": "500"`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Plan,
    Step,
}

/// A timestamped record of what the session has seen so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub summary: String,
}

impl HistoryEntry {
    pub fn plan(summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: HistoryKind::Plan,
            step_id: None,
            summary: summary.into(),
        }
    }

    pub fn step(step_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: HistoryKind::Step,
            step_id: Some(step_id.into()),
            summary: summary.into(),
        }
    }
}

pub const MAX_HISTORY: usize = 50;
/// How many history entries are rendered into an execution prompt.
pub const PROMPT_HISTORY_ENTRIES: usize = 10;
pub const DOM_SNAPSHOT_MAX_CHARS: usize = 12_000;
