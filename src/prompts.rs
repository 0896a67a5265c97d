use crate::dom::DomSnapshot;
use crate::types::{HistoryEntry, Step};

pub const PING_PROMPT: &str = r#"Health check. Reply with exactly this JSON object and nothing else: {"reply": "pong"}"#;

/// Prompt asking the model to break `request` into a step plan.
pub fn planning(request: &str) -> String {
    format!(
        r#"You plan browser automation tasks. Break the user's request into small, concrete steps a browser agent can carry out one at a time on a live web page.

User request: "{request}"

Guidelines:
1. Each step is one visible piece of progress (find a field, type a query, open a result...).
2. Describe what the agent should look for on the page, not how to write code.
3. State what success looks like for each step and what to try if it fails.

Reply with ONLY a JSON object of this shape, no markdown, no commentary:
{{
  "responseStatus": "success",
  "goal": "one sentence describing the end state",
  "steps": [
    {{
      "id": "step_1",
      "title": "Find the search bar",
      "action": "Locate the search input and click it",
      "expectedOutcome": "The search input has focus",
      "errorHandling": "Scroll down and look for a search icon"
    }}
  ],
  "dependencies": ["constraints between steps, if any"]
}}
If the request cannot be turned into browser steps, reply with {{"responseStatus": "failure", "goal": "<why>", "steps": []}}."#
    )
}

/// Prompt asking the model to ground `step` against the current page.
pub fn execute_step(step: &Step, snapshot: &DomSnapshot, history: &[HistoryEntry]) -> String {
    let history = if history.is_empty() {
        "(nothing yet)".to_string()
    } else {
        history
            .iter()
            .map(|h| match &h.step_id {
                Some(id) => format!("- [{}] {}: {}", h.timestamp.format("%H:%M:%S"), id, h.summary),
                None => format!("- [{}] {}", h.timestamp.format("%H:%M:%S"), h.summary),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r##"You control a real browser. Work on the current step using ONLY elements present in the page snapshot below.

Current step:
  id: {id}
  title: {title}
  action: {action}
  expected outcome: {expected}
  if it fails: {error_handling}

Recent history:
{history}

Visible page (filtered HTML, only elements inside the viewport):
{snapshot}

Available actions (CSS selectors must match the snapshot):
- {{"type":"click","selector":"#submit"}}
- {{"type":"fill","selector":"input[name='q']","value":"text to type"}}
- {{"type":"navigate","value":"https://..."}}
- {{"type":"wait","selector":"#results"}}
- {{"type":"press","selector":"input[name='q']","value":"Enter"}}
- {{"type":"scroll","value":"500"}}
- {{"type":"scrollToElement","selector":"#footer"}}
- {{"type":"extract","selector":"#price"}}

Reply with ONLY a JSON object:
{{
  "responseStatus": "success" when the actions below complete the step, otherwise "failure",
  "stepStatus": "completed" | "retry" | "failed",
  "allStepsCompleted": true only when the whole request is done,
  "stopAgent": true only when the request cannot be completed at all,
  "actions": [ ...actions to perform now, in order... ],
  "nextStepId": optional id of the step to run next,
  "errorHandling": "what you will try next if this does not work"
}}
If the element you need is not visible yet, reply "failure" with actions that bring it into view."##,
        id = step.id,
        title = step.label(),
        action = step.action,
        expected = step.expected_outcome,
        error_handling = step.error_handling,
        snapshot = if snapshot.is_empty() { "(empty page)" } else { snapshot.as_str() },
    )
}
