//! Maps action descriptors onto browser driver calls.

use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::hands::BrowserDriver;
use crate::types::ActionDescriptor;

/// A validated action, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click { selector: String },
    Fill { selector: String, value: String },
    Navigate { url: String },
    Wait { selector: String },
    Press { selector: Option<String>, key: String },
    Scroll { pixels: i64 },
    ScrollToElement { selector: String },
    /// Reserved for data-capture steps; dispatching it does nothing.
    Extract { selector: Option<String> },
}

/// Scroll distance used when a scroll action carries no usable value.
const DEFAULT_SCROLL_PX: i64 = 500;

impl TryFrom<&ActionDescriptor> for Action {
    type Error = AgentError;

    fn try_from(action: &ActionDescriptor) -> Result<Self> {
        let selector = || required(action, "selector", action.selector.as_deref());
        let value = || required(action, "value", action.value.as_deref());

        Ok(match action.kind.as_str() {
            "click" => Action::Click {
                selector: selector()?,
            },
            "fill" => Action::Fill {
                selector: selector()?,
                value: value()?,
            },
            "navigate" => Action::Navigate { url: value()? },
            "wait" => Action::Wait {
                selector: selector()?,
            },
            "press" => Action::Press {
                selector: action.selector.clone().filter(|s| !s.trim().is_empty()),
                key: value()?,
            },
            "scroll" => Action::Scroll {
                pixels: action
                    .value
                    .as_deref()
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .map(|v| v as i64)
                    .unwrap_or(DEFAULT_SCROLL_PX),
            },
            "scrollToElement" => Action::ScrollToElement {
                selector: selector()?,
            },
            "extract" => Action::Extract {
                selector: action.selector.clone(),
            },
            other => return Err(AgentError::UnknownActionType(other.to_string())),
        })
    }
}

fn required(action: &ActionDescriptor, field: &str, value: Option<&str>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(AgentError::InvalidModelReply(format!(
            "{} action is missing `{}`",
            action.kind, field
        ))),
    }
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Fill { .. } => "fill",
            Action::Navigate { .. } => "navigate",
            Action::Wait { .. } => "wait",
            Action::Press { .. } => "press",
            Action::Scroll { .. } => "scroll",
            Action::ScrollToElement { .. } => "scrollToElement",
            Action::Extract { .. } => "extract",
        }
    }
}

/// Stateless: one descriptor in, one driver call out.
pub struct ActionDispatcher;

impl ActionDispatcher {
    pub async fn dispatch(driver: &dyn BrowserDriver, descriptor: &ActionDescriptor) -> Result<()> {
        let action = Action::try_from(descriptor)?;
        debug!(action = action.name(), ?descriptor, "dispatching");

        match &action {
            Action::Click { selector } => driver.click(selector).await,
            Action::Fill { selector, value } => driver.fill(selector, value).await,
            Action::Navigate { url } => driver.navigate(url).await,
            Action::Wait { selector } => driver.wait_for(selector).await,
            Action::Press { selector, key } => driver.press(selector.as_deref(), key).await,
            Action::Scroll { pixels } => driver.scroll_by(*pixels).await,
            Action::ScrollToElement { selector } => driver.scroll_to_element(selector).await,
            Action::Extract { selector } => {
                info!(?selector, "extract requested; nothing to capture yet");
                Ok(())
            }
        }
    }
}
