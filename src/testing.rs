//! In-memory gateway and driver used by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::brain::ModelGateway;
use crate::error::{AgentError, Result};
use crate::hands::BrowserDriver;

/// Replays canned replies in order; the last one repeats when `sticky`.
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    sticky: Option<String>,
    yield_once: bool,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            sticky: None,
            yield_once: false,
        }
    }

    /// Replies with `reply` forever.
    pub fn always(reply: impl Into<String>) -> Self {
        let mut gateway = Self::new(Vec::new());
        gateway.sticky = Some(reply.into());
        gateway
    }

    /// Suspend once inside every call, so callers can observe the busy state.
    pub fn yielding(mut self) -> Self {
        self.yield_once = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if self.yield_once {
            tokio::task::yield_now().await;
        }
        let next = self.replies.lock().pop_front();
        match (next, &self.sticky) {
            (Some(reply), _) => reply,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(AgentError::Network("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Records every primitive call as a short line such as `click #go`.
pub struct RecordingDriver {
    calls: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
    page: Mutex<String>,
    closed: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        let page = json!({
            "viewport": {"width": 1280.0, "height": 800.0},
            "root": {"tag": "body", "children": [
                {"tag": "button", "attrs": {"id": "go"}, "children": [{"text": "Go"}]}
            ]}
        });
        Self {
            calls: Mutex::new(Vec::new()),
            missing: Mutex::new(HashSet::new()),
            page: Mutex::new(page.to_string()),
            closed: AtomicBool::new(false),
        }
    }

    /// Serve `capture` (a JSON string) to the snapshot script.
    pub fn with_page(self, capture: String) -> Self {
        *self.page.lock() = capture;
        self
    }

    /// Interactions on `selector` fail with `ElementNotFound`.
    pub fn without(self, selector: &str) -> Self {
        self.missing.lock().insert(selector.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, line: String) {
        self.calls.lock().push(line);
    }

    fn check(&self, selector: &str) -> Result<()> {
        if self.missing.lock().contains(selector) {
            return Err(AgentError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.record(format!("navigate {url}"));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.check(selector)?;
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        self.check(selector)?;
        self.record(format!("fill {selector} {text}"));
        Ok(())
    }

    async fn wait_for(&self, selector: &str) -> Result<()> {
        self.check(selector)?;
        self.record(format!("wait {selector}"));
        Ok(())
    }

    async fn press(&self, selector: Option<&str>, key: &str) -> Result<()> {
        match selector {
            Some(selector) => {
                self.check(selector)?;
                self.record(format!("press {selector} {key}"));
            }
            None => self.record(format!("press {key}")),
        }
        Ok(())
    }

    async fn scroll_by(&self, pixels: i64) -> Result<()> {
        self.record(format!("scroll {pixels}"));
        Ok(())
    }

    async fn scroll_to_element(&self, selector: &str) -> Result<()> {
        self.check(selector)?;
        self.record(format!("scrollToElement {selector}"));
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value> {
        Ok(Value::String(self.page.lock().clone()))
    }

    async fn url(&self) -> Result<String> {
        Ok("about:blank".to_string())
    }

    async fn title(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
