//! Per-process agent session: status, counters and a bounded history.
//!
//! Every model call goes through [`AgentSession::call`], which admits at most
//! one outstanding request. A second caller gets [`AgentError::Busy`] right
//! away instead of queueing.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::brain::{ModelGateway, parse_reply};
use crate::error::{AgentError, Result};
use crate::types::{HistoryEntry, MAX_HISTORY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Busy,
    Error,
}

/// Read-only view of the session returned by [`AgentSession::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub status: Status,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub history_len: usize,
    pub gateway: String,
}

#[derive(Debug)]
struct SessionState {
    status: Status,
    failure_count: u32,
    success_count: u32,
    last_error: Option<String>,
    history: VecDeque<HistoryEntry>,
    /// Set while a `CallGuard` is live; survives resets.
    in_flight: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: Status::Idle,
            failure_count: 0,
            success_count: 0,
            last_error: None,
            history: VecDeque::with_capacity(MAX_HISTORY),
            in_flight: false,
        }
    }

    /// Status to show when no error is being reported.
    fn settled_status(&self) -> Status {
        if self.in_flight { Status::Busy } else { Status::Idle }
    }

    fn record_failure(&mut self, message: String) {
        self.in_flight = false;
        self.status = Status::Error;
        self.failure_count += 1;
        self.last_error = Some(message);
    }
}

pub struct AgentSession {
    gateway: Arc<dyn ModelGateway>,
    max_failures: u32,
    state: Mutex<SessionState>,
}

impl AgentSession {
    pub fn new(gateway: Arc<dyn ModelGateway>, max_failures: u32) -> Self {
        Self {
            gateway,
            max_failures,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// One round trip to the model gateway, decoded as JSON.
    pub async fn call(&self, prompt: &str) -> Result<Value> {
        let guard = self.begin()?;

        let outcome = match self.gateway.generate(prompt).await {
            Ok(text) => parse_reply(&text),
            Err(e) => Err(e),
        };

        guard.finish(outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        outcome
    }

    fn begin(&self) -> Result<CallGuard<'_>> {
        let mut state = self.state.lock();
        if state.in_flight {
            return Err(AgentError::Busy);
        }
        if state.failure_count >= self.max_failures {
            return Err(AgentError::Exhausted {
                failures: state.failure_count,
                ceiling: self.max_failures,
            });
        }
        state.status = Status::Busy;
        state.in_flight = true;
        debug!(gateway = self.gateway.name(), "model call started");
        Ok(CallGuard {
            session: self,
            finished: false,
        })
    }

    /// Clear counters, error and history. A call still in flight keeps the
    /// session busy until it settles.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let in_flight = state.in_flight;
        *state = SessionState::new();
        state.in_flight = in_flight;
        state.status = state.settled_status();
    }

    /// Clear the failure count and error only; successes and history survive.
    pub fn reset_failures(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        state.last_error = None;
        state.status = state.settled_status();
    }

    pub fn record_history(&self, entry: HistoryEntry) {
        let mut state = self.state.lock();
        while state.history.len() >= MAX_HISTORY {
            state.history.pop_front();
        }
        state.history.push_back(entry);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<HistoryEntry> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            status: state.status,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_error: state.last_error.clone(),
            history_len: state.history.len(),
            gateway: self.gateway.name().to_string(),
        }
    }
}

/// Settles the busy flag even if the caller's future is dropped mid-call.
struct CallGuard<'a> {
    session: &'a AgentSession,
    finished: bool,
}

impl CallGuard<'_> {
    fn finish(mut self, outcome: std::result::Result<(), String>) {
        let mut state = self.session.state.lock();
        match outcome {
            Ok(()) => {
                state.in_flight = false;
                state.status = Status::Idle;
                state.success_count += 1;
                state.last_error = None;
            }
            Err(message) => {
                warn!(error = %message, "model call failed");
                state.record_failure(message);
            }
        }
        self.finished = true;
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session
                .state
                .lock()
                .record_failure("model call was cancelled".to_string());
        }
    }
}
