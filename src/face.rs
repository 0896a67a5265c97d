//! HTTP surface: launch, ping, plan-and-execute, status and a live event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use crate::config::RunSettings;
use crate::error::AgentError;
use crate::events::{AgentEvent, EventSender};
use crate::hands::BrowserManager;
use crate::orchestrator::Orchestrator;
use crate::prompts::PING_PROMPT;
use crate::session::AgentSession;

pub struct AppState {
    pub session: Arc<AgentSession>,
    pub browser: Arc<BrowserManager>,
    pub settings: RunSettings,
    pub events: EventSender,
    /// Held for the whole of a plan-and-execute run.
    run_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(
        session: Arc<AgentSession>,
        browser: Arc<BrowserManager>,
        settings: RunSettings,
        events: EventSender,
    ) -> Self {
        Self {
            session,
            browser,
            settings,
            events,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/launch", post(launch_handler))
        .route("/ping", post(ping_handler))
        .route("/plan_and_execute", post(plan_and_execute_handler))
        .route("/status", get(status_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, router(state)).await
}

/// Every failure leaves as `500 {"error": ...}`.
struct ApiError(String);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0 })),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Bodies are optional on every route, so parse leniently.
fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError(format!("invalid JSON body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct LaunchPayload {
    url: Option<String>,
    /// `false` starts a fresh browser on a throwaway profile.
    profile: Option<bool>,
}

async fn launch_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let payload: LaunchPayload = parse_body(&body)?;
    let driver = state
        .browser
        .launch_with_profile(payload.profile.unwrap_or(true))
        .await?;
    if let Some(url) = payload.url.filter(|u| !u.trim().is_empty()) {
        info!(%url, "navigating after launch");
        driver.navigate(&url).await?;
    }
    Ok(Json(json!({ "status": "Launched" })))
}

async fn ping_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let response = state.session.call(PING_PROMPT).await?;
    Ok(Json(json!({ "status": "success", "response": response })))
}

/// Field names callers have used for the request text.
const PROMPT_FIELDS: [&str; 4] = ["prompt", "userPrompt", "request", "command"];

fn extract_prompt(body: &Value) -> Option<String> {
    PROMPT_FIELDS
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
}

async fn plan_and_execute_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let payload: Value = parse_body(&body)?;
    let prompt = extract_prompt(&payload).ok_or_else(|| {
        ApiError(format!("request body needs one of: {}", PROMPT_FIELDS.join(", ")))
    })?;

    let _running = state
        .run_lock
        .try_lock()
        .map_err(|_| ApiError::from(AgentError::Busy))?;

    let orchestrator = Orchestrator::new(
        &state.session,
        &state.browser,
        state.settings.clone(),
        state.events.clone(),
    );
    let result = orchestrator.run(&prompt).await;
    Ok(Json(json!({ "status": "success", "response": result })))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let page = match state.browser.page_info().await {
        Ok(info) => json!(info),
        Err(AgentError::BrowserNotLaunched) => Value::Null,
        Err(e) => json!({ "error": e.to_string() }),
    };
    Json(json!({
        "browserRunning": state.browser.is_running(),
        "page": page,
        "session": state.session.status(),
    }))
}

fn to_sse_event(event: &AgentEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind()).data(data)
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
