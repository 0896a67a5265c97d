//! Process configuration, read once at start-up from flags and the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::orchestrator::AdvanceMode;
use crate::retry::{Recovery, RetryPolicy};

#[derive(Debug, Clone, Parser)]
#[command(name = "pilotweb", version, about = "Plan a request with a model and drive a browser through it")]
pub struct Config {
    /// Port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Model gateway endpoint.
    #[arg(long, env = "AGENT_URL", default_value = "http://localhost:11434/api/generate")]
    pub agent_url: String,

    /// Model identifier; also selects the gateway backend.
    #[arg(long, env = "MODEL_NAME", default_value = "llama3.2:latest")]
    pub model: String,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Browser profile directory. Defaults to a per-user data directory.
    #[arg(long, env = "USER_DATA_DIR")]
    pub user_data_dir: Option<PathBuf>,

    #[arg(long, env = "BROWSER_PATH")]
    pub browser_path: Option<PathBuf>,

    #[arg(long, env = "HEADLESS")]
    pub headless: bool,

    /// Browser channel: chrome, chrome-beta, chromium or msedge.
    #[arg(long, env = "CHANNEL", default_value = "chrome")]
    pub channel: String,

    /// Attach to an already running browser through its DevTools websocket URL.
    #[arg(long, env = "BROWSER_DEBUG_URL")]
    pub debug_url: Option<String>,

    /// Failed model calls tolerated before the session refuses further calls.
    #[arg(long, env = "SESSION_MAX_FAILURES", default_value_t = 3)]
    pub session_max_failures: u32,

    /// Consecutive non-terminal attempts allowed per plan step.
    #[arg(long, env = "STEP_MAX_FAILURES", default_value_t = 1)]
    pub step_max_failures: u32,

    #[arg(long, env = "PLAN_ATTEMPTS", default_value_t = 1)]
    pub plan_attempts: u32,

    #[arg(long, env = "STEP_DELAY_MS", default_value_t = 3000)]
    pub step_delay_ms: u64,

    #[arg(long, env = "ACTION_DELAY_MS", default_value_t = 3000)]
    pub action_delay_ms: u64,

    #[arg(long, env = "RECOVERY_DELAY_MS", default_value_t = 3000)]
    pub recovery_delay_ms: u64,

    #[arg(long, env = "RECOVERY_SCROLL_PX", default_value_t = 500)]
    pub recovery_scroll_px: i64,

    /// Multiplier applied to the recovery delay after every further failure.
    #[arg(long, env = "RETRY_BACKOFF", default_value_t = 1.0)]
    pub retry_backoff: f64,

    #[arg(long, env = "KEYSTROKE_DELAY_MS", default_value_t = 200)]
    pub keystroke_delay_ms: u64,

    #[arg(long, env = "ELEMENT_TIMEOUT_MS", default_value_t = 10_000)]
    pub element_timeout_ms: u64,

    #[arg(long, env = "NAVIGATION_TIMEOUT_MS", default_value_t = 30_000)]
    pub navigation_timeout_ms: u64,

    #[arg(long, env = "SNAPSHOT_MAX_CHARS", default_value_t = crate::types::DOM_SNAPSHOT_MAX_CHARS)]
    pub snapshot_max_chars: usize,

    /// Jump to the step named by `nextStepId` instead of always advancing in order.
    #[arg(long, env = "FOLLOW_NEXT_STEP_ID")]
    pub follow_next_step_id: bool,

    /// Cap on corrective action rounds per step. Unbounded when unset.
    #[arg(long, env = "MAX_ACTION_ROUNDS")]
    pub max_action_rounds: Option<u32>,
}

impl Config {
    pub fn browser(&self) -> BrowserConfig {
        BrowserConfig {
            user_data_dir: self.user_data_dir.clone().or_else(default_profile_dir),
            browser_path: self.browser_path.clone(),
            headless: self.headless,
            channel: self.channel.clone(),
            debug_url: self.debug_url.clone(),
            element_timeout: Duration::from_millis(self.element_timeout_ms),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            keystroke_delay: Duration::from_millis(self.keystroke_delay_ms),
            ..BrowserConfig::default()
        }
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.agent_url.clone(),
            model: self.model.clone(),
            api_key: self.llm_api_key.clone(),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            plan_policy: RetryPolicy::new(self.plan_attempts, Duration::from_millis(self.recovery_delay_ms))
                .with_backoff(self.retry_backoff),
            step_policy: RetryPolicy::new(self.step_max_failures, Duration::from_millis(self.recovery_delay_ms))
                .with_backoff(self.retry_backoff)
                .with_recovery(Recovery::ScrollBy(self.recovery_scroll_px)),
            step_delay: Duration::from_millis(self.step_delay_ms),
            action_delay: Duration::from_millis(self.action_delay_ms),
            advance: if self.follow_next_step_id {
                AdvanceMode::FollowNextStepId
            } else {
                AdvanceMode::Sequential
            },
            max_action_rounds: self.max_action_rounds,
            snapshot_max_chars: self.snapshot_max_chars,
        }
    }
}

fn default_profile_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("pilotweb").join("profile"))
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub user_data_dir: Option<PathBuf>,
    pub browser_path: Option<PathBuf>,
    pub headless: bool,
    pub channel: String,
    pub debug_url: Option<String>,
    pub element_timeout: Duration,
    pub navigation_timeout: Duration,
    pub keystroke_delay: Duration,
    pub window_size: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_data_dir: None,
            browser_path: None,
            headless: false,
            channel: "chrome".to_string(),
            debug_url: None,
            element_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
            keystroke_delay: Duration::from_millis(200),
            window_size: (1280, 800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Knobs that shape one orchestration run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub plan_policy: RetryPolicy,
    pub step_policy: RetryPolicy,
    pub step_delay: Duration,
    pub action_delay: Duration,
    pub advance: AdvanceMode,
    pub max_action_rounds: Option<u32>,
    pub snapshot_max_chars: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            plan_policy: RetryPolicy::once(),
            step_policy: RetryPolicy::new(1, Duration::from_secs(3))
                .with_recovery(Recovery::ScrollBy(500)),
            step_delay: Duration::from_secs(3),
            action_delay: Duration::from_secs(3),
            advance: AdvanceMode::Sequential,
            max_action_rounds: None,
            snapshot_max_chars: crate::types::DOM_SNAPSHOT_MAX_CHARS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "pilotweb",
            "--model",
            "gemini-2.5-flash",
            "--step-max-failures",
            "2",
            "--follow-next-step-id",
            "--recovery-scroll-px",
            "800",
        ]);
        assert_eq!(config.model, "gemini-2.5-flash");
        let settings = config.run_settings();
        assert_eq!(settings.step_policy.max_attempts, 2);
        assert_eq!(settings.step_policy.recovery, Recovery::ScrollBy(800));
        assert_eq!(settings.advance, AdvanceMode::FollowNextStepId);
    }

    #[test]
    fn browser_config_carries_timeouts() {
        let config = Config::parse_from([
            "pilotweb",
            "--element-timeout-ms",
            "2500",
            "--user-data-dir",
            "/tmp/profile",
        ]);
        let browser = config.browser();
        assert_eq!(browser.element_timeout, Duration::from_millis(2500));
        assert_eq!(browser.user_data_dir, Some(PathBuf::from("/tmp/profile")));
        assert_eq!(browser.window_size, (1280, 800));
    }
}
