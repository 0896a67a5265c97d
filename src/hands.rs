//! Browser driver: the primitives the agent acts through, and the manager
//! that owns the single browser context for the process.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::error::{AgentError, Result};

/// Primitive page operations. One call per action, nothing more.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn click(&self, selector: &str) -> Result<()>;
    /// Replace the value of an input by typing `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<()>;
    async fn wait_for(&self, selector: &str) -> Result<()>;
    /// Press `key`, on `selector` when given, otherwise on the focused element.
    async fn press(&self, selector: Option<&str>, key: &str) -> Result<()>;
    async fn scroll_by(&self, pixels: i64) -> Result<()>;
    async fn scroll_to_element(&self, selector: &str) -> Result<()>;
    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value>;
    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    async fn close(&self) -> Result<()>;
}

/// headless_chrome-backed driver. Its API is blocking, so every call hops
/// onto the blocking pool.
pub struct ChromeDriver {
    browser: Mutex<Option<Browser>>,
    tab: Arc<Tab>,
    config: BrowserConfig,
}

impl ChromeDriver {
    /// Attach to `config.debug_url` when set, otherwise launch a browser on
    /// the persistent profile. Blocking.
    pub fn launch(config: BrowserConfig) -> Result<Self> {
        let browser = match &config.debug_url {
            Some(url) => {
                info!(%url, "attaching to running browser");
                Browser::connect(url.clone())
                    .map_err(|e| AgentError::BrowserLaunchFailure(format!("attach to {url}: {e}")))?
            }
            None => launch_browser(&config)?,
        };

        let existing = {
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| AgentError::BrowserLaunchFailure("tab list lock poisoned".into()))?;
            tabs.first().cloned()
        };
        let tab = match existing {
            Some(tab) => {
                debug!("using existing tab");
                tab
            }
            None => browser
                .new_tab()
                .map_err(|e| AgentError::BrowserLaunchFailure(format!("open tab: {e}")))?,
        };
        tab.set_default_timeout(config.element_timeout);

        info!("browser ready");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            tab,
            config,
        })
    }

    async fn on_tab<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Tab, &BrowserConfig) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || op(&tab, &config))
            .await
            .map_err(|e| AgentError::Driver(format!("browser task panicked: {e}")))?
    }
}

fn launch_browser(config: &BrowserConfig) -> Result<Browser> {
    if let Some(dir) = &config.user_data_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            AgentError::BrowserLaunchFailure(format!("create profile dir {}: {e}", dir.display()))
        })?;
    }

    let path = config
        .browser_path
        .clone()
        .or_else(|| find_browser(&config.channel));
    info!(
        channel = %config.channel,
        path = ?path,
        headless = config.headless,
        "launching browser"
    );

    let options = LaunchOptions {
        headless: config.headless,
        path,
        user_data_dir: config.user_data_dir.clone(),
        window_size: Some(config.window_size),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        // The server idles between requests; keep the connection alive.
        idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
        ..Default::default()
    };

    Browser::new(options).map_err(|e| AgentError::BrowserLaunchFailure(e.to_string()))
}

/// Well-known install locations for a browser channel.
fn channel_candidates(channel: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = match channel {
        "chrome-beta" => vec![
            "/usr/bin/google-chrome-beta".into(),
            "/Applications/Google Chrome Beta.app/Contents/MacOS/Google Chrome Beta".into(),
            r"C:\Program Files\Google\Chrome Beta\Application\chrome.exe".into(),
        ],
        "msedge" => vec![
            "/usr/bin/microsoft-edge".into(),
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge".into(),
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe".into(),
        ],
        "chromium" => vec![
            "/usr/bin/chromium".into(),
            "/usr/bin/chromium-browser".into(),
            "/Applications/Chromium.app/Contents/MacOS/Chromium".into(),
        ],
        _ => vec![
            "/usr/bin/google-chrome".into(),
            "/usr/bin/google-chrome-stable".into(),
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into(),
            r"C:\Program Files\Google\Chrome\Application\chrome.exe".into(),
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe".into(),
        ],
    };
    if let Some(local) = dirs::data_local_dir() {
        paths.push(local.join("Google").join("Chrome").join("Application").join("chrome.exe"));
    }
    paths
}

/// First installed executable for `channel`; `None` lets headless_chrome search.
pub fn find_browser(channel: &str) -> Option<PathBuf> {
    channel_candidates(channel).into_iter().find(|p| p.exists())
}

/// A JS string literal for `text`.
fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn find<'a>(tab: &'a Tab, selector: &str, timeout: Duration) -> Result<headless_chrome::Element<'a>> {
    tab.wait_for_element_with_custom_timeout(selector, timeout)
        .map_err(|_| AgentError::ElementNotFound {
            selector: selector.to_string(),
        })
}

fn driver_err(what: &str) -> impl FnOnce(anyhow::Error) -> AgentError + '_ {
    move |e| AgentError::Driver(format!("{what}: {e}"))
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.on_tab(move |tab, config| {
            tab.set_default_timeout(config.navigation_timeout);
            let outcome = tab
                .navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| {
                    if e.to_string().to_lowercase().contains("never came") {
                        AgentError::ActionTimeout {
                            what: format!("navigation to {url}"),
                            timeout_ms: config.navigation_timeout.as_millis() as u64,
                        }
                    } else {
                        AgentError::Driver(format!("navigate to {url}: {e}"))
                    }
                });
            tab.set_default_timeout(config.element_timeout);
            outcome
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab, config| {
            find(tab, &selector, config.element_timeout)?
                .click()
                .map_err(driver_err("click"))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.on_tab(move |tab, config| {
            find(tab, &selector, config.element_timeout)?
                .click()
                .map_err(driver_err("focus input"))?;
            tab.evaluate(
                &format!("document.querySelector({}).value = ''", js_string(&selector)),
                false,
            )
            .map_err(driver_err("clear input"))?;
            let mut buf = [0u8; 4];
            for ch in text.chars() {
                tab.type_str(ch.encode_utf8(&mut buf))
                    .map_err(driver_err("type"))?;
                std::thread::sleep(config.keystroke_delay);
            }
            Ok(())
        })
        .await
    }

    async fn wait_for(&self, selector: &str) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab, config| {
            tab.wait_for_element_with_custom_timeout(&selector, config.element_timeout)
                .map(|_| ())
                .map_err(|_| AgentError::ActionTimeout {
                    what: selector.clone(),
                    timeout_ms: config.element_timeout.as_millis() as u64,
                })
        })
        .await
    }

    async fn press(&self, selector: Option<&str>, key: &str) -> Result<()> {
        let selector = selector.map(String::from);
        let key = key.to_string();
        self.on_tab(move |tab, config| {
            if let Some(selector) = &selector {
                find(tab, selector, config.element_timeout)?
                    .focus()
                    .map_err(driver_err("focus"))?;
            }
            tab.press_key(&key).map_err(driver_err("press key"))?;
            Ok(())
        })
        .await
    }

    async fn scroll_by(&self, pixels: i64) -> Result<()> {
        self.on_tab(move |tab, _| {
            tab.evaluate(&format!("window.scrollBy(0, {pixels})"), false)
                .map_err(driver_err("scroll"))?;
            Ok(())
        })
        .await
    }

    async fn scroll_to_element(&self, selector: &str) -> Result<()> {
        let selector = selector.to_string();
        self.on_tab(move |tab, config| {
            find(tab, &selector, config.element_timeout)?
                .scroll_into_view()
                .map_err(driver_err("scroll into view"))?;
            Ok(())
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let script = script.to_string();
        self.on_tab(move |tab, _| {
            let result = tab.evaluate(&script, false).map_err(driver_err("evaluate"))?;
            Ok(result.value.unwrap_or(Value::Null))
        })
        .await
    }

    async fn url(&self) -> Result<String> {
        self.on_tab(|tab, _| Ok(tab.get_url())).await
    }

    async fn title(&self) -> Result<String> {
        self.on_tab(|tab, _| tab.get_title().map_err(driver_err("title")))
            .await
    }

    async fn close(&self) -> Result<()> {
        let browser = self.browser.lock().take();
        self.on_tab(move |tab, _| {
            if let Err(e) = tab.close(false) {
                warn!(error = %e, "closing tab failed");
            }
            drop(browser);
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
}

/// Owns the one browser context of the process.
pub struct BrowserManager {
    config: BrowserConfig,
    driver: Mutex<Option<Arc<dyn BrowserDriver>>>,
    launching: tokio::sync::Mutex<()>,
}

impl BrowserManager {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            driver: Mutex::new(None),
            launching: tokio::sync::Mutex::new(()),
        }
    }

    /// A manager whose context is already open on `driver`.
    pub fn with_driver(config: BrowserConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        let manager = Self::new(config);
        *manager.driver.lock() = Some(driver);
        manager
    }

    /// Launch the browser on the persistent profile, or return the running one.
    pub async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        self.launch_with_profile(true).await
    }

    /// Like [`launch`](Self::launch); with `use_profile` off a new browser
    /// starts on a throwaway profile that is deleted when it exits.
    pub async fn launch_with_profile(&self, use_profile: bool) -> Result<Arc<dyn BrowserDriver>> {
        let _launching = self.launching.lock().await;
        if let Some(driver) = self.driver.lock().clone() {
            if !use_profile {
                debug!("browser already running, reusing its profile");
            }
            return Ok(driver);
        }

        let config = self.launch_config(use_profile);
        let chrome = tokio::task::spawn_blocking(move || ChromeDriver::launch(config))
            .await
            .map_err(|e| AgentError::BrowserLaunchFailure(format!("launch task panicked: {e}")))??;

        let driver: Arc<dyn BrowserDriver> = Arc::new(chrome);
        *self.driver.lock() = Some(driver.clone());
        Ok(driver)
    }

    fn launch_config(&self, use_profile: bool) -> BrowserConfig {
        let mut config = self.config.clone();
        if !use_profile {
            // headless_chrome falls back to a temporary directory.
            config.user_data_dir = None;
        }
        config
    }

    /// Title and URL of the open page.
    pub async fn page_info(&self) -> Result<PageInfo> {
        let driver = self.page()?;
        Ok(PageInfo {
            title: driver.title().await?,
            url: driver.url().await?,
        })
    }

    pub fn page(&self) -> Result<Arc<dyn BrowserDriver>> {
        self.driver.lock().clone().ok_or(AgentError::BrowserNotLaunched)
    }

    /// Release the browser context. A no-op when nothing is running.
    pub async fn close(&self) -> Result<()> {
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.close().await?;
            info!("browser context released");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_some()
    }
}
