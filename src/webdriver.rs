//! [`BrowsingSession`] over a WebDriver endpoint (chromedriver by default).

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use fantoccini::{
    Client, ClientBuilder,
    elements::Element,
    error::CmdError,
};
use rand::{Rng, rng};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::{
    config::BrowserConfig,
    error::SessionError,
    session::{BrowsingSession, Locator},
};

const VISIBILITY_POLL_START: Duration = Duration::from_millis(100);
const VISIBILITY_POLL_MAX: Duration = Duration::from_millis(500);

pub struct WebDriverSession {
    client: Client,
}

impl WebDriverSession {
    pub async fn connect(cfg: &BrowserConfig) -> Result<Self> {
        if !driver_running(&cfg.webdriver_url).await {
            return Err(anyhow!(
                "no WebDriver listening at {} (start chromedriver, e.g. `chromedriver --port=9515`)",
                cfg.webdriver_url
            ));
        }

        debug!(url = %cfg.webdriver_url, headless = cfg.headless, "connecting to webdriver");
        let client = ClientBuilder::rustls()
            .context("loading native TLS roots")?
            .capabilities(chrome_capabilities(cfg))
            .connect(&cfg.webdriver_url)
            .await
            .with_context(|| format!("cannot open a session at {}", cfg.webdriver_url))?;
        info!("webdriver session opened");
        Ok(Self { client })
    }

    pub async fn close(self) -> Result<()> {
        self.client.close().await.context("closing webdriver session")
    }
}

async fn driver_running(url: &str) -> bool {
    let status_url = format!("{}/status", url.trim_end_matches('/'));
    match reqwest::get(&status_url).await {
        Ok(rsp) => rsp.status().is_success(),
        Err(_) => false,
    }
}

fn chrome_capabilities(cfg: &BrowserConfig) -> serde_json::Map<String, Value> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--user-agent={}", random_desktop_ua()),
    ];
    if cfg.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args.extend(cfg.extra_args.iter().cloned());

    let mut opts = serde_json::Map::new();
    opts.insert("args".to_string(), json!(args));
    if let Some(bin) = &cfg.binary {
        opts.insert("binary".to_string(), json!(bin.display().to_string()));
    }

    let mut caps = serde_json::Map::new();
    caps.insert("goog:chromeOptions".to_string(), Value::Object(opts));
    caps
}

fn random_desktop_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    ];
    UAS[rng().random_range(0..UAS.len())]
}

fn fantoccini_locator(l: &Locator) -> fantoccini::Locator<'_> {
    match l {
        Locator::Css(s) => fantoccini::Locator::Css(s),
        Locator::XPath(s) => fantoccini::Locator::XPath(s),
    }
}

/// Errors from commands that address a specific element: a vanished node
/// shows up either as a stale reference or as "no such element".
fn element_error(e: CmdError) -> SessionError {
    if e.is_stale_element_reference() || e.is_no_such_element() {
        return SessionError::Stale;
    }
    SessionError::Command(e.to_string())
}

fn page_error(e: CmdError, what: &Locator, timeout: Duration) -> SessionError {
    match e {
        CmdError::WaitTimeout => SessionError::Timeout(timeout, what.to_string()),
        other => SessionError::Command(other.to_string()),
    }
}

#[async_trait]
impl BrowsingSession for WebDriverSession {
    type Handle = Element;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| SessionError::Command(e.to_string()))
    }

    async fn execute(&self, script: &str, args: &[Element]) -> Result<Value, SessionError> {
        let args = args
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SessionError::Command(e.to_string()))?;
        self.client.execute(script, args).await.map_err(element_error)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Element>, SessionError> {
        self.client
            .find_all(fantoccini_locator(locator))
            .await
            .map_err(|e| SessionError::Command(e.to_string()))
    }

    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Element, SessionError> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(fantoccini_locator(locator))
            .await
            .map_err(|e| page_error(e, locator, timeout))
    }

    async fn wait_until_visible(&self, handle: &Element, timeout: Duration) -> Result<(), SessionError> {
        let start = Instant::now();
        let mut interval = VISIBILITY_POLL_START;
        loop {
            if handle.is_displayed().await.map_err(element_error)? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(SessionError::Timeout(timeout, "element visibility".to_string()));
            }
            sleep(interval).await;
            interval = (interval * 2).min(VISIBILITY_POLL_MAX);
        }
    }
}
