//! Service configuration: defaults, then an optional TOML file, then
//! `HARVEST__SECTION__KEY` environment variables.

use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::Locator;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub target: TargetConfig,
    pub run: RunParams,
    pub locators: Locators,
    pub fields: FieldSelectors,
    pub output: OutputConfig,
}

impl HarvestConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("HARVEST_CONFIG").unwrap_or_else(|_| "harvest".to_string());
        Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("HARVEST").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub binary: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            binary: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Page URL with `{id}` standing in for the target id.
    pub url_template: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url_template: "https://yandex.ru/maps/org/yandeks/{id}/reviews/".to_string(),
        }
    }
}

impl TargetConfig {
    pub fn page_url(&self, target_id: &str) -> anyhow::Result<Url> {
        let id = target_id.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("invalid target id {target_id:?}");
        }
        let url = Url::parse(&self.url_template.replace("{id}", id))?;
        if url.host_str().is_none() {
            anyhow::bail!("url has no host");
        }
        Ok(url)
    }
}

/// Knobs of a single harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub target_count: usize,
    /// Seconds without a new item before giving up.
    pub poll_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Delay after each scroll-to-bottom.
    pub render_settle_ms: u64,
    /// Wait budget for the first item to show up in a query.
    pub query_timeout_secs: u64,
    pub visibility_timeout_secs: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            target_count: 1000,
            poll_timeout_secs: 30,
            poll_interval_ms: 500,
            render_settle_ms: 1000,
            query_timeout_secs: 10,
            visibility_timeout_secs: 2,
        }
    }
}

impl RunParams {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Locators {
    pub total_count: Locator,
    pub item: Locator,
    pub embedded_state: Locator,
    /// `data-*` attribute carrying a per-review id, when the page has one.
    /// Without it items are told apart by a key stamped on each node.
    pub identity_attribute: Option<String>,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            total_count: Locator::xpath(r#"//*[@class="card-section-header__title _wide"]"#),
            item: Locator::xpath(r#"//*[@class="business-review-view__info"]"#),
            embedded_state: Locator::css("script.state-view"),
            identity_attribute: None,
        }
    }
}

/// CSS selectors applied to one review's container HTML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSelectors {
    /// Closest ancestor of an item holding the whole review (owner reply included).
    pub container: String,
    pub author: String,
    /// `meta` element whose `content` is the numeric rating.
    pub rating_meta: String,
    /// Filled stars, counted when there is no rating meta.
    pub rating_star: String,
    pub text: String,
    /// `meta` element whose `content` is the publication date.
    pub date_meta: String,
    pub date: String,
    pub response: String,
}

impl Default for FieldSelectors {
    fn default() -> Self {
        Self {
            container: ".business-review-view".to_string(),
            author: ".business-review-view__author-name [itemprop=\"name\"], .business-review-view__author-name".to_string(),
            rating_meta: "meta[itemprop=\"ratingValue\"]".to_string(),
            rating_star: ".business-rating-badge-view__star._full".to_string(),
            text: ".business-review-view__body-text".to_string(),
            date_meta: "meta[itemprop=\"datePublished\"]".to_string(),
            date: ".business-review-view__date".to_string(),
            response: ".business-review-comment-content__bubble".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("json"),
        }
    }
}
