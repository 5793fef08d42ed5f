use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// How to find elements in the live document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(s: impl Into<String>) -> Self {
        Locator::Css(s.into())
    }

    pub fn xpath(s: impl Into<String>) -> Self {
        Locator::XPath(s.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css `{s}`"),
            Locator::XPath(s) => write!(f, "xpath `{s}`"),
        }
    }
}

/// The remote browsing session the harvest drives. Handles are volatile: any
/// operation taking one may fail with [`SessionError::Stale`].
#[async_trait]
pub trait BrowsingSession: Send + Sync + 'static {
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;

    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// Runs `script` with `args` bound to `arguments[0..]`.
    async fn execute(&self, script: &str, args: &[Self::Handle]) -> Result<Value, SessionError>;

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self::Handle>, SessionError>;

    /// Waits until at least one element matches and returns the first one.
    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Handle, SessionError>;

    async fn wait_until_visible(
        &self,
        handle: &Self::Handle,
        timeout: Duration,
    ) -> Result<(), SessionError>;
}

/// Scripts the harvest runs through [`BrowsingSession::execute`].
pub mod scripts {
    pub const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

    pub const SCROLL_INTO_VIEW: &str = "arguments[0].scrollIntoView(true);";

    /// Attribute [`IDENTIFY`] stamps on every node it sees (`dataset.harvestKey`).
    pub const ASSIGNED_KEY: &str = "data-harvest-key";

    /// Stamps a random [`ASSIGNED_KEY`] on each argument that lacks one, then
    /// returns one `{ data: {data-* attributes}, text: innerText }` per argument.
    pub const IDENTIFY: &str = r#"
        const fresh = () => (window.crypto && typeof window.crypto.randomUUID === 'function')
            ? window.crypto.randomUUID()
            : Date.now().toString(36) + '-' + Math.random().toString(36).slice(2);
        return Array.from(arguments).map((el) => {
            if (!el.dataset.harvestKey) el.dataset.harvestKey = fresh();
            const data = {};
            for (const a of el.attributes) {
                if (a.name.startsWith('data-')) data[a.name] = a.value;
            }
            return { data: data, text: el.innerText };
        });
    "#;

    pub const INNER_TEXT: &str = "return arguments[0].innerText;";

    pub const INNER_HTML: &str = "return arguments[0].innerHTML;";

    /// Outer HTML of the closest review container (`arguments[0]` itself when
    /// the container selector is empty or does not match).
    pub fn container_html(container: &str) -> String {
        if container.is_empty() {
            return "return arguments[0].outerHTML;".to_string();
        }
        let sel = serde_json::Value::String(container.to_string());
        format!("const el = arguments[0]; return (el.closest({sel}) || el).outerHTML;")
    }
}
