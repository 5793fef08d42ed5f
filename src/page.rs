//! Page-level reads around the collection loop. Both are best-effort: a
//! failure is logged and reported as `None`.

use std::{slice, time::Duration};

use serde_json::Value;
use tracing::{debug, warn};

use crate::session::{BrowsingSession, Locator, scripts};

/// Review count announced by the page header, e.g. "1 234 отзыва" → 1234.
pub async fn announced_total<S: BrowsingSession>(
    session: &S,
    locator: &Locator,
    timeout: Duration,
) -> Option<usize> {
    let text = match read(session, locator, timeout, scripts::INNER_TEXT).await {
        Ok(t) => t,
        Err(e) => {
            warn!(%locator, error = %e, "cannot read total count header");
            return None;
        }
    };
    let total = parse_count(&text);
    if total.is_none() {
        warn!(header = %text, "total count header has no number");
    }
    total
}

/// JSON embedded by the page in a script tag (the page's own state dump).
pub async fn embedded_state<S: BrowsingSession>(
    session: &S,
    locator: &Locator,
    timeout: Duration,
) -> Option<Value> {
    let raw = match read(session, locator, timeout, scripts::INNER_HTML).await {
        Ok(r) => r,
        Err(e) => {
            warn!(%locator, error = %e, "no embedded state on page");
            return None;
        }
    };
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v) => {
            debug!(bytes = raw.len(), "embedded state parsed");
            Some(v)
        }
        Err(e) => {
            warn!(error = %e, "embedded state is not valid json");
            None
        }
    }
}

async fn read<S: BrowsingSession>(
    session: &S,
    locator: &Locator,
    timeout: Duration,
    script: &str,
) -> anyhow::Result<String> {
    let handle = session.wait_until_present(locator, timeout).await?;
    let value = session.execute(script, slice::from_ref(&handle)).await?;
    match value {
        Value::String(s) => Ok(s),
        other => anyhow::bail!("expected a string, got {other}"),
    }
}

pub fn parse_count(text: &str) -> Option<usize> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
