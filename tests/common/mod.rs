#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use review_harvest::{
    config::{HarvestConfig, Locators},
    error::{SessionError, SinkError},
    progress::{HarvestEvent, ProgressSink},
    session::{BrowsingSession, Locator, scripts},
    sink::Sink,
};
use serde_json::{Value, json};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub key: String,
    pub text: String,
    pub html: String,
    pub data: HashMap<String, String>,
    /// Listed by queries but gone by the time visibility is checked.
    pub vanishes_on_confirm: bool,
    /// Gone by the time it is scrolled into view.
    pub vanishes_on_scroll: bool,
    /// Every handle issued for it is stale on first use.
    pub stale_handle: bool,
    pub never_visible: bool,
    /// The node refuses the stamped key, so only its text identifies it.
    pub unkeyed: bool,
    /// Text rendered once the node has been scrolled into view.
    pub text_in_view: Option<String>,
}

impl FakeItem {
    pub fn review(key: &str) -> Self {
        Self {
            key: key.to_string(),
            text: format!("{key}\n5 stars\nreview text of {key}"),
            html: review_html(key, &format!("review text of {key}")),
            data: HashMap::new(),
            vanishes_on_confirm: false,
            vanishes_on_scroll: false,
            stale_handle: false,
            never_visible: false,
            unkeyed: false,
            text_in_view: None,
        }
    }

    /// A review whose container has no author, so extraction fails.
    pub fn anonymous(key: &str) -> Self {
        Self {
            html: format!(
                r#"<div class="business-review-view"><div class="business-review-view__body-text">{key}</div></div>"#
            ),
            ..Self::review(key)
        }
    }

    pub fn with_data(mut self, name: &str, value: &str) -> Self {
        self.data.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn vanishing(mut self) -> Self {
        self.vanishes_on_confirm = true;
        self
    }

    pub fn invisible(mut self) -> Self {
        self.never_visible = true;
        self
    }

    pub fn vanishing_on_scroll(mut self) -> Self {
        self.vanishes_on_scroll = true;
        self
    }

    pub fn stale_on_arrival(mut self) -> Self {
        self.stale_handle = true;
        self
    }

    pub fn unkeyed(mut self) -> Self {
        self.unkeyed = true;
        self
    }

    pub fn settling_in_view(mut self, text: &str) -> Self {
        self.text_in_view = Some(text.to_string());
        self
    }
}

pub fn review_html(author: &str, text: &str) -> String {
    format!(
        r#"<div class="business-review-view">
             <div class="business-review-view__info">
               <div class="business-review-view__author-name"><span itemprop="name">{author}</span></div>
               <meta itemprop="ratingValue" content="5">
               <div class="business-review-view__body-text">{text}</div>
             </div>
           </div>"#
    )
}

pub fn reviews(keys: &[&str]) -> Vec<FakeItem> {
    keys.iter().map(|k| FakeItem::review(k)).collect()
}

pub fn numbered(range: std::ops::Range<usize>) -> Vec<FakeItem> {
    range.map(|i| FakeItem::review(&format!("r{i}"))).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FakeHandle {
    Item { key: String, issue: u64 },
    Header,
    State,
}

/// What the page renders after each scroll. Frame `n` is shown after the
/// `n`-th scroll; the last frame repeats forever.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub frames: Vec<Vec<FakeItem>>,
    pub header: Option<String>,
    pub state: Option<String>,
    /// Item queries fail once this many scrolls have happened.
    pub unresponsive_after: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    scrolls: usize,
    issued: u64,
    navigated: Vec<String>,
    /// Stamped key per node, as the identify script leaves it in the DOM.
    stamps: HashMap<String, String>,
    in_view: HashSet<String>,
    identify_calls: usize,
}

impl Inner {
    fn sighting(&mut self, item: &FakeItem) -> Value {
        let mut data = item.data.clone();
        if !item.unkeyed {
            let next = format!("node-{}", self.stamps.len());
            let key = self.stamps.entry(item.key.clone()).or_insert(next);
            data.insert(scripts::ASSIGNED_KEY.to_string(), key.clone());
        }
        let text = match &item.text_in_view {
            Some(t) if self.in_view.contains(&item.key) => t.clone(),
            _ => item.text.clone(),
        };
        json!({ "data": data, "text": text })
    }
}

pub struct FakeSession {
    page: FakePage,
    locators: Locators,
    inner: Mutex<Inner>,
}

impl FakeSession {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            locators: Locators::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_locators(mut self, locators: Locators) -> Self {
        self.locators = locators;
        self
    }

    pub fn navigated(&self) -> Vec<String> {
        self.inner.lock().unwrap().navigated.clone()
    }

    pub fn scrolls(&self) -> usize {
        self.inner.lock().unwrap().scrolls
    }

    /// How many identify commands were sent, batched or not.
    pub fn identify_calls(&self) -> usize {
        self.inner.lock().unwrap().identify_calls
    }

    fn frame(&self) -> &[FakeItem] {
        let scrolls = self.inner.lock().unwrap().scrolls;
        if self.page.frames.is_empty() {
            return &[];
        }
        let i = scrolls.saturating_sub(1).min(self.page.frames.len() - 1);
        &self.page.frames[i]
    }

    fn unresponsive(&self) -> bool {
        let scrolls = self.inner.lock().unwrap().scrolls;
        self.page.unresponsive_after.is_some_and(|n| scrolls > n)
    }

    fn live(&self, handle: &FakeHandle) -> Result<FakeItem, SessionError> {
        match handle {
            FakeHandle::Item { key, .. } => self
                .frame()
                .iter()
                .find(|i| &i.key == key && !i.stale_handle)
                .cloned()
                .ok_or(SessionError::Stale),
            _ => Err(SessionError::Command("not an item".into())),
        }
    }

    fn issue(&self, items: &[FakeItem]) -> Vec<FakeHandle> {
        let mut inner = self.inner.lock().unwrap();
        items
            .iter()
            .map(|i| {
                inner.issued += 1;
                FakeHandle::Item {
                    key: i.key.clone(),
                    issue: inner.issued,
                }
            })
            .collect()
    }
}

#[async_trait]
impl BrowsingSession for FakeSession {
    type Handle = FakeHandle;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.inner.lock().unwrap().navigated.push(url.to_string());
        Ok(())
    }

    async fn execute(&self, script: &str, args: &[FakeHandle]) -> Result<Value, SessionError> {
        if script == scripts::SCROLL_TO_BOTTOM {
            self.inner.lock().unwrap().scrolls += 1;
            return Ok(Value::Null);
        }
        if script == scripts::IDENTIFY {
            self.inner.lock().unwrap().identify_calls += 1;
            let items = args
                .iter()
                .map(|h| self.live(h))
                .collect::<Result<Vec<_>, _>>()?;
            let mut inner = self.inner.lock().unwrap();
            let sightings: Vec<Value> = items.iter().map(|i| inner.sighting(i)).collect();
            return Ok(json!(sightings));
        }
        let handle = args
            .first()
            .ok_or_else(|| SessionError::Command("missing argument".into()))?;
        match (script, handle) {
            (scripts::INNER_TEXT, FakeHandle::Header) => {
                Ok(json!(self.page.header.clone().unwrap_or_default()))
            }
            (scripts::INNER_HTML, FakeHandle::State) => {
                Ok(json!(self.page.state.clone().unwrap_or_default()))
            }
            (scripts::SCROLL_INTO_VIEW, h) => {
                let item = self.live(h)?;
                if item.vanishes_on_scroll {
                    return Err(SessionError::Stale);
                }
                self.inner.lock().unwrap().in_view.insert(item.key);
                Ok(Value::Null)
            }
            (s, h) if s.contains("outerHTML") => self.live(h).map(|i| json!(i.html)),
            (s, _) => Err(SessionError::Command(format!("unexpected script {s}"))),
        }
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<FakeHandle>, SessionError> {
        if *locator != self.locators.item {
            return Err(SessionError::Command(format!("unknown locator {locator}")));
        }
        if self.unresponsive() {
            return Err(SessionError::Command("page not responding".into()));
        }
        let items = self.frame().to_vec();
        Ok(self.issue(&items))
    }

    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FakeHandle, SessionError> {
        let found = if *locator == self.locators.item {
            if self.unresponsive() {
                None
            } else {
                let items = self.frame().to_vec();
                self.issue(&items[..items.len().min(1)]).into_iter().next()
            }
        } else if *locator == self.locators.total_count {
            self.page.header.as_ref().map(|_| FakeHandle::Header)
        } else if *locator == self.locators.embedded_state {
            self.page.state.as_ref().map(|_| FakeHandle::State)
        } else {
            None
        };
        match found {
            Some(h) => Ok(h),
            None => {
                tokio::time::sleep(timeout).await;
                Err(SessionError::Timeout(timeout, locator.to_string()))
            }
        }
    }

    async fn wait_until_visible(
        &self,
        handle: &FakeHandle,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let item = self.live(handle)?;
        if item.vanishes_on_confirm {
            return Err(SessionError::Stale);
        }
        if item.never_visible {
            tokio::time::sleep(timeout).await;
            return Err(SessionError::Timeout(timeout, "element visibility".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<HarvestEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<HarvestEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(collected, added, stale)` of every poll cycle.
    pub fn cycles(&self) -> Vec<(usize, usize, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HarvestEvent::Cycle {
                    collected,
                    added,
                    stale,
                    ..
                } => Some((collected, added, stale)),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for Recorder {
    fn report(&self, event: HarvestEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub stored: Mutex<Vec<(String, String, Value)>>,
    pub failing: HashSet<String>,
}

impl MemorySink {
    pub fn failing(label: &str) -> Self {
        Self {
            failing: HashSet::from([label.to_string()]),
            ..Self::default()
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .map(|(l, _, _)| l.clone())
            .collect()
    }

    pub fn payload(&self, label: &str) -> Option<Value> {
        self.stored
            .lock()
            .unwrap()
            .iter()
            .find(|(l, _, _)| l == label)
            .map(|(_, _, v)| v.clone())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn store(
        &self,
        label: &str,
        target_id: &str,
        _at: OffsetDateTime,
        payload: &Value,
    ) -> Result<String, SinkError> {
        if self.failing.contains(label) {
            return Err(SinkError::Write {
                path: format!("memory/{label}").into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.stored
            .lock()
            .unwrap()
            .push((label.to_string(), target_id.to_string(), payload.clone()));
        Ok(format!("memory/{label}/{target_id}"))
    }
}

/// Defaults with short windows so paused-clock tests stay readable.
pub fn test_config(target_count: usize, poll_timeout_secs: u64) -> HarvestConfig {
    let mut cfg = HarvestConfig::default();
    cfg.run.target_count = target_count;
    cfg.run.poll_timeout_secs = poll_timeout_secs;
    cfg.run.query_timeout_secs = 2;
    cfg
}
