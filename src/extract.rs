use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    config::FieldSelectors,
    error::ExtractError,
    session::{BrowsingSession, scripts},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub author: String,
    pub rating: Option<f32>,
    pub text: String,
    pub published_at: Option<String>,
    pub owner_response: Option<String>,
}

/// Turns one collected handle into a record.
#[async_trait]
pub trait RecordExtractor<S: BrowsingSession>: Send + Sync {
    async fn extract(&self, session: &S, handle: &S::Handle) -> Result<ReviewRecord, ExtractError>;
}

/// Reads the review container's HTML in a single round-trip and parses the
/// fields locally, so a handle only has to stay alive for one command.
pub struct HtmlReviewExtractor {
    container_script: String,
    author: Selector,
    rating_meta: Selector,
    rating_star: Selector,
    text: Selector,
    date_meta: Selector,
    date: Selector,
    response: Selector,
}

fn selector(field: &'static str, css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("bad selector for {field} ({css}): {e}"))
}

impl HtmlReviewExtractor {
    pub fn new(fields: &FieldSelectors) -> anyhow::Result<Self> {
        Ok(Self {
            container_script: scripts::container_html(&fields.container),
            author: selector("author", &fields.author)?,
            rating_meta: selector("rating_meta", &fields.rating_meta)?,
            rating_star: selector("rating_star", &fields.rating_star)?,
            text: selector("text", &fields.text)?,
            date_meta: selector("date_meta", &fields.date_meta)?,
            date: selector("date", &fields.date)?,
            response: selector("response", &fields.response)?,
        })
    }

    pub fn parse(&self, html: &str) -> Result<ReviewRecord, ExtractError> {
        let doc = Html::parse_fragment(html);
        let root = doc.root_element();

        let author = first_text(&root, &self.author).ok_or(ExtractError::MissingField("author"))?;

        let rating = root
            .select(&self.rating_meta)
            .find_map(|m| m.value().attr("content"))
            .and_then(|c| c.trim().replace(',', ".").parse::<f32>().ok())
            .or_else(|| {
                let stars = root.select(&self.rating_star).count();
                (stars > 0).then_some(stars as f32)
            });

        let text = first_text(&root, &self.text).unwrap_or_default();

        let published_at = root
            .select(&self.date_meta)
            .find_map(|m| m.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .or_else(|| first_text(&root, &self.date));

        let owner_response = first_text(&root, &self.response);

        if text.is_empty() && rating.is_none() {
            warn!(%author, "review has neither text nor rating");
        }

        Ok(ReviewRecord {
            author,
            rating,
            text,
            published_at,
            owner_response,
        })
    }
}

fn first_text(scope: &ElementRef, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

#[async_trait]
impl<S: BrowsingSession> RecordExtractor<S> for HtmlReviewExtractor {
    async fn extract(&self, session: &S, handle: &S::Handle) -> Result<ReviewRecord, ExtractError> {
        let value = session
            .execute(&self.container_script, std::slice::from_ref(handle))
            .await?;
        let html = value
            .as_str()
            .ok_or_else(|| ExtractError::Script(format!("expected html string, got {value}")))?;
        self.parse(html)
    }
}
