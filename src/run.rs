use anyhow::{Context, Result};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Instrument, info, info_span, warn};

use crate::{
    config::HarvestConfig,
    extract::{RecordExtractor, ReviewRecord},
    harvest::{collect, extract_all},
    monitor::Convergence,
    page,
    progress::{HarvestEvent, ProgressSink},
    session::BrowsingSession,
    sink::Sink,
};

pub const REVIEWS_LABEL: &str = "reviews";
pub const STATE_LABEL: &str = "state";

#[derive(Debug, Serialize)]
pub struct HarvestReport {
    pub target_id: String,
    pub url: String,
    pub outcome: Convergence,
    pub cycles: usize,
    pub announced: Option<usize>,
    pub collected: usize,
    pub stale_during_collection: usize,
    pub omitted: usize,
    pub count: usize,
    pub records: Vec<ReviewRecord>,
    pub reviews_location: String,
    pub state_location: Option<String>,
    /// RFC 3339, UTC.
    pub started_at: String,
}

/// Everything a single harvest needs; the session is borrowed for the run only.
pub struct Harvest<'a, S, E, K>
where
    S: BrowsingSession,
    E: RecordExtractor<S>,
    K: Sink,
{
    pub session: &'a S,
    pub extractor: &'a E,
    pub sink: &'a K,
    pub progress: &'a dyn ProgressSink,
    pub config: &'a HarvestConfig,
}

impl<S, E, K> Harvest<'_, S, E, K>
where
    S: BrowsingSession,
    E: RecordExtractor<S>,
    K: Sink,
{
    pub async fn run(&self, target_id: &str) -> Result<HarvestReport> {
        let started_at = OffsetDateTime::now_utc();
        let run_id = started_at.unix_timestamp_nanos() % 1_000_000_000;
        let span = info_span!("harvest", target_id, run_id = run_id as i64);
        self.run_inner(target_id, started_at).instrument(span).await
    }

    async fn run_inner(&self, target_id: &str, started_at: OffsetDateTime) -> Result<HarvestReport> {
        let cfg = self.config;
        let url = cfg.target.page_url(target_id)?;
        info!(%url, "navigating");
        self.session
            .navigate(url.as_str())
            .await
            .with_context(|| format!("cannot open {url}"))?;

        let announced =
            page::announced_total(self.session, &cfg.locators.total_count, cfg.run.query_timeout())
                .await;
        self.progress.report(HarvestEvent::Started {
            url: url.to_string(),
            expected: announced.map(|n| n.min(cfg.run.target_count)),
            target: cfg.run.target_count,
        });

        let collection = collect(self.session, &cfg.run, &cfg.locators, self.progress).await;
        info!(
            outcome = ?collection.outcome,
            collected = collection.registry.len(),
            cycles = collection.cycles,
            "collection finished"
        );

        let extraction = extract_all(self.session, self.extractor, &collection.registry).await;
        self.progress.report(HarvestEvent::Extracted {
            records: extraction.records.len(),
            omitted: extraction.omitted(),
        });

        let payload = serde_json::to_value(&extraction.records)?;
        let reviews_location = self
            .sink
            .store(REVIEWS_LABEL, target_id, started_at, &payload)
            .await
            .context("storing reviews failed")?;
        info!(location = %reviews_location, count = extraction.records.len(), "reviews stored");

        let state_location = self.store_embedded_state(target_id, started_at).await;

        Ok(HarvestReport {
            target_id: target_id.to_string(),
            url: url.to_string(),
            outcome: collection.outcome,
            cycles: collection.cycles,
            announced,
            collected: collection.registry.len(),
            stale_during_collection: collection.stale,
            omitted: extraction.omitted(),
            count: extraction.records.len(),
            records: extraction.records,
            reviews_location,
            state_location,
            started_at: started_at.format(&Rfc3339).unwrap_or_default(),
        })
    }

    async fn store_embedded_state(&self, target_id: &str, at: OffsetDateTime) -> Option<String> {
        let cfg = self.config;
        let blob =
            page::embedded_state(self.session, &cfg.locators.embedded_state, cfg.run.query_timeout())
                .await?;
        match self.sink.store(STATE_LABEL, target_id, at, &blob).await {
            Ok(loc) => Some(loc),
            Err(e) => {
                warn!(error = %e, "storing embedded state failed");
                None
            }
        }
    }
}
