//! The two phases of a harvest: scroll-and-collect until the monitor says
//! stop, then extract every collected item.

use std::slice;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{
    accessor::Accessor,
    config::{Locators, RunParams},
    error::{AccessError, SessionError},
    extract::{RecordExtractor, ReviewRecord},
    monitor::{Convergence, ConvergenceMonitor},
    progress::{HarvestEvent, ProgressSink},
    registry::{ItemIdentity, Registry},
    session::{BrowsingSession, Locator, scripts},
};

/// Result of the collection phase.
#[derive(Debug)]
pub struct Collection<H> {
    pub registry: Registry<H>,
    pub outcome: Convergence,
    pub cycles: usize,
    /// Candidates skipped because they went stale mid-cycle.
    pub stale: usize,
    /// Candidates skipped for any other per-item failure.
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<ReviewRecord>,
    pub stale: usize,
    pub failed: usize,
}

impl Extraction {
    pub fn omitted(&self) -> usize {
        self.stale + self.failed
    }
}

enum Merge {
    Added,
    Known,
    Skipped,
    Stale,
}

pub async fn collect<S: BrowsingSession>(
    session: &S,
    params: &RunParams,
    locators: &Locators,
    progress: &dyn ProgressSink,
) -> Collection<S::Handle> {
    let mut registry = Registry::new();
    let mut accessor = Accessor::new();
    let mut monitor =
        ConvergenceMonitor::new(params.target_count, params.poll_timeout(), Instant::now());
    let attribute = locators.identity_attribute.as_deref();

    let mut cycles = 0usize;
    let mut stale_total = 0usize;
    let mut skipped = 0usize;

    loop {
        cycles += 1;

        if let Err(e) = session.execute(scripts::SCROLL_TO_BOTTOM, &[]).await {
            warn!(cycle = cycles, error = %e, "scroll to bottom failed");
        }
        sleep(params.render_settle()).await;

        let candidates =
            match query_items(session, &locators.item, params.query_timeout()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(cycle = cycles, error = %e, "item query failed, stopping collection");
                    let state = monitor.query_failed();
                    progress.report(HarvestEvent::Cycle {
                        cycle: cycles,
                        collected: registry.len(),
                        added: 0,
                        stale: 0,
                        state,
                    });
                    break;
                }
            };

        let before = registry.len();
        let mut stale = 0usize;
        let mut sightings = identify_all(session, &candidates).await.map(Vec::into_iter);
        for handle in candidates {
            let sighting = sightings.as_mut().and_then(|p| p.next());
            match merge_candidate(
                session,
                &mut accessor,
                &mut registry,
                handle,
                sighting,
                attribute,
                params,
            )
            .await
            {
                Merge::Added | Merge::Known => {}
                Merge::Stale => stale += 1,
                Merge::Skipped => skipped += 1,
            }
        }
        stale_total += stale;

        let state = monitor.observe(registry.len(), Instant::now());
        progress.report(HarvestEvent::Cycle {
            cycle: cycles,
            collected: registry.len(),
            added: registry.len() - before,
            stale,
            state,
        });
        if state.is_terminal() {
            break;
        }
        debug!(
            cycle = cycles,
            idle_ms = monitor.idle_for(Instant::now()).as_millis() as u64,
            "no stop condition yet"
        );
        sleep(params.poll_interval()).await;
    }

    Collection {
        registry,
        outcome: monitor.state(),
        cycles,
        stale: stale_total,
        skipped,
    }
}

async fn query_items<S: BrowsingSession>(
    session: &S,
    locator: &Locator,
    timeout: std::time::Duration,
) -> Result<Vec<S::Handle>, SessionError> {
    session.wait_until_present(locator, timeout).await?;
    session.find_all(locator).await
}

/// Identifies every candidate in one command. `None` if any handle in the batch
/// has already gone stale, in which case candidates are identified one by one.
async fn identify_all<S: BrowsingSession>(session: &S, handles: &[S::Handle]) -> Option<Vec<Value>> {
    if handles.is_empty() {
        return Some(Vec::new());
    }
    match session.execute(scripts::IDENTIFY, handles).await {
        Ok(Value::Array(sightings)) if sightings.len() == handles.len() => Some(sightings),
        Ok(other) => {
            warn!(got = %other, "unexpected identify result, identifying candidates one by one");
            None
        }
        Err(e) => {
            debug!(error = %e, "batch identify failed, identifying candidates one by one");
            None
        }
    }
}

async fn identify<S: BrowsingSession>(
    session: &S,
    accessor: &mut Accessor,
    handle: &S::Handle,
    attribute: Option<&str>,
) -> Result<Option<ItemIdentity>, AccessError<SessionError>> {
    let sighting = accessor
        .safely("identify", session.execute(scripts::IDENTIFY, slice::from_ref(handle)))
        .await?;
    let sighting = match sighting {
        Value::Array(mut one) if !one.is_empty() => one.swap_remove(0),
        other => other,
    };
    Ok(ItemIdentity::from_sighting(sighting, attribute))
}

async fn merge_candidate<S: BrowsingSession>(
    session: &S,
    accessor: &mut Accessor,
    registry: &mut Registry<S::Handle>,
    handle: S::Handle,
    sighting: Option<Value>,
    attribute: Option<&str>,
    params: &RunParams,
) -> Merge {
    let identified = match sighting {
        Some(p) => Ok(ItemIdentity::from_sighting(p, attribute)),
        None => identify(session, accessor, &handle, attribute).await,
    };
    let identity = match identified {
        Ok(Some(id)) => id,
        Ok(None) => {
            debug!(?handle, "candidate has no identity yet");
            return Merge::Skipped;
        }
        Err(e) => return skip(e, "identify"),
    };
    if registry.contains(&identity) {
        registry.refresh(&identity, handle);
        return Merge::Known;
    }

    if let Err(e) = accessor
        .safely(
            "wait_visible",
            session.wait_until_visible(&handle, params.visibility_timeout()),
        )
        .await
    {
        return skip(e, "wait_visible");
    }
    if let Err(e) = accessor
        .safely(
            "scroll_into_view",
            session.execute(scripts::SCROLL_INTO_VIEW, slice::from_ref(&handle)),
        )
        .await
    {
        return skip(e, "scroll_into_view");
    }

    // Unkeyed text rendered lazily may only be complete once the item is in view.
    let identity = match identity {
        ItemIdentity::Content(_) => match identify(session, accessor, &handle, attribute).await {
            Ok(Some(settled)) => settled,
            Ok(None) => identity,
            Err(e) => return skip(e, "identify"),
        },
        attr => attr,
    };

    if registry.register(identity, handle) {
        Merge::Added
    } else {
        Merge::Known
    }
}

fn skip(e: AccessError<SessionError>, op: &str) -> Merge {
    match e {
        AccessError::Stale => Merge::Stale,
        AccessError::Failed(e) => {
            warn!(op, error = %e, "skipping candidate");
            Merge::Skipped
        }
    }
}

/// Extracts a record for every collected item, in first-seen order. Items that
/// went stale since collection, or whose fields cannot be read, are omitted.
pub async fn extract_all<S, E>(
    session: &S,
    extractor: &E,
    registry: &Registry<S::Handle>,
) -> Extraction
where
    S: BrowsingSession,
    E: RecordExtractor<S> + ?Sized,
{
    let mut accessor = Accessor::new();
    let mut out = Extraction::default();

    for (identity, handle) in registry.iter() {
        match accessor.safely("extract", extractor.extract(session, handle)).await {
            Ok(record) => out.records.push(record),
            Err(AccessError::Stale) => {
                warn!(%identity, "item went stale before extraction, omitted");
            }
            Err(AccessError::Failed(e)) => {
                warn!(%identity, error = %e, "extraction failed, omitted");
                out.failed += 1;
            }
        }
    }
    out.stale = accessor.take_stale();
    out
}
