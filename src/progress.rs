use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::monitor::Convergence;

/// What a harvest reports while it runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarvestEvent {
    Started {
        url: String,
        /// `min(count announced by the page, target)`, when the page announces one.
        expected: Option<usize>,
        target: usize,
    },
    Cycle {
        cycle: usize,
        collected: usize,
        added: usize,
        stale: usize,
        state: Convergence,
    },
    Extracted {
        records: usize,
        omitted: usize,
    },
}

impl HarvestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HarvestEvent::Started { .. } => "start",
            HarvestEvent::Cycle { .. } => "progress",
            HarvestEvent::Extracted { .. } => "extracted",
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: HarvestEvent);
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::Started { url, expected, target } => {
                info!(%url, ?expected, target, "harvest started")
            }
            HarvestEvent::Cycle { cycle, collected, added, stale, state } => {
                info!(cycle, collected, added, stale, ?state, "poll cycle")
            }
            HarvestEvent::Extracted { records, omitted } => {
                info!(records, omitted, "extraction finished")
            }
        }
    }
}

/// Logs every event and forwards it to a channel, e.g. an SSE stream. A closed
/// receiver is ignored: the harvest keeps going without a listener.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<HarvestEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<HarvestEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: HarvestEvent) {
        LogProgress.report(event.clone());
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_forwards_and_survives_dropped_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let p = ChannelProgress::new(tx);
        p.report(HarvestEvent::Extracted { records: 3, omitted: 1 });
        assert_eq!(rx.try_recv().unwrap(), HarvestEvent::Extracted { records: 3, omitted: 1 });
        drop(rx);
        p.report(HarvestEvent::Extracted { records: 0, omitted: 0 });
    }

    #[test]
    fn events_serialize_with_tag() {
        let e = HarvestEvent::Cycle {
            cycle: 2,
            collected: 10,
            added: 4,
            stale: 1,
            state: Convergence::Polling,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "cycle");
        assert_eq!(v["state"], "polling");
        assert_eq!(e.name(), "progress");
    }
}
