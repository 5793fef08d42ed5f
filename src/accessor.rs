use std::future::Future;

use tracing::debug;

use crate::error::{AccessError, Staleness};

/// Runs remote-element operations and turns "element no longer in the
/// document" into [`AccessError::Stale`], which callers skip instead of failing.
#[derive(Debug, Default)]
pub struct Accessor {
    stale: usize,
}

impl Accessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn safely<T, E, F>(&mut self, what: &str, op: F) -> Result<T, AccessError<E>>
    where
        E: Staleness,
        F: Future<Output = Result<T, E>>,
    {
        match op.await {
            Ok(v) => Ok(v),
            Err(e) if e.is_stale() => {
                self.stale += 1;
                debug!(op = what, "stale element, skipping");
                Err(AccessError::Stale)
            }
            Err(e) => Err(AccessError::Failed(e)),
        }
    }

    /// Stale skips since creation or the last [`Accessor::take_stale`].
    pub fn stale(&self) -> usize {
        self.stale
    }

    pub fn take_stale(&mut self) -> usize {
        std::mem::take(&mut self.stale)
    }
}
