use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Failure of a single browsing-session command.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The handle no longer points at a node in the live document.
    #[error("stale element reference")]
    Stale,
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    #[error("webdriver command failed: {0}")]
    Command(String),
}

/// Anything an accessor-wrapped operation can fail with. Only the stale case is
/// recovered locally; everything else is handed back to the caller.
pub trait Staleness {
    fn is_stale(&self) -> bool;
}

impl Staleness for SessionError {
    fn is_stale(&self) -> bool {
        matches!(self, SessionError::Stale)
    }
}

#[derive(Debug, Error)]
pub enum AccessError<E> {
    #[error("element went stale")]
    Stale,
    #[error(transparent)]
    Failed(E),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("review has no {0}")]
    MissingField(&'static str),
    #[error("unexpected script result: {0}")]
    Script(String),
}

impl Staleness for ExtractError {
    fn is_stale(&self) -> bool {
        matches!(self, ExtractError::Session(e) if e.is_stale())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot prepare output directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },
    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink task failed: {0}")]
    Join(String),
}
