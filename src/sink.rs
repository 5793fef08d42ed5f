use std::{
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::Value;
use time::{OffsetDateTime, macros::format_description};

use crate::error::SinkError;

/// Durable storage for a finished harvest. Returns where the payload went.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn store(
        &self,
        label: &str,
        target_id: &str,
        at: OffsetDateTime,
        payload: &Value,
    ) -> Result<String, SinkError>;
}

/// Pretty JSON files named `{label}_{target}_{YYYYMMDD_HHMMSS}.json`, written
/// to a temp file first and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_name(label: &str, target_id: &str, at: OffsetDateTime) -> String {
        let fmt = format_description!("[year][month][day]_[hour][minute][second]");
        let stamp = at
            .to_offset(time::UtcOffset::UTC)
            .format(&fmt)
            .unwrap_or_else(|_| at.unix_timestamp().to_string());
        format!("{label}_{target_id}_{stamp}.json")
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    std::fs::create_dir_all(dir).map_err(|source| SinkError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    let write_err = |source| SinkError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[async_trait]
impl Sink for JsonFileSink {
    async fn store(
        &self,
        label: &str,
        target_id: &str,
        at: OffsetDateTime,
        payload: &Value,
    ) -> Result<String, SinkError> {
        let bytes = serde_json::to_vec_pretty(payload)?;
        let dir = self.dir.clone();
        let path = dir.join(Self::file_name(label, target_id, at));
        let out = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
            .await
            .map_err(|e| SinkError::Join(e.to_string()))??;
        Ok(out.display().to_string())
    }
}
