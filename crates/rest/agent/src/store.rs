//! Last-break timestamp on disk.

use chrono::{DateTime, Utc};
use color_eyre::eyre::WrapErr as _;
use rest_core::BreakLog;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stores the last completed break as an RFC 3339 line.
#[derive(Debug, Clone)]
pub struct FileBreakLog {
    path: PathBuf,
}

impl FileBreakLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, at: DateTime<Utc>) -> color_eyre::eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
        }
        // atomic replace
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", at.to_rfc3339()))
            .wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .wrap_err_with(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl BreakLog for FileBreakLog {
    fn last_break(&self) -> Option<DateTime<Utc>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read last break");
                return None;
            }
        };
        match DateTime::parse_from_rfc3339(content.trim()) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed last break");
                None
            }
        }
    }

    fn record_break(&self, at: DateTime<Utc>) {
        match self.write(at) {
            Ok(()) => debug!(path = %self.path.display(), %at, "last break recorded"),
            Err(e) => warn!(error = ?e, "failed to record last break"),
        }
    }
}
