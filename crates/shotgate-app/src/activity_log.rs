//! Durable per-user activity log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;

/// Append-only text log at `{output_dir}/{username}_log.txt`.
///
/// The file is opened for every line and closed before `append` returns, so
/// the log holds no handle between events and survives abrupt termination
/// with every completed line on disk.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    /// Creates a log writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line stamped with the current local time.
    ///
    /// # Errors
    /// Returns [`ActivityLogError`] when the file cannot be opened or written.
    pub fn append(&self, message: &str) -> Result<(), ActivityLogError> {
        self.append_at(shotgate_core::now_local(), message)
    }

    /// Appends one line stamped with `at`.
    ///
    /// # Errors
    /// Returns [`ActivityLogError`] when the file cannot be opened or written.
    pub fn append_at(&self, at: OffsetDateTime, message: &str) -> Result<(), ActivityLogError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ActivityLogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let line = format_log_line(at, message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> ActivityLogError {
        ActivityLogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Renders `[YYYY-MM-DD HH:MM:SS] message\n`.
pub fn format_log_line(at: OffsetDateTime, message: &str) -> String {
    format!(
        "[{:04}-{:02}-{:02} {:02}:{:02}:{:02}] {message}\n",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Activity log error type.
#[derive(Debug, Error)]
pub enum ActivityLogError {
    /// Opening or writing the log failed.
    #[error("activity log {path} unavailable: {source}")]
    Io {
        /// Log or parent directory path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}
