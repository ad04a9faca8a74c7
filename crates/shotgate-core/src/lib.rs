#![warn(missing_docs)]
//! # shotgate-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `shotgate` workspace.
//!
//! ## Responsibilities
//! - Represent raw captured frames and the per-attempt [`CaptureArtifact`].
//! - Own the single-operator [`Session`] record: counters and lifecycle phase.
//! - Derive deterministic capture filenames from the capture instant.
//! - Match process names against the configured target application.
//! - Resolve [`CollectorConfig`] from defaults, files, and environment.
//!
//! ## Data flow
//! The session controller owns one [`Session`]. Each capture trigger consults
//! a [`TargetMatcher`] through the process gate, produces a [`Frame`] through
//! the capture backend, and turns it into a [`CaptureArtifact`] whose outcome
//! updates the session counters.
//!
//! ## Ownership and lifetimes
//! Session state is an owned value passed by `&mut` to the pipeline handler.
//! There is no module-level mutable state, so tests can run many sessions.
//!
//! ## Error model
//! Validation failures (empty username, illegal phase transition, bad frame
//! shape) return [`CoreError`] variants.
//!
//! ## Example
//! ```rust
//! use shotgate_core::{Session, SessionPhase};
//!
//! let mut session = Session::new("player1").expect("valid username");
//! session.start().expect("idle session can start");
//! assert_eq!(session.record_skip(), 1);
//! assert!(session.begin_stop());
//! assert!(!session.begin_stop());
//! assert_eq!(session.phase(), SessionPhase::Stopping);
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

pub use config::{
    CollectorConfig, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_POLL_MS, DEFAULT_USERNAME,
    MAX_CHUNK_SIZE, UPLOAD_CHUNK_GRANULARITY,
};

/// Extension used for every cached capture.
pub const CAPTURE_EXTENSION: &str = "png";

/// Represents one raw full-screen grab from the capture backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stable display identity from capture backend.
    pub screen_id: String,
    /// Source frame width in pixels.
    pub width: u32,
    /// Source frame height in pixels.
    pub height: u32,
    /// Capture time in Unix epoch milliseconds.
    pub captured_at_ms: u64,
    /// Raw RGBA pixel buffer (`width * height * 4` bytes).
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Constructs a validated frame.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFrameShape`] when the pixel buffer length is
    /// not exactly `width * height * 4`.
    pub fn new(
        screen_id: impl Into<String>,
        width: u32,
        height: u32,
        captured_at_ms: u64,
        rgba: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let expected_len = required_rgba_len(width, height)?;
        if rgba.len() != expected_len {
            return Err(CoreError::InvalidFrameShape {
                expected: expected_len,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            screen_id: screen_id.into(),
            width,
            height,
            captured_at_ms,
            rgba,
        })
    }
}

/// Remote placement of an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Remote object identifier.
    pub id: String,
    /// Shareable link to the object, when the store returned one.
    pub link: Option<String>,
}

/// One screenshot attempt after the local write succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArtifact {
    /// Capture instant in Unix epoch milliseconds.
    pub captured_at_ms: u64,
    /// Filename derived from the capture instant.
    pub filename: String,
    /// Location of the cached file on local disk.
    pub local_path: PathBuf,
    /// Populated only after a successful upload.
    pub remote: Option<RemoteObject>,
}

impl CaptureArtifact {
    /// Creates a locally persisted artifact with no remote placement yet.
    pub fn local(captured_at_ms: u64, filename: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            captured_at_ms,
            filename: filename.into(),
            local_path,
            remote: None,
        }
    }

    /// Returns `true` once the artifact has a remote placement.
    pub fn is_uploaded(&self) -> bool {
        self.remote.is_some()
    }

    /// Borrowed view of the cached file path.
    pub fn path(&self) -> &Path {
        &self.local_path
    }
}

/// Lifecycle phase of a collector session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Constructed; triggers are not armed yet.
    Idle,
    /// Triggers armed; capture triggers are honored.
    Running,
    /// Shutdown requested; triggers are disarmed.
    Stopping,
    /// Final counts flushed; the process exits next.
    Terminated,
}

/// Final counters reported when a session stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Captures that were cached and uploaded.
    pub screenshots: u64,
    /// Capture triggers rejected by the process gate.
    pub skipped: u64,
    /// Capture triggers that failed locally or remotely.
    pub failed: u64,
}

/// The single running collector instance.
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    screenshot_count: u64,
    skipped_count: u64,
    failed_count: u64,
    phase: SessionPhase,
}

impl Session {
    /// Creates an idle session for `username`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidUsername`] when the username is blank.
    pub fn new(username: impl Into<String>) -> Result<Self, CoreError> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(CoreError::InvalidUsername);
        }

        Ok(Self {
            username,
            screenshot_count: 0,
            skipped_count: 0,
            failed_count: 0,
            phase: SessionPhase::Idle,
        })
    }

    /// Remote namespace owner for this session.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Returns `true` only while capture triggers are honored.
    pub fn is_running(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    /// Number of captures that reached remote storage.
    pub fn screenshot_count(&self) -> u64 {
        self.screenshot_count
    }

    /// Number of capture triggers rejected by the process gate.
    pub fn skipped_count(&self) -> u64 {
        self.skipped_count
    }

    /// Number of capture triggers that failed after passing the gate.
    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    /// Every capture trigger processed while running.
    pub fn triggers_processed(&self) -> u64 {
        self.screenshot_count + self.skipped_count + self.failed_count
    }

    /// Transitions `Idle -> Running`.
    ///
    /// # Errors
    /// Returns [`CoreError::IllegalTransition`] from any other phase.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.phase != SessionPhase::Idle {
            return Err(CoreError::IllegalTransition {
                from: self.phase,
                to: SessionPhase::Running,
            });
        }
        self.phase = SessionPhase::Running;
        Ok(())
    }

    /// Records a gate rejection and returns the running total of skips.
    pub fn record_skip(&mut self) -> u64 {
        self.skipped_count += 1;
        self.skipped_count
    }

    /// Records an uploaded capture and returns the running total.
    pub fn record_upload(&mut self) -> u64 {
        self.screenshot_count += 1;
        self.screenshot_count
    }

    /// Records a capture or upload failure.
    pub fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    /// Enters `Stopping` from `Idle` or `Running`.
    ///
    /// Returns `false` when shutdown already began, so repeated quit requests
    /// are no-ops.
    pub fn begin_stop(&mut self) -> bool {
        match self.phase {
            SessionPhase::Idle | SessionPhase::Running => {
                self.phase = SessionPhase::Stopping;
                true
            }
            SessionPhase::Stopping | SessionPhase::Terminated => false,
        }
    }

    /// Completes `Stopping -> Terminated` and returns the final counters.
    ///
    /// Returns `None` unless the session is currently stopping.
    pub fn finish(&mut self) -> Option<SessionSummary> {
        if self.phase != SessionPhase::Stopping {
            return None;
        }
        self.phase = SessionPhase::Terminated;
        Some(self.summary())
    }

    /// Snapshot of the counters.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            screenshots: self.screenshot_count,
            skipped: self.skipped_count,
            failed: self.failed_count,
        }
    }
}

/// Case-insensitive target-process matcher.
///
/// # Semantics
/// A process name matches when it equals one of the configured names or, as
/// a fallback, contains the generic keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatcher {
    exact_names: Vec<String>,
    keyword: Option<String>,
}

impl TargetMatcher {
    /// Builds a matcher from exact names and an optional keyword.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyMatcher`] when neither a name nor a keyword
    /// survives trimming.
    pub fn new<I, S>(exact_names: I, keyword: Option<&str>) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exact_names: Vec<String> = exact_names
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        let keyword = keyword
            .map(|keyword| keyword.trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty());

        if exact_names.is_empty() && keyword.is_none() {
            return Err(CoreError::EmptyMatcher);
        }

        Ok(Self {
            exact_names,
            keyword,
        })
    }

    /// Returns `true` when `process_name` identifies the target application.
    pub fn matches(&self, process_name: &str) -> bool {
        let normalized = process_name.trim().to_lowercase();
        if normalized.is_empty() {
            return false;
        }

        if self.exact_names.iter().any(|name| *name == normalized) {
            return true;
        }

        self.keyword
            .as_deref()
            .is_some_and(|keyword| normalized.contains(keyword))
    }
}

/// Derives the cache filename for a capture instant.
///
/// Pattern: `{prefix}_{YYYYMMDD}_{HHMMSS}_{mmm}.png`.
pub fn capture_filename(prefix: &str, at: OffsetDateTime) -> String {
    format!(
        "{prefix}_{:04}{:02}{:02}_{:02}{:02}{:02}_{:03}.{CAPTURE_EXTENSION}",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

/// Inserts `_{n}` before the extension to disambiguate a taken filename.
pub fn with_collision_suffix(filename: &str, n: u32) -> String {
    match filename.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}_{n}.{extension}"),
        None => format!("{filename}_{n}"),
    }
}

/// Converts epoch milliseconds to a local date-time.
///
/// Falls back to UTC when the local offset cannot be determined.
///
/// # Errors
/// Returns [`CoreError::InvalidTimestamp`] when `ms` is out of range.
pub fn local_datetime_from_ms(ms: u64) -> Result<OffsetDateTime, CoreError> {
    let utc = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| CoreError::InvalidTimestamp(ms))?;
    Ok(utc.to_offset(local_utc_offset()))
}

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Local UTC offset, resolved once per process.
///
/// On Unix, `time` refuses to read the offset once the process has more than
/// one thread, so the binary calls this before spawning any. A process that
/// first asks from a worker thread gets UTC, reported at debug level. The
/// pinned offset does not follow a daylight-saving change mid-session.
pub fn local_utc_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| {
        UtcOffset::current_local_offset().unwrap_or_else(|error| {
            tracing::debug!(%error, "local UTC offset unavailable; stamping in UTC");
            UtcOffset::UTC
        })
    })
}

/// Current wall-clock time at [`local_utc_offset`].
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(local_utc_offset())
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn unix_timestamp_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(0)
}

/// Error type for core validation failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame buffer shape does not match declared geometry.
    #[error("invalid frame shape: expected {expected} bytes, got {actual}")]
    InvalidFrameShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Frame dimensions overflow addressable memory.
    #[error("frame dimensions overflow")]
    FrameOverflow,
    /// Username cannot be blank.
    #[error("username is empty")]
    InvalidUsername,
    /// Matcher needs at least one name or keyword.
    #[error("target matcher has no process names and no keyword")]
    EmptyMatcher,
    /// Session phase change is not legal from the current phase.
    #[error("illegal session transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Phase before the attempted transition.
        from: SessionPhase,
        /// Requested phase.
        to: SessionPhase,
    },
    /// Timestamp is outside the representable range.
    #[error("timestamp out of range: {0} ms")]
    InvalidTimestamp(u64),
    /// Configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Configuration file could not be read.
    #[error("configuration file {path}: {source}")]
    ConfigIo {
        /// Offending file path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// Configuration file is not valid JSON for [`CollectorConfig`].
    #[error("configuration decode failure: {0}")]
    ConfigDecode(#[from] serde_json::Error),
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CoreError::FrameOverflow)
}
