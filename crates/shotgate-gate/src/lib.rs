#![warn(missing_docs)]
//! # shotgate-gate
//!
//! ## Purpose
//! Answers whether the target application is currently running.
//!
//! ## Responsibilities
//! - Define a backend-agnostic [`ProcessSource`] for OS process listings.
//! - Provide the `sysinfo`-backed [`SysinfoProcessSource`].
//! - Scan one listing with a [`TargetMatcher`] and report a [`GateOutcome`].
//!
//! ## Data flow
//! Session controller calls [`ProcessGate::check`] -> source snapshot ->
//! per-entry matching -> first match wins.
//!
//! ## Error model
//! Per-entry failures (vanished process, unreadable name) are skipped.
//! A failed snapshot is reported as [`GateOutcome::Unavailable`] instead of
//! an error so callers treat it as "not running" without a separate branch.

use std::sync::{Arc, Mutex};

use shotgate_core::TargetMatcher;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

/// One process from an OS listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// OS process id.
    pub pid: u32,
    /// Process name as reported by the OS (original case).
    pub name: String,
}

impl ProcessEntry {
    /// Creates a process entry.
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// Trait implemented by OS process-listing providers.
pub trait ProcessSource: Send + Sync {
    /// Takes one snapshot of running processes.
    ///
    /// Individual entries may fail without failing the snapshot.
    ///
    /// # Errors
    /// Returns [`GateError`] when the listing cannot be produced at all.
    fn snapshot(&self) -> Result<Vec<Result<ProcessEntry, GateError>>, GateError>;
}

/// Verdict of one gate check.
#[derive(Debug)]
pub enum GateOutcome {
    /// Target found; carries the matched process name in original case.
    Running {
        /// Name of the first matching process.
        matched_name: String,
    },
    /// No process matched.
    NotRunning,
    /// Listing failed entirely; callers treat this as not running.
    Unavailable(GateError),
}

impl GateOutcome {
    /// Returns the matched name when the target is running.
    pub fn matched_name(&self) -> Option<&str> {
        match self {
            Self::Running { matched_name } => Some(matched_name),
            Self::NotRunning | Self::Unavailable(_) => None,
        }
    }
}

/// Gate consulted before every capture.
#[derive(Clone)]
pub struct ProcessGate {
    source: Arc<dyn ProcessSource>,
    matcher: TargetMatcher,
    own_pid: Option<u32>,
}

impl ProcessGate {
    /// Creates a gate over `source` that ignores the current process.
    pub fn new(source: Arc<dyn ProcessSource>, matcher: TargetMatcher) -> Self {
        Self {
            source,
            matcher,
            own_pid: Some(std::process::id()),
        }
    }

    /// Overrides the pid excluded from matching.
    pub fn with_own_pid(mut self, own_pid: Option<u32>) -> Self {
        self.own_pid = own_pid;
        self
    }

    /// Scans the current process listing for the target application.
    pub fn check(&self) -> GateOutcome {
        let entries = match self.source.snapshot() {
            Ok(entries) => entries,
            Err(error) => return GateOutcome::Unavailable(error),
        };

        entries
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| Some(entry.pid) != self.own_pid)
            .find(|entry| self.matcher.matches(&entry.name))
            .map_or(GateOutcome::NotRunning, |entry| GateOutcome::Running {
                matched_name: entry.name,
            })
    }
}

/// Process source backed by `sysinfo`.
///
/// # Notes
/// Holds one `System` across checks so repeated refreshes reuse allocations.
pub struct SysinfoProcessSource {
    system: Mutex<System>,
}

impl SysinfoProcessSource {
    /// Creates a source with an empty process table.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn snapshot(&self) -> Result<Vec<Result<ProcessEntry, GateError>>, GateError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(GateError::Unsupported);
        }

        let mut system = self
            .system
            .lock()
            .map_err(|_| GateError::Enumeration("process table lock poisoned".to_string()))?;
        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::new());

        let entries = system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let pid = pid.as_u32();
                match process.name().to_str() {
                    Some(name) if !name.is_empty() => Ok(ProcessEntry::new(pid, name)),
                    Some(_) => Err(GateError::Entry {
                        pid,
                        reason: "empty process name".to_string(),
                    }),
                    None => Err(GateError::Entry {
                        pid,
                        reason: "process name is not valid UTF-8".to_string(),
                    }),
                }
            })
            .collect();

        Ok(entries)
    }
}

/// Process-gate error type.
#[derive(Debug, Error)]
pub enum GateError {
    /// Listing could not be produced.
    #[error("process enumeration failed: {0}")]
    Enumeration(String),
    /// One entry could not be read.
    #[error("process {pid} unreadable: {reason}")]
    Entry {
        /// Process id of the unreadable entry.
        pid: u32,
        /// Why the entry was skipped.
        reason: String,
    },
    /// Platform has no process-listing support.
    #[error("process enumeration is not supported on this platform")]
    Unsupported,
}
