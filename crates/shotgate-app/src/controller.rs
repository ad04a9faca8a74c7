//! Session lifecycle and the per-trigger capture pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shotgate_capture::LocalCacheWriter;
use shotgate_core::{DEFAULT_IDLE_POLL_MS, RemoteObject, Session, SessionPhase, SessionSummary};
use shotgate_gate::{GateOutcome, ProcessGate};
use shotgate_upload::RemoteUploader;

use crate::activity_log::ActivityLog;
use crate::redact_sensitive;
use crate::triggers::{ListenerError, TriggerEvent, TriggerSource};

/// Result of one capture trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Session was not running; nothing happened.
    Ignored,
    /// Target application absent (or undeterminable).
    Skipped {
        /// Skip total after this trigger.
        skipped: u64,
    },
    /// Screen grab or local write failed.
    CaptureFailed,
    /// Cached and uploaded.
    Uploaded {
        /// Screenshot total after this trigger.
        count: u64,
        /// Cached filename.
        filename: String,
        /// Remote placement.
        remote: RemoteObject,
    },
    /// Cached locally, upload failed.
    UploadFailed {
        /// Cached filename kept on disk.
        filename: String,
    },
}

/// How a session run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Quit trigger or interrupt.
    Normal,
    /// Listener failed and could not be re-armed.
    ListenerFailed,
}

impl SessionExit {
    /// Process exit status.
    pub fn code(self) -> i32 {
        match self {
            Self::Normal => 0,
            Self::ListenerFailed => 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

/// Owns the session and drives gate, cache, and upload for each trigger.
pub struct SessionController {
    session: Session,
    gate: ProcessGate,
    writer: LocalCacheWriter,
    uploader: Arc<dyn RemoteUploader>,
    log: ActivityLog,
    idle_poll: Duration,
}

impl SessionController {
    /// Creates a controller for an idle session.
    pub fn new(
        session: Session,
        gate: ProcessGate,
        writer: LocalCacheWriter,
        uploader: Arc<dyn RemoteUploader>,
        log: ActivityLog,
    ) -> Self {
        Self {
            session,
            gate,
            writer,
            uploader,
            log,
            idle_poll: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
        }
    }

    /// Overrides how long one idle wait blocks before re-checking interrupts.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Read-only view of the session record.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Activity log receiving session events.
    pub fn activity_log(&self) -> &ActivityLog {
        &self.log
    }

    fn record(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Warn => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }

        if let Err(error) = self.log.append(message) {
            tracing::error!(%error, "activity log write failed");
        }
    }

    /// Moves the session to `Running` once triggers are registered.
    ///
    /// # Errors
    /// Returns [`shotgate_core::CoreError::IllegalTransition`] unless idle.
    pub fn arm(&mut self) -> Result<(), shotgate_core::CoreError> {
        self.session.start()?;
        tracing::debug!(user = self.session.username(), "session armed");
        Ok(())
    }

    /// Runs the capture pipeline for one capture trigger.
    pub fn handle_capture(&mut self) -> CaptureOutcome {
        if !self.session.is_running() {
            tracing::debug!(phase = ?self.session.phase(), "capture trigger ignored");
            return CaptureOutcome::Ignored;
        }

        let matched = match self.gate.check() {
            GateOutcome::Running { matched_name } => matched_name,
            GateOutcome::NotRunning => return self.skip(),
            GateOutcome::Unavailable(error) => {
                self.record(Level::Warn, &format!("Process check unavailable: {error}"));
                return self.skip();
            }
        };

        let artifact = match self.writer.write_capture() {
            Ok(artifact) => artifact,
            Err(error) => {
                self.session.record_failure();
                self.record(
                    Level::Error,
                    &format!("Capture failed: {}", redact_sensitive(&error.to_string())),
                );
                return CaptureOutcome::CaptureFailed;
            }
        };

        match self.uploader.upload(artifact.path(), &artifact.filename) {
            Ok(remote) => {
                let count = self.session.record_upload();
                self.record(
                    Level::Info,
                    &format!(
                        "#{count} [{matched}]: {} -> remote storage ({})",
                        artifact.filename, remote.id
                    ),
                );
                CaptureOutcome::Uploaded {
                    count,
                    filename: artifact.filename,
                    remote,
                }
            }
            Err(error) => {
                self.session.record_failure();
                self.record(
                    Level::Error,
                    &format!(
                        "Upload failed for {}: {}",
                        artifact.filename,
                        redact_sensitive(&error.to_string())
                    ),
                );
                CaptureOutcome::UploadFailed {
                    filename: artifact.filename,
                }
            }
        }
    }

    fn skip(&mut self) -> CaptureOutcome {
        let skipped = self.session.record_skip();
        self.record(
            Level::Warn,
            &format!("Target application not running (skipped: {skipped})"),
        );
        CaptureOutcome::Skipped { skipped }
    }

    /// Stops the session and writes the final counts line.
    ///
    /// Only the first call has an effect; later calls return `None`.
    pub fn shutdown(&mut self) -> Option<SessionSummary> {
        if !self.session.begin_stop() {
            tracing::debug!("shutdown already in progress");
            return None;
        }

        let summary = self.session.finish()?;
        self.record(
            Level::Info,
            &format!(
                "Session finished. Screenshots: {}, skipped: {}",
                summary.screenshots, summary.skipped
            ),
        );
        Some(summary)
    }

    /// Drains triggers until quit, interrupt, or an unrecoverable listener
    /// failure, then disarms `triggers` and shuts the session down.
    ///
    /// `interrupt` is checked between triggers only, so an in-flight capture
    /// always completes.
    pub fn run(&mut self, triggers: &mut dyn TriggerSource, interrupt: &AtomicBool) -> SessionExit {
        let mut rearmed = false;

        let exit = loop {
            if self.session.phase() != SessionPhase::Running {
                break SessionExit::Normal;
            }
            if interrupt.load(Ordering::SeqCst) {
                self.record(Level::Info, "Interrupt received, stopping session");
                break SessionExit::Normal;
            }

            match triggers.next_trigger(self.idle_poll) {
                Ok(None) => {}
                Ok(Some(TriggerEvent::Capture)) => {
                    self.handle_capture();
                }
                Ok(Some(TriggerEvent::Quit)) => {
                    self.record(Level::Info, "Quit requested, stopping session");
                    break SessionExit::Normal;
                }
                Err(error) => {
                    if !self.recover_listener(triggers, &error, &mut rearmed) {
                        break SessionExit::ListenerFailed;
                    }
                }
            }
        };

        if let Err(error) = triggers.disarm() {
            tracing::warn!(%error, "hotkeys could not be released");
        }
        self.shutdown();
        exit
    }

    fn recover_listener(
        &self,
        triggers: &mut dyn TriggerSource,
        error: &ListenerError,
        rearmed: &mut bool,
    ) -> bool {
        self.record(Level::Error, &format!("Hotkey listener failed: {error}"));
        if *rearmed {
            return false;
        }

        *rearmed = true;
        match triggers.rearm() {
            Ok(()) => {
                self.record(Level::Warn, "Hotkey listener re-armed");
                true
            }
            Err(error) => {
                self.record(
                    Level::Error,
                    &format!("Hotkey listener could not be re-armed: {error}"),
                );
                false
            }
        }
    }
}
