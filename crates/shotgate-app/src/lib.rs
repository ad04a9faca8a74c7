#![warn(missing_docs)]
//! # shotgate-app
//!
//! ## Purpose
//! Runs one operator session of the hotkey screenshot collector.
//!
//! ## Responsibilities
//! - Own the session lifecycle `Idle -> Running -> Stopping -> Terminated`.
//! - Serialize gate check, local cache write, and remote upload per trigger.
//! - Keep the per-user activity log and mirror it to the console.
//! - Turn hotkey presses and interrupts into controller input.
//!
//! ## Data flow
//! Hotkey callback -> [`TriggerSender`] -> channel -> [`SessionController::run`]
//! -> process gate -> local cache writer -> remote uploader -> counters and
//! [`ActivityLog`] line.
//!
//! ## Ownership and lifetimes
//! The controller owns the session record by value. Collaborators are shared
//! behind `Arc<dyn Trait>` so tests can substitute fakes.
//!
//! ## Error model
//! Startup failures surface as [`AppError`], are written to the activity log
//! as `Startup failed: ...`, and end the process with status 1.
//! Per-trigger failures are outcomes ([`CaptureOutcome`]), logged and counted,
//! never propagated.
//!
//! ## Security and privacy notes
//! - Error strings pass through [`redact_sensitive`] before being logged.
//! - Only the primary display is captured, and only while the target
//!   application is running.

mod activity_log;
mod controller;
#[cfg(windows)]
mod hotkeys;
mod startup;
mod triggers;

use shotgate_auth::AuthError;
use shotgate_capture::CaptureError;
use shotgate_core::CoreError;
use shotgate_upload::UploadError;
use thiserror::Error;

pub use activity_log::{ActivityLog, ActivityLogError, format_log_line};
pub use controller::{CaptureOutcome, SessionController, SessionExit};
#[cfg(windows)]
pub use hotkeys::HotkeyListener;
pub use startup::{
    RemoteCollaborators, check_interrupt, connect_remote, install_interrupt_handler,
    record_startup_failure,
};
pub use triggers::{ChannelTriggerSource, ListenerError, TriggerEvent, TriggerSender, TriggerSource};

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("SHOTGATE_VERSION");

const SENSITIVE_KEYS: [&str; 7] = [
    "access_token",
    "refresh_token",
    "token",
    "client_secret",
    "code",
    "password",
    "authorization",
];
const REDACTED: &str = "<redacted>";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Renders a hotkey binding such as `ctrl+alt+KeyS` as `Ctrl+Alt+S`.
pub fn display_binding(binding: &str) -> String {
    binding
        .split('+')
        .map(|part| {
            let part = part.trim();
            let key = part
                .strip_prefix("Key")
                .or_else(|| part.strip_prefix("Digit"))
                .unwrap_or(part);
            let mut chars = key.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect::<String>()
            })
        })
        .collect::<Vec<_>>()
        .join("+")
}

/// Redacts secret values in log-bound text.
///
/// Handles `key=value` pairs (including `&`-joined query strings),
/// `key: value`, and `Bearer value`.
pub fn redact_sensitive(input: &str) -> String {
    let mut redact_next = false;

    input
        .split(' ')
        .map(|word| {
            if redact_next && !word.is_empty() {
                redact_next = false;
                return REDACTED.to_string();
            }

            let lower = word.to_ascii_lowercase();
            let bare_key = lower.trim_end_matches(':');
            if lower == "bearer" || (lower.ends_with(':') && is_sensitive_key(bare_key)) {
                redact_next = true;
                return word.to_string();
            }

            if word.contains('=') {
                let (redacted, trailing_bearer) = redact_pairs(word);
                redact_next = trailing_bearer;
                return redacted;
            }

            word.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn redact_pairs(word: &str) -> (String, bool) {
    let mut trailing_bearer = false;
    let redacted = word
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if is_sensitive_key(key) => {
                trailing_bearer = value.eq_ignore_ascii_case("bearer");
                format!("{key}={REDACTED}")
            }
            _ => pair.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&");
    (redacted, trailing_bearer)
}

fn is_sensitive_key(key: &str) -> bool {
    let name = key
        .rsplit(['?', '"', '\'', '{', ',', '('])
        .next()
        .unwrap_or(key)
        .to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&name.as_str())
}

/// App startup error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration or session validation failed.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),
    /// Credentials could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// Remote folder could not be provisioned.
    #[error("remote folder provisioning failed: {0}")]
    Provisioning(#[from] UploadError),
    /// Capture backend unavailable.
    #[error("capture backend unavailable: {0}")]
    Capture(#[from] CaptureError),
    /// Hotkeys could not be registered.
    #[error("hotkey listener unavailable: {0}")]
    Listener(#[from] ListenerError),
    /// Interrupt handler could not be installed.
    #[error("interrupt handler unavailable: {0}")]
    Signal(#[source] std::io::Error),
    /// Activity log could not be written.
    #[error("activity log unavailable: {0}")]
    Log(#[from] ActivityLogError),
    /// Operator asked to stop before the session was armed.
    #[error("interrupted during startup")]
    Interrupted,
}
