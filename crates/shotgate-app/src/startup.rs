//! Steps that run before the session is armed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shotgate_auth::{
    AuthTransport, AuthorizationFlow, ClientSecrets, CredentialStore, TokenManager,
};
use shotgate_core::CollectorConfig;
use shotgate_upload::{DriveClient, DriveTransport, DriveUploader};

use crate::activity_log::ActivityLog;
use crate::{AppError, redact_sensitive};

/// Exit status used when the process was asked to stop from the console.
const INTERRUPTED_EXIT_STATUS: i32 = 130;

/// Network collaborators needed to reach remote storage.
pub struct RemoteCollaborators {
    /// Token endpoint transport.
    pub auth: Arc<dyn AuthTransport>,
    /// Interactive consent flow used when no usable token is cached.
    pub consent: Arc<dyn AuthorizationFlow>,
    /// Remote storage transport.
    pub drive: Arc<dyn DriveTransport>,
}

/// Installs the SIGINT/SIGTERM handler and returns its flag.
///
/// The first signal sets the flag. A second signal while the flag is still
/// set terminates the process, so a startup step blocked on the network can
/// always be abandoned.
///
/// # Errors
/// Returns [`AppError::Signal`] when a handler cannot be registered.
pub fn install_interrupt_handler() -> Result<Arc<AtomicBool>, AppError> {
    let interrupt = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(
            signal,
            INTERRUPTED_EXIT_STATUS,
            Arc::clone(&interrupt),
        )
        .map_err(AppError::Signal)?;
        signal_hook::flag::register(signal, Arc::clone(&interrupt)).map_err(AppError::Signal)?;
    }
    Ok(interrupt)
}

/// Fails with [`AppError::Interrupted`] once `interrupt` is set.
///
/// # Errors
/// Returns [`AppError::Interrupted`] when the flag is set.
pub fn check_interrupt(interrupt: &AtomicBool) -> Result<(), AppError> {
    if interrupt.load(Ordering::SeqCst) {
        return Err(AppError::Interrupted);
    }
    Ok(())
}

/// Authenticates and provisions `{remote_root_folder}/{username}`.
///
/// `interrupt` is checked after each blocking step so a stop request made
/// during consent or provisioning never arms the session.
///
/// # Errors
/// Returns [`AppError::Auth`] for secrets, token cache, or consent failures,
/// [`AppError::Provisioning`] when the folders cannot be found or created,
/// and [`AppError::Interrupted`] when a stop was requested meanwhile.
pub fn connect_remote(
    config: &CollectorConfig,
    remote: RemoteCollaborators,
    interrupt: &AtomicBool,
    now_ms: u64,
) -> Result<DriveUploader, AppError> {
    let secrets = ClientSecrets::from_file(&config.credentials_file)?;
    let store = CredentialStore::new(secrets, config.token_file_path(), remote.auth, remote.consent);
    let token = store.acquire(now_ms)?;
    check_interrupt(interrupt)?;

    let tokens = Arc::new(TokenManager::new(store, token));
    let client = DriveClient::new(remote.drive, tokens).with_chunk_size(config.chunk_size());
    let folder_id = client.ensure_user_folder(&config.remote_root_folder, &config.username)?;
    check_interrupt(interrupt)?;

    Ok(DriveUploader::new(client, folder_id))
}

/// Writes the startup outcome line for `error` to `log` and returns it.
///
/// Log write failures are reported through `tracing` only.
pub fn record_startup_failure(log: &ActivityLog, error: &AppError) -> String {
    let line = match error {
        AppError::Interrupted => "Startup interrupted".to_string(),
        other => format!("Startup failed: {}", redact_sensitive(&other.to_string())),
    };

    if matches!(error, AppError::Interrupted) {
        tracing::warn!("{line}");
    } else {
        tracing::error!("{line}");
    }
    if let Err(log_error) = log.append(&line) {
        tracing::error!(error = %log_error, "activity log write failed");
    }
    line
}

impl AppError {
    /// Process exit status for a session that never started.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted => INTERRUPTED_EXIT_STATUS,
            _ => 1,
        }
    }
}
