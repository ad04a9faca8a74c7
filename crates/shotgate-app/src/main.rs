#![warn(missing_docs)]
//! # shotgate binary
//!
//! Console entry point: resolves configuration, authenticates, provisions the
//! remote folder, registers hotkeys, and runs one session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shotgate_app::{
    ActivityLog, AppError, ListenerError, RemoteCollaborators, SessionController, SessionExit,
    TriggerSource, check_interrupt, connect_remote, display_binding, install_interrupt_handler,
    record_startup_failure, redact_sensitive,
};
use shotgate_auth::{LoopbackFlow, UreqAuthTransport};
use shotgate_capture::{LocalCacheWriter, RealCaptureBackend};
use shotgate_core::{CollectorConfig, CoreError, Session, unix_timestamp_millis};
use shotgate_gate::{ProcessGate, SysinfoProcessSource};
use shotgate_upload::UreqDriveTransport;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "shotgate",
    version = shotgate_app::APP_VERSION,
    about = "Hotkey screenshot collector with per-user remote storage"
)]
struct Cli {
    /// Operator name used for the remote folder, log, and token cache.
    username: Option<String>,
    /// Directory for cached captures and the activity log.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// CLI entry point.
fn main() {
    init_tracing();
    // Still single-threaded here.
    shotgate_core::local_utc_offset();
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(error) => {
            let message = redact_sensitive(&error.to_string());
            tracing::error!("startup failed: {message}");
            eprintln!("shotgate: {message}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "configuration resolved");

    let log = ActivityLog::new(config.log_file_path());
    let code = match run(&config, &log) {
        Ok(exit) => exit.code(),
        Err(error) => {
            let line = record_startup_failure(&log, &error);
            eprintln!("shotgate: {line}");
            error.exit_code()
        }
    };

    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(config: &CollectorConfig, log: &ActivityLog) -> Result<SessionExit, AppError> {
    let interrupt = install_interrupt_handler()?;

    let session = Session::new(config.username.clone())?;
    let backend = Arc::new(RealCaptureBackend::discover()?);
    let writer = LocalCacheWriter::new(backend, &config.output_dir, &config.filename_prefix);
    let gate = ProcessGate::new(Arc::new(SysinfoProcessSource::new()), config.matcher()?);

    let remote = RemoteCollaborators {
        auth: Arc::new(UreqAuthTransport::default()),
        consent: Arc::new(LoopbackFlow::default().with_interrupt(Arc::clone(&interrupt))),
        drive: Arc::new(UreqDriveTransport::default()),
    };
    let uploader = connect_remote(config, remote, &interrupt, unix_timestamp_millis())?;
    let folder_id = uploader.folder_id().to_string();

    let mut triggers = register_triggers(config)?;
    check_interrupt(&interrupt)?;
    for line in [
        format!("Session started for user {}", config.username),
        format!("Remote folder id: {folder_id}"),
    ] {
        tracing::info!("{line}");
        log.append(&line)?;
    }

    let mut controller =
        SessionController::new(session, gate, writer, Arc::new(uploader), log.clone())
            .with_idle_poll(config.idle_poll_interval());
    controller.arm()?;
    print_banner(config);

    Ok(controller.run(triggers.as_mut(), &interrupt))
}

fn resolve_config(cli: &Cli) -> Result<CollectorConfig, CoreError> {
    let mut config = match &cli.config {
        Some(path) => CollectorConfig::from_json_file(path)?,
        None => CollectorConfig::default(),
    };
    config.apply_env()?;

    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if let Some(output_dir) = &cli.output_dir {
        config.output_dir = output_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

#[cfg(windows)]
fn register_triggers(config: &CollectorConfig) -> Result<Box<dyn TriggerSource>, ListenerError> {
    use std::time::Duration;

    use shotgate_app::HotkeyListener;

    let listener = match HotkeyListener::register(&config.capture_hotkey, &config.quit_hotkey) {
        Ok(listener) => listener,
        Err(error) => {
            tracing::warn!(%error, "hotkey registration failed; retrying once");
            std::thread::sleep(Duration::from_millis(500));
            HotkeyListener::register(&config.capture_hotkey, &config.quit_hotkey)?
        }
    };
    Ok(Box::new(listener))
}

#[cfg(not(windows))]
fn register_triggers(_config: &CollectorConfig) -> Result<Box<dyn TriggerSource>, ListenerError> {
    Err(ListenerError::Registration(
        "global hotkeys are currently implemented for Windows only".to_string(),
    ))
}

fn print_banner(config: &CollectorConfig) {
    println!("shotgate {}", shotgate_app::app_version());
    println!("User:        {}", config.username);
    println!("Local cache: {}", config.output_dir.display());
    println!(
        "Press {} to capture, {} to quit.",
        display_binding(&config.capture_hotkey),
        display_binding(&config.quit_hotkey)
    );
}
