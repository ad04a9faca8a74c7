//! Shared fakes and fixtures for app integration tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shotgate_app::{ActivityLog, ListenerError, SessionController, TriggerEvent, TriggerSource};
use shotgate_capture::{CaptureBackend, CaptureError, LocalCacheWriter, SyntheticCaptureBackend};
use shotgate_core::{CollectorConfig, Frame, RemoteObject, Session};
use shotgate_gate::{GateError, ProcessEntry, ProcessGate, ProcessSource};
use shotgate_upload::{RemoteUploader, UploadError};
use tempfile::TempDir;

/// First capture instant handed out by the fixture clock.
#[allow(dead_code)]
pub const CLOCK_START_MS: u64 = 1_714_560_000_000;

/// Process listing the test can change between triggers.
#[derive(Default)]
pub struct FakeProcesses {
    names: Mutex<Option<Vec<String>>>,
}

impl FakeProcesses {
    /// Listing containing `names`.
    pub fn listing(names: &[&str]) -> Self {
        Self {
            names: Mutex::new(Some(owned(names))),
        }
    }

    /// Listing whose enumeration always fails.
    #[allow(dead_code)]
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Replaces the listing.
    #[allow(dead_code)]
    pub fn set(&self, names: &[&str]) {
        *self.names.lock().expect("names") = Some(owned(names));
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl ProcessSource for FakeProcesses {
    fn snapshot(&self) -> Result<Vec<Result<ProcessEntry, GateError>>, GateError> {
        let names = self.names.lock().expect("names");
        let Some(names) = names.as_ref() else {
            return Err(GateError::Enumeration("access denied".to_string()));
        };
        Ok(names
            .iter()
            .enumerate()
            .map(|(index, name)| Ok(ProcessEntry::new(100 + index as u32, name.clone())))
            .collect())
    }
}

/// Backend whose every grab fails.
#[allow(dead_code)]
pub struct FailingBackend;

impl CaptureBackend for FailingBackend {
    fn capture_primary(&self, _captured_at_ms: u64) -> Result<Frame, CaptureError> {
        Err(CaptureError::Backend("display lost".to_string()))
    }
}

/// Uploader recording every call.
#[derive(Default)]
pub struct FakeUploader {
    fail: AtomicBool,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeUploader {
    /// Makes later uploads fail (or succeed again).
    #[allow(dead_code)]
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Filenames passed to `upload`, in order.
    #[allow(dead_code)]
    pub fn uploaded_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

impl RemoteUploader for FakeUploader {
    fn upload(&self, local_path: &Path, filename: &str) -> Result<RemoteObject, UploadError> {
        assert!(local_path.exists(), "upload must see the cached file");
        let mut calls = self.calls.lock().expect("calls");
        calls.push((local_path.to_path_buf(), filename.to_string()));

        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Server(503));
        }
        Ok(RemoteObject {
            id: format!("remote-{}", calls.len()),
            link: None,
        })
    }
}

/// Trigger source replaying a fixed script; an exhausted script reports a
/// disconnected listener.
#[allow(dead_code)]
pub struct ScriptedTriggers {
    script: VecDeque<Result<TriggerEvent, ListenerError>>,
    armed: bool,
    rearms: u32,
    refuse_rearm: bool,
}

#[allow(dead_code)]
impl ScriptedTriggers {
    /// Replays `script` in order.
    pub fn new(script: impl IntoIterator<Item = Result<TriggerEvent, ListenerError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            armed: true,
            rearms: 0,
            refuse_rearm: false,
        }
    }

    /// Replays plain trigger events.
    pub fn events(events: &[TriggerEvent]) -> Self {
        Self::new(events.iter().copied().map(Ok))
    }

    /// Makes every re-arm fail.
    pub fn refusing_rearm(mut self) -> Self {
        self.refuse_rearm = true;
        self
    }

    /// Whether triggers are still delivered.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Successful re-arms so far.
    pub fn rearm_count(&self) -> u32 {
        self.rearms
    }
}

impl TriggerSource for ScriptedTriggers {
    fn next_trigger(&mut self, _wait: Duration) -> Result<Option<TriggerEvent>, ListenerError> {
        match self.script.pop_front() {
            Some(Ok(_)) if !self.armed => Ok(None),
            Some(message) => message.map(Some),
            None => Err(ListenerError::Disconnected),
        }
    }

    fn disarm(&mut self) -> Result<(), ListenerError> {
        self.armed = false;
        Ok(())
    }

    fn rearm(&mut self) -> Result<(), ListenerError> {
        if self.refuse_rearm {
            return Err(ListenerError::Registration(
                "re-registration refused".to_string(),
            ));
        }
        self.armed = true;
        self.rearms += 1;
        Ok(())
    }
}

/// Controller wired to fakes inside a scratch directory.
pub struct Harness {
    /// Scratch directory kept alive for the test.
    #[allow(dead_code)]
    pub dir: TempDir,
    /// Capture cache directory.
    pub output_dir: PathBuf,
    /// Controller under test.
    pub controller: SessionController,
    /// Upload fake.
    #[allow(dead_code)]
    pub uploader: Arc<FakeUploader>,
    /// Process listing fake.
    #[allow(dead_code)]
    pub processes: Arc<FakeProcesses>,
}

/// Armed controller whose gate sees `running` and whose uploads succeed
/// when `upload_ok`.
#[allow(dead_code)]
pub fn harness(running: &[&str], upload_ok: bool) -> Harness {
    harness_with(
        FakeProcesses::listing(running),
        Arc::new(SyntheticCaptureBackend::new()),
        upload_ok,
    )
}

/// Armed controller over explicit fakes.
pub fn harness_with(
    processes: FakeProcesses,
    backend: Arc<dyn CaptureBackend>,
    upload_ok: bool,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CollectorConfig {
        output_dir: dir.path().join("apex_dataset").join("local_cache"),
        ..CollectorConfig::default()
    };

    let processes = Arc::new(processes);
    let uploader = Arc::new(FakeUploader::default());
    uploader.set_failing(!upload_ok);

    let clock = Arc::new(AtomicU64::new(CLOCK_START_MS));
    let writer = LocalCacheWriter::new(backend, &config.output_dir, &config.filename_prefix)
        .with_clock(move || clock.fetch_add(7, Ordering::SeqCst));
    let gate = ProcessGate::new(processes.clone(), config.matcher().expect("matcher"))
        .with_own_pid(None);
    let session = Session::new(config.username.clone()).expect("session");

    let mut controller = SessionController::new(
        session,
        gate,
        writer,
        uploader.clone(),
        ActivityLog::new(config.log_file_path()),
    )
    .with_idle_poll(Duration::from_millis(5));
    controller.arm().expect("fresh session arms");

    Harness {
        dir,
        output_dir: config.output_dir,
        controller,
        uploader,
        processes,
    }
}

impl Harness {
    /// Activity log messages without their timestamp prefix.
    #[allow(dead_code)]
    pub fn log_messages(&self) -> Vec<String> {
        let path = self.controller.activity_log().path();
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .map(|line| {
                assert!(line.starts_with('['), "line must carry a timestamp: {line}");
                line.split_once("] ")
                    .map(|(_, message)| message.to_string())
                    .expect("timestamp separator")
            })
            .collect()
    }

    /// PNG files currently in the capture cache.
    #[allow(dead_code)]
    pub fn cached_captures(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();
        files
    }
}
