//! Collector configuration with defaults, JSON file, and env-var layers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{CoreError, TargetMatcher};

/// Username used when none is supplied on the command line.
pub const DEFAULT_USERNAME: &str = "player1";

/// Default idle wait between trigger-queue polls.
pub const DEFAULT_IDLE_POLL_MS: u64 = 100;

/// Resumable-upload chunks must be a multiple of this many bytes.
pub const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;

/// Default resumable-upload chunk size (4 granules).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * UPLOAD_CHUNK_GRANULARITY;

/// Largest accepted resumable-upload chunk size (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 256 * UPLOAD_CHUNK_GRANULARITY;

const ENV_OUTPUT_DIR: &str = "SHOTGATE_OUTPUT_DIR";
const ENV_TARGET_NAMES: &str = "SHOTGATE_TARGET_NAMES";
const ENV_TARGET_KEYWORD: &str = "SHOTGATE_TARGET_KEYWORD";
const ENV_CREDENTIALS_FILE: &str = "SHOTGATE_CREDENTIALS_FILE";
const ENV_IDLE_POLL_MS: &str = "SHOTGATE_IDLE_POLL_MS";

/// Runtime configuration for one collector process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Remote namespace owner.
    pub username: String,
    /// Directory holding cached captures and the activity log.
    pub output_dir: PathBuf,
    /// Exact process names identifying the target application.
    pub target_process_names: Vec<String>,
    /// Substring fallback for process-name matching.
    pub target_keyword: Option<String>,
    /// Fixed prefix of every capture filename.
    pub filename_prefix: String,
    /// Top-level remote folder containing per-user folders.
    pub remote_root_folder: String,
    /// OAuth client secrets file.
    pub credentials_file: PathBuf,
    /// Directory holding per-user cached tokens.
    pub token_dir: PathBuf,
    /// Hotkey requesting a capture.
    pub capture_hotkey: String,
    /// Hotkey requesting shutdown.
    pub quit_hotkey: String,
    /// Idle wait between trigger polls, in milliseconds.
    pub idle_poll_ms: u64,
    /// Requested resumable-upload chunk size in bytes.
    pub upload_chunk_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            output_dir: PathBuf::from("apex_dataset/local_cache"),
            target_process_names: vec![
                "r5apex.exe".to_string(),
                "apex legends.exe".to_string(),
                "EALauncher.exe".to_string(),
            ],
            target_keyword: Some("apex".to_string()),
            filename_prefix: "apex_map".to_string(),
            remote_root_folder: "ApexDataset".to_string(),
            credentials_file: PathBuf::from("credentials.json"),
            token_dir: PathBuf::from("."),
            capture_hotkey: "ctrl+alt+KeyS".to_string(),
            quit_hotkey: "ctrl+alt+KeyQ".to_string(),
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl CollectorConfig {
    /// Loads configuration from a JSON file; missing fields keep defaults.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigIo`] or [`CoreError::ConfigDecode`].
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read(path).map_err(|source| CoreError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Applies `SHOTGATE_*` overrides from the process environment.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for unparsable numeric values.
    pub fn apply_env(&mut self) -> Result<(), CoreError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for unparsable numeric values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(dir) = non_blank(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(names) = non_blank(ENV_TARGET_NAMES) {
            self.target_process_names = names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(keyword) = lookup(ENV_TARGET_KEYWORD) {
            let keyword = keyword.trim();
            self.target_keyword = (!keyword.is_empty()).then(|| keyword.to_string());
        }
        if let Some(path) = non_blank(ENV_CREDENTIALS_FILE) {
            self.credentials_file = PathBuf::from(path);
        }
        if let Some(poll) = non_blank(ENV_IDLE_POLL_MS) {
            self.idle_poll_ms = poll.parse().map_err(|_| {
                CoreError::InvalidConfig(format!("{ENV_IDLE_POLL_MS} must be an integer"))
            })?;
        }

        Ok(())
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    /// Returns [`CoreError`] for a blank username, zero poll interval,
    /// blank filename prefix, oversized upload chunk, or an empty process
    /// matcher.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.username.trim().is_empty() {
            return Err(CoreError::InvalidUsername);
        }
        if self.idle_poll_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "idle_poll_ms must be greater than zero".to_string(),
            ));
        }
        if self.filename_prefix.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "filename_prefix must be non-empty".to_string(),
            ));
        }
        if self.upload_chunk_size > MAX_CHUNK_SIZE {
            return Err(CoreError::InvalidConfig(format!(
                "upload_chunk_size must not exceed {MAX_CHUNK_SIZE} bytes"
            )));
        }
        self.matcher().map(|_| ())
    }

    /// Builds the process-name matcher.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyMatcher`] when nothing is configured.
    pub fn matcher(&self) -> Result<TargetMatcher, CoreError> {
        TargetMatcher::new(&self.target_process_names, self.target_keyword.as_deref())
    }

    /// Activity log location: `{output_dir}/{username}_log.txt`.
    pub fn log_file_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_log.txt", self.username))
    }

    /// Cached-token location: `{token_dir}/token_{username}.json`.
    pub fn token_file_path(&self) -> PathBuf {
        self.token_dir.join(format!("token_{}.json", self.username))
    }

    /// Idle wait as a [`Duration`].
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Chunk size rounded up to the resumable-upload granularity and capped
    /// at [`MAX_CHUNK_SIZE`].
    pub fn chunk_size(&self) -> usize {
        let granules = self
            .upload_chunk_size
            .min(MAX_CHUNK_SIZE)
            .div_ceil(UPLOAD_CHUNK_GRANULARITY)
            .max(1);
        granules * UPLOAD_CHUNK_GRANULARITY
    }
}
