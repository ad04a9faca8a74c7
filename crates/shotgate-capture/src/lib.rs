#![warn(missing_docs)]
//! # shotgate-capture
//!
//! ## Purpose
//! Grabs full-screen frames and persists them to the local capture cache.
//!
//! ## Responsibilities
//! - Define a backend-agnostic capture trait.
//! - Expose real primary-display capture on supported platforms.
//! - Expose deterministic synthetic capture for CI and unit tests.
//! - Write PNG captures under timestamp-derived, never-overwritten names.
//!
//! ## Data flow
//! Session controller -> [`LocalCacheWriter::write_capture`] -> backend
//! [`Frame`] -> PNG bytes -> `{output_dir}/{prefix}_{date}_{time}_{ms}.png`.
//!
//! ## Ownership and lifetimes
//! Captured frames are owned values; the writer hands the resulting path to
//! the uploader inside a [`CaptureArtifact`] and never touches it again.
//!
//! ## Error model
//! Backend, encode, and I/O failures are all reported as [`CaptureError`].
//! A partially written file is removed before the error is returned.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use shotgate_core::{
    CaptureArtifact, CoreError, Frame, capture_filename, local_datetime_from_ms,
    unix_timestamp_millis, with_collision_suffix,
};
use thiserror::Error;

/// Upper bound on `_n` suffixes tried for one capture instant.
pub const MAX_COLLISION_SUFFIX: u32 = 1_000;

/// Trait implemented by concrete capture providers.
pub trait CaptureBackend: Send + Sync {
    /// Captures one full frame of the primary display.
    ///
    /// # Errors
    /// Returns [`CaptureError::Backend`] when the grab fails.
    fn capture_primary(&self, captured_at_ms: u64) -> Result<Frame, CaptureError>;
}

/// Real display capture backend for supported desktop targets.
///
/// # Notes
/// The primary display is chosen at discovery; each capture reacquires the
/// current screen handles so a display change between captures is tolerated.
#[derive(Debug, Clone)]
pub struct RealCaptureBackend {
    displays: Vec<RealDisplayRecord>,
}

#[derive(Debug, Clone)]
#[cfg_attr(not(windows), allow(dead_code))]
struct RealDisplayRecord {
    #[cfg(windows)]
    index: usize,
    id: String,
    primary: bool,
}

impl RealCaptureBackend {
    /// Discovers currently available displays.
    ///
    /// # Errors
    /// Returns [`CaptureError::Backend`] when display enumeration fails or no
    /// displays are available.
    pub fn discover() -> Result<Self, CaptureError> {
        #[cfg(windows)]
        {
            use screenshots::Screen;

            let screens = Screen::all().map_err(|error| {
                CaptureError::Backend(format!("screen enumeration failed: {error}"))
            })?;

            if screens.is_empty() {
                return Err(CaptureError::Backend(
                    "no displays were reported by the OS".to_string(),
                ));
            }

            let displays = screens
                .into_iter()
                .enumerate()
                .map(|(index, screen)| RealDisplayRecord {
                    index,
                    id: format!("display-{index}"),
                    primary: screen.display_info.is_primary,
                })
                .collect();

            let backend = Self { displays };
            let primary = backend.primary_record()?;
            tracing::info!(
                display = %primary.id,
                available = backend.displays.len(),
                "capturing primary display"
            );
            Ok(backend)
        }

        #[cfg(not(windows))]
        {
            Err(CaptureError::Backend(
                "real capture backend is currently implemented for Windows only".to_string(),
            ))
        }
    }

    fn primary_record(&self) -> Result<&RealDisplayRecord, CaptureError> {
        self.displays
            .iter()
            .find(|record| record.primary)
            .or_else(|| self.displays.first())
            .ok_or_else(|| CaptureError::Backend("no display available".to_string()))
    }
}

impl CaptureBackend for RealCaptureBackend {
    fn capture_primary(&self, captured_at_ms: u64) -> Result<Frame, CaptureError> {
        let record = self.primary_record()?;

        #[cfg(windows)]
        {
            use screenshots::Screen;

            let screens = Screen::all().map_err(|error| {
                CaptureError::Backend(format!("screen refresh failed: {error}"))
            })?;
            let screen = screens.get(record.index).ok_or_else(|| {
                CaptureError::Backend(format!(
                    "display index {} is not available anymore",
                    record.index
                ))
            })?;

            let captured = screen.capture().map_err(|error| {
                CaptureError::Backend(format!("screen capture failed: {error}"))
            })?;
            let width = captured.width();
            let height = captured.height();
            let rgba = captured.into_raw();

            Frame::new(record.id.clone(), width, height, captured_at_ms, rgba)
                .map_err(CaptureError::Core)
        }

        #[cfg(not(windows))]
        {
            let _ = record;
            let _ = captured_at_ms;
            Err(CaptureError::Backend(
                "real capture backend is currently implemented for Windows only".to_string(),
            ))
        }
    }
}

/// Deterministic synthetic backend for test and CI usage.
#[derive(Debug)]
pub struct SyntheticCaptureBackend {
    width: u32,
    height: u32,
    sequence: Mutex<u64>,
}

impl SyntheticCaptureBackend {
    /// Creates a synthetic 4x4 primary display.
    pub fn new() -> Self {
        Self::with_size(4, 4)
    }

    /// Creates a synthetic primary display of the given size.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: Mutex::new(0),
        }
    }
}

impl Default for SyntheticCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SyntheticCaptureBackend {
    fn capture_primary(&self, captured_at_ms: u64) -> Result<Frame, CaptureError> {
        let mut sequence = self
            .sequence
            .lock()
            .map_err(|_| CaptureError::Backend("synthetic sequence lock poisoned".to_string()))?;
        *sequence += 1;

        let byte = (*sequence % 255) as u8;
        let rgba_len = (self.width as usize) * (self.height as usize) * 4;

        Frame::new(
            "display-1".to_string(),
            self.width,
            self.height,
            captured_at_ms,
            vec![byte; rgba_len],
        )
        .map_err(CaptureError::Core)
    }
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Persists captures under the session's output directory.
#[derive(Clone)]
pub struct LocalCacheWriter {
    backend: Arc<dyn CaptureBackend>,
    output_dir: PathBuf,
    prefix: String,
    clock: Clock,
}

impl LocalCacheWriter {
    /// Creates a writer using the wall clock.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            clock: Arc::new(unix_timestamp_millis),
        }
    }

    /// Replaces the millisecond clock used to stamp captures.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Directory captures are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Grabs the screen and writes it as a PNG file.
    ///
    /// # Errors
    /// Returns [`CaptureError`] when the grab, encoding, directory creation,
    /// or file write fails. No file is left behind on failure.
    pub fn write_capture(&self) -> Result<CaptureArtifact, CaptureError> {
        let captured_at_ms = (self.clock)();
        let frame = self.backend.capture_primary(captured_at_ms)?;
        let at = local_datetime_from_ms(captured_at_ms).map_err(CaptureError::Core)?;
        let base_name = capture_filename(&self.prefix, at);
        let png = encode_png(&frame)?;

        std::fs::create_dir_all(&self.output_dir).map_err(|source| CaptureError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let (filename, path, mut file) = self.create_unique(&base_name)?;
        if let Err(source) = file.write_all(&png).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(CaptureError::Io { path, source });
        }

        Ok(CaptureArtifact::local(captured_at_ms, filename, path))
    }

    fn create_unique(&self, base_name: &str) -> Result<(String, PathBuf, File), CaptureError> {
        for attempt in 0..=MAX_COLLISION_SUFFIX {
            let filename = if attempt == 0 {
                base_name.to_string()
            } else {
                with_collision_suffix(base_name, attempt)
            };
            let path = self.output_dir.join(&filename);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((filename, path, file)),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(CaptureError::Io { path, source }),
            }
        }

        Err(CaptureError::NameExhausted(base_name.to_string()))
    }
}

/// Encodes a frame as an RGBA PNG.
///
/// # Errors
/// Returns [`CaptureError::Encode`] when the encoder rejects the frame.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, CaptureError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            &frame.rgba,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|error| CaptureError::Encode(error.to_string()))?;
    Ok(bytes)
}

/// Capture layer error type.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Backend runtime failure.
    #[error("capture backend failure: {0}")]
    Backend(String),
    /// Frame violated core validation.
    #[error("invalid frame: {0}")]
    Core(CoreError),
    /// PNG encoding failed.
    #[error("png encoding failed: {0}")]
    Encode(String),
    /// Filesystem failure while writing the cache.
    #[error("write to {path} failed: {source}")]
    Io {
        /// Path being created or written.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// Every suffixed name for this instant is taken.
    #[error("no free filename derived from {0}")]
    NameExhausted(String),
}
