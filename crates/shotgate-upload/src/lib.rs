#![warn(missing_docs)]
//! # shotgate-upload
//!
//! ## Purpose
//! Places cached captures into the per-user remote folder.
//!
//! ## Responsibilities
//! - Provision the `{root}/{username}` folder pair (lookup or create).
//! - Transfer files with resumable, chunked upload semantics.
//! - Classify failures so transient chunk errors resume from the committed
//!   offset instead of byte zero.
//!
//! ## Data flow
//! Session controller -> [`RemoteUploader::upload`] -> [`DriveClient`] ->
//! [`DriveTransport`] (session start, chunk puts, status probes) ->
//! [`RemoteObject`] with id and link.
//!
//! ## Ownership and lifetimes
//! The uploader only borrows the local path; the file stays on disk whatever
//! the outcome and remains the fallback of record.
//!
//! ## Error model
//! All failures are returned as [`UploadError`]; nothing here retries a whole
//! upload. [`classify_upload_error`] decides whether a chunk failure is worth
//! a status probe within the same attempt.

mod drive_http;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shotgate_auth::{AccessTokenProvider, AuthError};
use shotgate_core::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, RemoteObject, UPLOAD_CHUNK_GRANULARITY};
use thiserror::Error;

pub use drive_http::{UreqDriveTransport, content_range, folder_query, parse_committed_range};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// MIME type of cached captures.
pub const PNG_MIME_TYPE: &str = "image/png";

/// Trait implemented by remote stores accepting cached captures.
pub trait RemoteUploader: Send + Sync {
    /// Uploads `local_path` as `filename` into the session's remote folder.
    ///
    /// # Errors
    /// Returns [`UploadError`] on any failure; the local file is untouched.
    fn upload(&self, local_path: &Path, filename: &str) -> Result<RemoteObject, UploadError>;
}

/// Metadata sent when a resumable session opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    /// Remote file name.
    pub name: String,
    /// Parent folder ids.
    pub parents: Vec<String>,
    /// Content MIME type.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// State of a resumable session after a chunk or status probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    /// Server holds bytes `[0, committed)`.
    Incomplete {
        /// Next byte offset the server expects.
        committed: u64,
    },
    /// Upload finished; the remote object is available.
    Complete(RemoteObject),
}

/// Remote-storage primitives used by [`DriveClient`].
pub trait DriveTransport: Send + Sync {
    /// Looks up a non-trashed folder by name and optional parent.
    fn find_folder(
        &self,
        token: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, UploadError>;

    /// Creates a folder and returns its id.
    fn create_folder(
        &self,
        token: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, UploadError>;

    /// Opens a resumable upload session and returns its URI.
    fn start_resumable(
        &self,
        token: &str,
        metadata: &FileMetadata,
        total_len: u64,
    ) -> Result<String, UploadError>;

    /// Sends `bytes` starting at `offset`.
    fn put_chunk(
        &self,
        token: &str,
        session_uri: &str,
        offset: u64,
        bytes: &[u8],
        total_len: u64,
    ) -> Result<ChunkStatus, UploadError>;

    /// Asks how many bytes the session has committed.
    fn query_status(
        &self,
        token: &str,
        session_uri: &str,
        total_len: u64,
    ) -> Result<ChunkStatus, UploadError>;
}

/// Bounds on status probes within one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePolicy {
    /// Maximum status probes after transient chunk failures.
    pub max_resumes: u32,
    /// Pause before each probe.
    pub backoff_ms: u64,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self {
            max_resumes: 3,
            backoff_ms: 500,
        }
    }
}

/// Failure category used to decide whether a chunk can be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; probing the session may recover.
    Retriable,
    /// Permanent for this attempt.
    Permanent,
}

/// Classifies upload errors into retriable vs permanent failures.
pub fn classify_upload_error(error: &UploadError) -> FailureClass {
    match error {
        UploadError::Timeout
        | UploadError::Transport(_)
        | UploadError::RateLimited
        | UploadError::Server(_) => FailureClass::Retriable,
        UploadError::Client(_)
        | UploadError::Auth(_)
        | UploadError::Local(_)
        | UploadError::Protocol(_)
        | UploadError::Stalled { .. } => FailureClass::Permanent,
    }
}

/// Drive operations with token handling and chunked transfer.
#[derive(Clone)]
pub struct DriveClient {
    transport: Arc<dyn DriveTransport>,
    tokens: Arc<dyn AccessTokenProvider>,
    chunk_size: usize,
    resume: ResumePolicy,
}

impl DriveClient {
    /// Creates a client with default chunk size and resume policy.
    pub fn new(transport: Arc<dyn DriveTransport>, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            transport,
            tokens,
            chunk_size: DEFAULT_CHUNK_SIZE,
            resume: ResumePolicy::default(),
        }
    }

    /// Overrides the chunk size, rounded up to the upload granularity and
    /// capped at [`MAX_CHUNK_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size
            .min(MAX_CHUNK_SIZE)
            .div_ceil(UPLOAD_CHUNK_GRANULARITY)
            .max(1)
            * UPLOAD_CHUNK_GRANULARITY;
        self
    }

    /// Overrides the resume policy.
    pub fn with_resume_policy(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }

    /// Effective chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn bearer(&self) -> Result<String, UploadError> {
        self.tokens.bearer_token().map_err(UploadError::from)
    }

    /// Returns the id of folder `name` under `parent`, creating it if absent.
    ///
    /// # Errors
    /// Propagates lookup/creation failures.
    pub fn ensure_folder(&self, name: &str, parent: Option<&str>) -> Result<String, UploadError> {
        let token = self.bearer()?;
        if let Some(id) = self.transport.find_folder(&token, name, parent)? {
            tracing::debug!(folder = name, "found remote folder");
            return Ok(id);
        }

        let id = self.transport.create_folder(&token, name, parent)?;
        tracing::info!(folder = name, "created remote folder");
        Ok(id)
    }

    /// Provisions `{root}/{username}` and returns the user folder id.
    ///
    /// # Errors
    /// Propagates lookup/creation failures.
    pub fn ensure_user_folder(&self, root: &str, username: &str) -> Result<String, UploadError> {
        let root_id = self.ensure_folder(root, None)?;
        self.ensure_folder(username, Some(&root_id))
    }

    /// Uploads one file into `folder_id` with resumable chunks.
    ///
    /// # Errors
    /// Returns [`UploadError`] when the file cannot be read, the session
    /// cannot be opened, or a chunk fails permanently or past the resume
    /// budget.
    pub fn upload_file(
        &self,
        folder_id: &str,
        local_path: &Path,
        filename: &str,
    ) -> Result<RemoteObject, UploadError> {
        let mut file = File::open(local_path)
            .map_err(|error| UploadError::Local(format!("{}: {error}", local_path.display())))?;
        let total_len = file
            .metadata()
            .map_err(|error| UploadError::Local(format!("{}: {error}", local_path.display())))?
            .len();
        if total_len == 0 {
            return Err(UploadError::Local(format!(
                "{} is empty",
                local_path.display()
            )));
        }

        let metadata = FileMetadata {
            name: filename.to_string(),
            parents: vec![folder_id.to_string()],
            mime_type: PNG_MIME_TYPE.to_string(),
        };
        let session_uri = self
            .transport
            .start_resumable(&self.bearer()?, &metadata, total_len)?;

        let mut offset = 0_u64;
        let mut resumes = 0_u32;
        let mut buffer = vec![0_u8; self.chunk_size];

        loop {
            let remaining = total_len - offset;
            let len = remaining.min(self.chunk_size as u64) as usize;
            read_chunk(&mut file, offset, &mut buffer[..len], local_path)?;

            let sent = self.transport.put_chunk(
                &self.bearer()?,
                &session_uri,
                offset,
                &buffer[..len],
                total_len,
            );

            let (status, probed) = match sent {
                Ok(status) => (status, false),
                Err(error) if classify_upload_error(&error) == FailureClass::Retriable => {
                    if resumes >= self.resume.max_resumes {
                        return Err(error);
                    }
                    resumes += 1;
                    tracing::warn!(%error, offset, resumes, "chunk failed; probing session");
                    std::thread::sleep(Duration::from_millis(self.resume.backoff_ms));
                    match self
                        .transport
                        .query_status(&self.bearer()?, &session_uri, total_len)
                    {
                        Ok(status) => (status, true),
                        Err(error) if classify_upload_error(&error) == FailureClass::Retriable => {
                            continue;
                        }
                        Err(error) => return Err(error),
                    }
                }
                Err(error) => return Err(error),
            };

            match status {
                ChunkStatus::Complete(object) => return Ok(object),
                ChunkStatus::Incomplete { committed } if committed >= total_len => {
                    return Err(UploadError::Protocol(format!(
                        "server committed {committed} of {total_len} bytes"
                    )));
                }
                ChunkStatus::Incomplete { committed } => {
                    // A successful put that commits nothing new counts against the budget.
                    if !probed && committed <= offset {
                        if resumes >= self.resume.max_resumes {
                            return Err(UploadError::Stalled { committed });
                        }
                        resumes += 1;
                    }
                    offset = committed;
                }
            }
        }
    }
}

fn read_chunk(
    file: &mut File,
    offset: u64,
    buffer: &mut [u8],
    local_path: &Path,
) -> Result<(), UploadError> {
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(buffer))
        .map_err(|error| UploadError::Local(format!("{}: {error}", local_path.display())))
}

/// [`RemoteUploader`] bound to one provisioned user folder.
#[derive(Clone)]
pub struct DriveUploader {
    client: DriveClient,
    folder_id: String,
}

impl DriveUploader {
    /// Binds `client` to `folder_id`.
    pub fn new(client: DriveClient, folder_id: impl Into<String>) -> Self {
        Self {
            client,
            folder_id: folder_id.into(),
        }
    }

    /// Remote folder receiving uploads.
    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }
}

impl RemoteUploader for DriveUploader {
    fn upload(&self, local_path: &Path, filename: &str) -> Result<RemoteObject, UploadError> {
        self.client.upload_file(&self.folder_id, local_path, filename)
    }
}

/// Upload error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Request timed out.
    #[error("request timed out")]
    Timeout,
    /// Network-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Server asked the client to slow down (HTTP 429).
    #[error("rate limited")]
    RateLimited,
    /// Server-side failure (HTTP 5xx).
    #[error("server error: {0}")]
    Server(u16),
    /// Request rejected (HTTP 4xx).
    #[error("client error: {0}")]
    Client(u16),
    /// No usable credential.
    #[error("authorization failure: {0}")]
    Auth(String),
    /// Local file could not be read.
    #[error("local file failure: {0}")]
    Local(String),
    /// Server reply violated the upload protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Server stopped accepting bytes.
    #[error("upload stalled at {committed} bytes")]
    Stalled {
        /// Last committed offset.
        committed: u64,
    },
}

impl From<AuthError> for UploadError {
    fn from(error: AuthError) -> Self {
        Self::Auth(error.to_string())
    }
}
