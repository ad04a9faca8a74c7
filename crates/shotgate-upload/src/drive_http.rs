//! HTTPS transport for the Drive v3 API.

use std::io::ErrorKind;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use shotgate_core::RemoteObject;

use crate::{ChunkStatus, DriveTransport, FOLDER_MIME_TYPE, FileMetadata, UploadError};

const FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/drive/v3/files";
const RESUME_INCOMPLETE: u16 = 308;

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
}

#[derive(Debug, Deserialize)]
struct FileResource {
    id: String,
    #[serde(rename = "webViewLink")]
    web_view_link: Option<String>,
}

/// [`DriveTransport`] backed by a blocking `ureq` agent.
///
/// Redirects are disabled so `308 Resume Incomplete` reaches the caller.
#[derive(Clone)]
pub struct UreqDriveTransport {
    agent: ureq::Agent,
}

impl UreqDriveTransport {
    /// Creates a transport with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .redirects(0)
                .build(),
        }
    }

    fn chunk_reply(
        &self,
        outcome: Result<ureq::Response, ureq::Error>,
    ) -> Result<ChunkStatus, UploadError> {
        let response = outcome.map_err(map_ureq_error)?;
        if response.status() == RESUME_INCOMPLETE {
            let committed = parse_committed_range(response.header("Range"))?;
            return Ok(ChunkStatus::Incomplete { committed });
        }

        let file = response
            .into_json::<FileResource>()
            .map_err(|error| UploadError::Protocol(format!("file resource: {error}")))?;
        Ok(ChunkStatus::Complete(RemoteObject {
            id: file.id,
            link: file.web_view_link,
        }))
    }
}

impl Default for UreqDriveTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl DriveTransport for UreqDriveTransport {
    fn find_folder(
        &self,
        token: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<String>, UploadError> {
        let list = self
            .agent
            .get(FILES_ENDPOINT)
            .set("Authorization", &format!("Bearer {token}"))
            .query("q", &folder_query(name, parent))
            .query("spaces", "drive")
            .query("pageSize", "1")
            .query("fields", "files(id,name)")
            .call()
            .map_err(map_ureq_error)?
            .into_json::<FileList>()
            .map_err(|error| UploadError::Protocol(format!("file list: {error}")))?;

        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    fn create_folder(
        &self,
        token: &str,
        name: &str,
        parent: Option<&str>,
    ) -> Result<String, UploadError> {
        let mut body = json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        if let Some(parent) = parent {
            body["parents"] = json!([parent]);
        }

        let file = self
            .agent
            .post(FILES_ENDPOINT)
            .set("Authorization", &format!("Bearer {token}"))
            .query("fields", "id")
            .send_json(body)
            .map_err(map_ureq_error)?
            .into_json::<FileResource>()
            .map_err(|error| UploadError::Protocol(format!("folder resource: {error}")))?;
        Ok(file.id)
    }

    fn start_resumable(
        &self,
        token: &str,
        metadata: &FileMetadata,
        total_len: u64,
    ) -> Result<String, UploadError> {
        let response = self
            .agent
            .post(UPLOAD_ENDPOINT)
            .set("Authorization", &format!("Bearer {token}"))
            .set("X-Upload-Content-Type", &metadata.mime_type)
            .set("X-Upload-Content-Length", &total_len.to_string())
            .query("uploadType", "resumable")
            .query("fields", "id,webViewLink")
            .send_json(metadata)
            .map_err(map_ureq_error)?;

        response
            .header("Location")
            .map(str::to_string)
            .ok_or_else(|| UploadError::Protocol("session start without Location".to_string()))
    }

    fn put_chunk(
        &self,
        token: &str,
        session_uri: &str,
        offset: u64,
        bytes: &[u8],
        total_len: u64,
    ) -> Result<ChunkStatus, UploadError> {
        let outcome = self
            .agent
            .put(session_uri)
            .set("Authorization", &format!("Bearer {token}"))
            .set(
                "Content-Range",
                &content_range(offset, bytes.len() as u64, total_len),
            )
            .send_bytes(bytes);
        self.chunk_reply(outcome)
    }

    fn query_status(
        &self,
        token: &str,
        session_uri: &str,
        total_len: u64,
    ) -> Result<ChunkStatus, UploadError> {
        let outcome = self
            .agent
            .put(session_uri)
            .set("Authorization", &format!("Bearer {token}"))
            .set("Content-Range", &format!("bytes */{total_len}"))
            .send_bytes(&[]);
        self.chunk_reply(outcome)
    }
}

/// Builds the Drive search query for a non-trashed folder.
///
/// Single quotes and backslashes in `name` are escaped.
pub fn folder_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name='{}' and mimeType='{FOLDER_MIME_TYPE}' and trashed=false",
        escape_query_literal(name)
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query_literal(parent)));
    }
    query
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Formats the `Content-Range` header for a chunk of `len` bytes.
pub fn content_range(offset: u64, len: u64, total_len: u64) -> String {
    format!("bytes {offset}-{}/{total_len}", offset + len.saturating_sub(1))
}

/// Converts a `Range: bytes=0-N` reply header into the next offset to send.
///
/// A missing header means nothing has been committed yet.
///
/// # Errors
/// Returns [`UploadError::Protocol`] when the header is malformed.
pub fn parse_committed_range(header: Option<&str>) -> Result<u64, UploadError> {
    let Some(header) = header else {
        return Ok(0);
    };

    header
        .trim()
        .strip_prefix("bytes=")
        .and_then(|range| range.split_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map(|last| last + 1)
        .ok_or_else(|| UploadError::Protocol(format!("malformed Range header: {header}")))
}

fn map_ureq_error(error: ureq::Error) -> UploadError {
    match error {
        ureq::Error::Status(429, _) => UploadError::RateLimited,
        ureq::Error::Status(status, _) if status >= 500 => UploadError::Server(status),
        ureq::Error::Status(status, _) => UploadError::Client(status),
        ureq::Error::Transport(transport) => {
            let timed_out = std::error::Error::source(&transport)
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .is_some_and(|io| matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock));
            if timed_out {
                UploadError::Timeout
            } else {
                UploadError::Transport(transport.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_query_escapes_quotes_and_scopes_parent() {
        let query = folder_query("o'neil\\x", Some("root-1"));
        assert_eq!(
            query,
            "name='o\\'neil\\\\x' and mimeType='application/vnd.google-apps.folder' \
             and trashed=false and 'root-1' in parents"
        );
        assert!(!folder_query("ApexDataset", None).contains("in parents"));
    }

    #[test]
    fn content_range_is_inclusive() {
        assert_eq!(content_range(0, 262_144, 300_000), "bytes 0-262143/300000");
        assert_eq!(content_range(262_144, 37_856, 300_000), "bytes 262144-299999/300000");
    }

    #[test]
    fn committed_range_parsing() {
        assert_eq!(parse_committed_range(None).expect("absent"), 0);
        assert_eq!(
            parse_committed_range(Some("bytes=0-524287")).expect("range"),
            524_288
        );
        assert!(parse_committed_range(Some("items=0-1")).is_err());
    }
}
