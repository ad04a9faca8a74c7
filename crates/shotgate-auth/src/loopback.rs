//! Loopback-redirect consent flow for installed applications.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use url::Url;

use crate::{
    AuthError, AuthorizationFlow, AuthorizationGrant, ClientSecrets, PkceChallenge,
    authorization_url,
};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const SUCCESS_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nConnection: close\r\n\r\nAuthorization received. You can close this tab.\r\n";
const NOT_FOUND_RESPONSE: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// Prints the consent URL and waits for the browser redirect on
/// `127.0.0.1` at an ephemeral port.
#[derive(Debug, Clone)]
pub struct LoopbackFlow {
    timeout: Duration,
    interrupt: Option<Arc<AtomicBool>>,
}

impl LoopbackFlow {
    /// Creates a flow that gives up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interrupt: None,
        }
    }

    /// Abandons the wait as soon as `interrupt` is set.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn wait_for_code(
        &self,
        listener: &TcpListener,
        state: &str,
    ) -> Result<String, AuthError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if self.interrupted() {
                return Err(AuthError::Consent(
                    "interrupted while waiting for the browser redirect".to_string(),
                ));
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    if let Some(code) = serve_redirect(stream, state)? {
                        return Ok(code);
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(AuthError::Consent(
                            "timed out waiting for the browser redirect".to_string(),
                        ));
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(error) => {
                    return Err(AuthError::Consent(format!("redirect listener failed: {error}")));
                }
            }
        }
    }
}

impl Default for LoopbackFlow {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl AuthorizationFlow for LoopbackFlow {
    fn authorize(
        &self,
        secrets: &ClientSecrets,
        pkce: &PkceChallenge,
        state: &str,
    ) -> Result<AuthorizationGrant, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .map_err(|error| AuthError::Consent(format!("cannot bind redirect port: {error}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|error| AuthError::Consent(format!("redirect listener setup: {error}")))?;
        let port = listener
            .local_addr()
            .map_err(|error| AuthError::Consent(format!("redirect listener address: {error}")))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");

        let url = authorization_url(secrets, &redirect_uri, pkce, state)?;
        println!("Open this URL in your browser to authorize remote storage access:\n\n{url}\n");
        tracing::info!(port, "waiting for authorization redirect");

        let code = self.wait_for_code(&listener, state)?;
        Ok(AuthorizationGrant { code, redirect_uri })
    }
}

fn serve_redirect(stream: TcpStream, state: &str) -> Result<Option<String>, AuthError> {
    stream
        .set_nonblocking(false)
        .map_err(|error| AuthError::Consent(format!("redirect stream setup: {error}")))?;
    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .map_err(|error| AuthError::Consent(format!("redirect read failed: {error}")))?;

    let outcome = parse_redirect_request(&request_line, state);
    let response = match &outcome {
        Ok(Some(_)) | Err(_) => SUCCESS_RESPONSE,
        Ok(None) => NOT_FOUND_RESPONSE,
    };
    let _ = (&stream).write_all(response.as_bytes());
    outcome
}

/// Extracts the authorization code from one HTTP request line.
///
/// Returns `Ok(None)` for unrelated requests such as `/favicon.ico`.
///
/// # Errors
/// Returns [`AuthError::Consent`] when the provider reported an error or the
/// `state` parameter does not match.
pub fn parse_redirect_request(
    request_line: &str,
    expected_state: &str,
) -> Result<Option<String>, AuthError> {
    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };

    let url = Url::parse("http://127.0.0.1")
        .and_then(|base| base.join(target))
        .map_err(|error| AuthError::Consent(format!("malformed redirect: {error}")))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(AuthError::Consent(format!(
                    "provider returned error: {value}"
                )));
            }
            _ => {}
        }
    }

    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::Consent("redirect state mismatch".to_string()));
    }

    Ok(Some(code))
}
