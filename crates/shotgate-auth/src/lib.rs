#![warn(missing_docs)]
//! # shotgate-auth
//!
//! ## Purpose
//! Acquires and refreshes the OAuth credentials used for remote storage.
//!
//! ## Responsibilities
//! - Load installed-app client secrets and enforce HTTPS endpoints.
//! - Cache tokens per username on local disk.
//! - Refresh expired tokens, falling back to a loopback consent flow.
//! - Hand fresh bearer tokens to the uploader for the whole session.
//!
//! ## Data flow
//! Startup -> [`CredentialStore::acquire`] (cache -> refresh -> consent) ->
//! [`SessionToken`] -> [`TokenManager`] -> [`AccessTokenProvider::bearer_token`]
//! per upload, refreshing through [`AuthTransport`] when the token expires.
//!
//! ## Ownership and lifetimes
//! Token values are owned `String`s so the manager can swap them under its
//! lock without borrowing from transport responses.
//!
//! ## Error model
//! Policy violations, transport failures, and consent problems are surfaced
//! as [`AuthError`]; at startup every variant is fatal.
//!
//! ## Security and privacy notes
//! Tokens, client secrets, verifiers, and authorization codes are never
//! logged. Cached token files are created owner-only on Unix.
//!
//! ## Example
//! ```rust
//! use shotgate_auth::{AuthState, AuthStateMachine};
//!
//! let machine = AuthStateMachine::new();
//! assert!(matches!(machine.state(), AuthState::Unauthenticated));
//! ```

mod loopback;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shotgate_core::unix_timestamp_millis;
use thiserror::Error;
use url::Url;

pub use loopback::{LoopbackFlow, parse_redirect_request};

/// OAuth scope granting full Drive access.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Tokens are refreshed this long before their nominal expiry.
pub const TOKEN_EXPIRY_SKEW_MS: u64 = 60_000;

/// OAuth client registration read from the secrets file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Authorization endpoint.
    pub auth_uri: String,
    /// Token endpoint.
    pub token_uri: String,
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Reads an `installed` (or `web`) client secrets JSON file.
    ///
    /// # Errors
    /// Returns [`AuthError::Secrets`] when the file is missing or malformed,
    /// and [`AuthError::InvalidEndpoint`] for non-HTTPS endpoints.
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = fs::read(path)
            .map_err(|error| AuthError::Secrets(format!("{}: {error}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Parses client secrets from JSON bytes.
    ///
    /// # Errors
    /// See [`ClientSecrets::from_file`].
    pub fn from_json(raw: &[u8]) -> Result<Self, AuthError> {
        let file: SecretsFile = serde_json::from_slice(raw)
            .map_err(|error| AuthError::Secrets(format!("malformed secrets: {error}")))?;
        let secrets = file.installed.or(file.web).ok_or_else(|| {
            AuthError::Secrets("secrets file has no `installed` or `web` client".to_string())
        })?;

        if secrets.client_id.trim().is_empty() {
            return Err(AuthError::Secrets("client_id is empty".to_string()));
        }
        validate_https_endpoint(&secrets.auth_uri)?;
        validate_https_endpoint(&secrets.token_uri)?;
        Ok(secrets)
    }
}

/// Token payload returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    /// Present on first grant and occasionally on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes, space separated.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Cached credential with absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Bearer token used by downstream APIs.
    pub access_token: String,
    /// Long-lived token used to mint new access tokens.
    pub refresh_token: Option<String>,
    /// Absolute epoch milliseconds when the access token expires.
    pub expires_at_ms: u64,
    /// Granted scopes, space separated.
    pub scope: Option<String>,
}

impl SessionToken {
    /// Builds a token from an endpoint response received at `now_ms`.
    ///
    /// A missing refresh token in `response` keeps `previous_refresh`.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<String>,
        now_ms: u64,
    ) -> Result<Self, AuthError> {
        if response.access_token.trim().is_empty() {
            return Err(AuthError::InvalidResponse(
                "response missing access token".to_string(),
            ));
        }

        Ok(Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at_ms: now_ms.saturating_add(response.expires_in.saturating_mul(1000)),
            scope: response.scope,
        })
    }

    /// Returns `true` when the token is expired (or about to be) at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_add(TOKEN_EXPIRY_SKEW_MS) >= self.expires_at_ms
    }

    /// Returns `true` when a refresh can be attempted.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

/// Runtime authentication state tracked by [`TokenManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No token has been obtained.
    Unauthenticated,
    /// Token is currently valid.
    Authenticated(SessionToken),
    /// Token expired; a refresh is required before the next call.
    ReauthRequired(SessionToken),
}

/// Auth state machine with explicit legal transitions.
#[derive(Debug, Clone)]
pub struct AuthStateMachine {
    state: AuthState,
}

impl AuthStateMachine {
    /// Creates a new state machine in `Unauthenticated` state.
    pub fn new() -> Self {
        Self {
            state: AuthState::Unauthenticated,
        }
    }

    /// Returns current auth state snapshot.
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Applies a successful grant or refresh.
    pub fn on_token(&mut self, token: SessionToken) {
        self.state = AuthState::Authenticated(token);
    }

    /// Re-evaluates state based on token expiry.
    pub fn on_tick(&mut self, now_ms: u64) {
        if let AuthState::Authenticated(token) = &self.state
            && token.is_expired(now_ms)
        {
            self.state = AuthState::ReauthRequired(token.clone());
        }
    }

    /// Returns the bearer token when the session is usable at `now_ms`.
    pub fn usable_token(&self, now_ms: u64) -> Option<&str> {
        match &self.state {
            AuthState::Authenticated(token) if !token.is_expired(now_ms) => {
                Some(&token.access_token)
            }
            _ => None,
        }
    }
}

impl Default for AuthStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// PKCE verifier/challenge pair (S256).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    /// Secret verifier sent with the code exchange.
    pub verifier: String,
    /// Derived challenge sent with the authorization request.
    pub challenge: String,
}

impl PkceChallenge {
    /// Generates a fresh random verifier.
    pub fn generate() -> Self {
        Self::from_verifier(random_token(32))
    }

    /// Derives the S256 challenge for a known verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Returns `byte_len` random bytes as unpadded URL-safe base64.
pub fn random_token(byte_len: usize) -> String {
    let mut bytes = vec![0_u8; byte_len];
    StdRng::from_os_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Builds the consent URL the operator opens in a browser.
///
/// # Errors
/// Returns [`AuthError::InvalidEndpoint`] when `auth_uri` is unparsable.
pub fn authorization_url(
    secrets: &ClientSecrets,
    redirect_uri: &str,
    pkce: &PkceChallenge,
    state: &str,
) -> Result<Url, AuthError> {
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", DRIVE_SCOPE),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|error| AuthError::InvalidEndpoint(format!("invalid auth url: {error}")))
}

/// Validates that an OAuth endpoint uses HTTPS.
///
/// # Errors
/// Returns [`AuthError::InvalidEndpoint`] for unparsable or non-HTTPS URLs.
pub fn validate_https_endpoint(endpoint: &str) -> Result<Url, AuthError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| AuthError::InvalidEndpoint(format!("invalid url: {error}")))?;

    if parsed.scheme() != "https" {
        return Err(AuthError::InvalidEndpoint(format!(
            "{endpoint} must use https"
        )));
    }

    Ok(parsed)
}

/// Authorization code returned by the consent flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    /// One-time authorization code.
    pub code: String,
    /// Redirect URI the code was issued for.
    pub redirect_uri: String,
}

/// Interactive step obtaining an authorization code from the operator.
pub trait AuthorizationFlow: Send + Sync {
    /// Runs consent and returns the authorization code.
    ///
    /// # Errors
    /// Returns [`AuthError::Consent`] when the operator denies access or the
    /// redirect never arrives.
    fn authorize(
        &self,
        secrets: &ClientSecrets,
        pkce: &PkceChallenge,
        state: &str,
    ) -> Result<AuthorizationGrant, AuthError>;
}

/// Abstract token-endpoint transport.
pub trait AuthTransport: Send + Sync {
    /// Exchanges an authorization code for tokens.
    fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        grant: &AuthorizationGrant,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError>;

    /// Mints a new access token from a refresh token.
    fn refresh(
        &self,
        secrets: &ClientSecrets,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// Token-endpoint transport over HTTPS.
#[derive(Clone)]
pub struct UreqAuthTransport {
    agent: ureq::Agent,
}

impl UreqAuthTransport {
    /// Creates a transport with a request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn post_form(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        match self.agent.post(token_uri).send_form(form) {
            Ok(response) => response
                .into_json::<TokenResponse>()
                .map_err(|error| AuthError::InvalidResponse(error.to_string())),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(AuthError::Rejected {
                    status,
                    reason: oauth_error_code(&body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(AuthError::Transport(transport.to_string()))
            }
        }
    }
}

impl Default for UreqAuthTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl AuthTransport for UreqAuthTransport {
    fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        grant: &AuthorizationGrant,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_form(
            &secrets.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", grant.code.as_str()),
                ("redirect_uri", grant.redirect_uri.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("code_verifier", pkce_verifier),
            ],
        )
    }

    fn refresh(
        &self,
        secrets: &ClientSecrets,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_form(
            &secrets.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
            ],
        )
    }
}

/// Extracts the OAuth `error` code from an error body, never the raw body.
fn oauth_error_code(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error")?.as_str().map(str::to_string))
        .unwrap_or_else(|| "unrecognized error body".to_string())
}

/// Per-username token cache with refresh and consent fallbacks.
#[derive(Clone)]
pub struct CredentialStore {
    secrets: ClientSecrets,
    token_path: PathBuf,
    transport: Arc<dyn AuthTransport>,
    flow: Arc<dyn AuthorizationFlow>,
}

impl CredentialStore {
    /// Creates a store persisting tokens at `token_path`.
    pub fn new(
        secrets: ClientSecrets,
        token_path: impl Into<PathBuf>,
        transport: Arc<dyn AuthTransport>,
        flow: Arc<dyn AuthorizationFlow>,
    ) -> Self {
        Self {
            secrets,
            token_path: token_path.into(),
            transport,
            flow,
        }
    }

    /// Location of the cached token file.
    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Returns a usable token: cached, refreshed, or freshly granted.
    ///
    /// # Errors
    /// Returns [`AuthError`] when every source fails.
    pub fn acquire(&self, now_ms: u64) -> Result<SessionToken, AuthError> {
        if let Some(cached) = self.load_cached()? {
            if !cached.is_expired(now_ms) {
                tracing::debug!(path = %self.token_path.display(), "using cached token");
                return Ok(cached);
            }

            if cached.can_refresh() {
                match self.refresh(&cached, now_ms) {
                    Ok(token) => return Ok(token),
                    Err(error) => {
                        tracing::warn!(%error, "cached token refresh failed; requesting consent");
                    }
                }
            }
        }

        self.consent(now_ms)
    }

    /// Refreshes `token` and persists the result.
    ///
    /// # Errors
    /// Returns [`AuthError::MissingRefreshToken`] when `token` cannot be
    /// refreshed, or the transport/persistence failure.
    pub fn refresh(&self, token: &SessionToken, now_ms: u64) -> Result<SessionToken, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;

        let response = self.transport.refresh(&self.secrets, refresh_token)?;
        let refreshed =
            SessionToken::from_response(response, token.refresh_token.clone(), now_ms)?;
        self.save(&refreshed)?;
        tracing::info!("access token refreshed");
        Ok(refreshed)
    }

    fn consent(&self, now_ms: u64) -> Result<SessionToken, AuthError> {
        let pkce = PkceChallenge::generate();
        let state = random_token(16);
        let grant = self.flow.authorize(&self.secrets, &pkce, &state)?;
        let response = self
            .transport
            .exchange_code(&self.secrets, &grant, &pkce.verifier)?;
        let token = SessionToken::from_response(response, None, now_ms)?;
        self.save(&token)?;
        tracing::info!("authorization granted");
        Ok(token)
    }

    /// Reads the cached token; a corrupt cache is treated as absent.
    ///
    /// # Errors
    /// Returns [`AuthError::Cache`] for I/O failures other than not-found.
    pub fn load_cached(&self) -> Result<Option<SessionToken>, AuthError> {
        let raw = match fs::read(&self.token_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(AuthError::Cache(format!(
                    "{}: {error}",
                    self.token_path.display()
                )));
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(error) => {
                tracing::warn!(
                    path = %self.token_path.display(),
                    %error,
                    "ignoring unreadable token cache"
                );
                Ok(None)
            }
        }
    }

    /// Persists `token` to the cache file.
    ///
    /// # Errors
    /// Returns [`AuthError::Cache`] when the file cannot be written.
    pub fn save(&self, token: &SessionToken) -> Result<(), AuthError> {
        let encoded = serde_json::to_vec_pretty(token)
            .map_err(|error| AuthError::Cache(format!("token encode failed: {error}")))?;
        if let Some(parent) = self.token_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|error| AuthError::Cache(format!("{}: {error}", parent.display())))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        options
            .open(&self.token_path)
            .and_then(|mut file| file.write_all(&encoded))
            .map_err(|error| AuthError::Cache(format!("{}: {error}", self.token_path.display())))
    }
}

/// Source of bearer tokens for remote-storage calls.
pub trait AccessTokenProvider: Send + Sync {
    /// Returns a currently valid bearer token.
    ///
    /// # Errors
    /// Returns [`AuthError`] when no valid token can be produced.
    fn bearer_token(&self) -> Result<String, AuthError>;
}

/// Session-long token holder that refreshes on expiry.
pub struct TokenManager {
    store: CredentialStore,
    machine: Mutex<AuthStateMachine>,
}

impl TokenManager {
    /// Wraps a store with an already acquired token.
    pub fn new(store: CredentialStore, token: SessionToken) -> Self {
        let mut machine = AuthStateMachine::new();
        machine.on_token(token);
        Self {
            store,
            machine: Mutex::new(machine),
        }
    }

    /// Returns a valid bearer token at `now_ms`, refreshing if required.
    ///
    /// # Errors
    /// Returns [`AuthError`] when the session is unauthenticated or the
    /// refresh fails.
    pub fn bearer_token_at(&self, now_ms: u64) -> Result<String, AuthError> {
        let mut machine = self
            .machine
            .lock()
            .map_err(|_| AuthError::Cache("auth state lock poisoned".to_string()))?;
        machine.on_tick(now_ms);

        if let Some(token) = machine.usable_token(now_ms) {
            return Ok(token.to_string());
        }

        let expired = match machine.state() {
            AuthState::ReauthRequired(token) => token.clone(),
            AuthState::Unauthenticated | AuthState::Authenticated(_) => {
                return Err(AuthError::NotAuthenticated);
            }
        };
        let refreshed = self.store.refresh(&expired, now_ms)?;
        let bearer = refreshed.access_token.clone();
        machine.on_token(refreshed);
        Ok(bearer)
    }
}

impl AccessTokenProvider for TokenManager {
    fn bearer_token(&self) -> Result<String, AuthError> {
        self.bearer_token_at(unix_timestamp_millis())
    }
}

/// Errors produced by credential acquisition and refresh.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Endpoint violates security or contract requirements.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Client secrets file is missing or malformed.
    #[error("client secrets unavailable: {0}")]
    Secrets(String),
    /// Token cache could not be read or written.
    #[error("token cache failure: {0}")]
    Cache(String),
    /// Operator consent failed.
    #[error("authorization consent failed: {0}")]
    Consent(String),
    /// Transport failure reaching the token endpoint.
    #[error("auth transport failure: {0}")]
    Transport(String),
    /// Token endpoint rejected the request.
    #[error("token endpoint rejected request ({status}): {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// OAuth error code from the response body.
        reason: String,
    },
    /// Response payload violated the OAuth contract.
    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
    /// Token cannot be refreshed.
    #[error("token has no refresh token")]
    MissingRefreshToken,
    /// No token has been obtained yet.
    #[error("session is not authenticated")]
    NotAuthenticated,
}
