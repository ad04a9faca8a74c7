//! Integration tests for token caching, refresh, and consent fallback.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use shotgate_auth::{
    AuthError, AuthTransport, AuthorizationFlow, AuthorizationGrant, ClientSecrets,
    CredentialStore, PkceChallenge, SessionToken, TokenManager, TokenResponse,
};

#[derive(Default)]
struct CountingTransport {
    exchanges: AtomicU32,
    refreshes: AtomicU32,
    fail_refresh: bool,
}

impl AuthTransport for CountingTransport {
    fn exchange_code(
        &self,
        _secrets: &ClientSecrets,
        grant: &AuthorizationGrant,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        assert_eq!(grant.code, "granted-code");
        assert!(!pkce_verifier.is_empty());
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(TokenResponse {
            access_token: "fresh-access".to_string(),
            expires_in: 3_600,
            refresh_token: Some("fresh-refresh".to_string()),
            scope: None,
        })
    }

    fn refresh(
        &self,
        _secrets: &ClientSecrets,
        refresh_token: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(AuthError::Rejected {
                status: 400,
                reason: "invalid_grant".to_string(),
            });
        }
        assert_eq!(refresh_token, "old-refresh");
        Ok(TokenResponse {
            access_token: "refreshed-access".to_string(),
            expires_in: 3_600,
            refresh_token: None,
            scope: None,
        })
    }
}

#[derive(Default)]
struct ScriptedConsent {
    calls: AtomicU32,
}

impl AuthorizationFlow for ScriptedConsent {
    fn authorize(
        &self,
        _secrets: &ClientSecrets,
        pkce: &PkceChallenge,
        state: &str,
    ) -> Result<AuthorizationGrant, AuthError> {
        assert!(!pkce.challenge.is_empty());
        assert!(!state.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AuthorizationGrant {
            code: "granted-code".to_string(),
            redirect_uri: "http://127.0.0.1:9/".to_string(),
        })
    }
}

fn secrets() -> ClientSecrets {
    ClientSecrets::from_json(
        br#"{"installed":{"client_id":"client","client_secret":"secret",
            "auth_uri":"https://accounts.example.test/o/oauth2/auth",
            "token_uri":"https://oauth2.example.test/token"}}"#,
    )
    .expect("secrets should parse")
}

fn write_cached(path: &Path, expires_at_ms: u64) {
    let token = SessionToken {
        access_token: "old-access".to_string(),
        refresh_token: Some("old-refresh".to_string()),
        expires_at_ms,
        scope: None,
    };
    fs::write(path, serde_json::to_vec(&token).expect("encode")).expect("cache should be written");
}

#[test]
fn credential_store_tests_valid_cache_needs_no_network() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("token_player1.json");
    write_cached(&path, 10_000_000);
    let transport = Arc::new(CountingTransport::default());
    let consent = Arc::new(ScriptedConsent::default());
    let store = CredentialStore::new(secrets(), &path, transport.clone(), consent.clone());

    let token = store.acquire(1_000).expect("cached token should be used");

    assert_eq!(token.access_token, "old-access");
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(consent.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn credential_store_tests_expired_cache_is_refreshed_and_saved() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("token_player1.json");
    write_cached(&path, 1_000);
    let transport = Arc::new(CountingTransport::default());
    let consent = Arc::new(ScriptedConsent::default());
    let store = CredentialStore::new(secrets(), &path, transport.clone(), consent.clone());

    let token = store.acquire(5_000).expect("token should refresh");

    assert_eq!(token.access_token, "refreshed-access");
    assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
    assert_eq!(token.expires_at_ms, 5_000 + 3_600_000);
    assert_eq!(consent.calls.load(Ordering::SeqCst), 0);
    let saved = store.load_cached().expect("cache readable").expect("cache present");
    assert_eq!(saved, token);
}

#[test]
fn credential_store_tests_missing_cache_runs_consent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("nested").join("token_player1.json");
    let transport = Arc::new(CountingTransport::default());
    let consent = Arc::new(ScriptedConsent::default());
    let store = CredentialStore::new(secrets(), &path, transport.clone(), consent.clone());

    let token = store.acquire(0).expect("consent should grant a token");

    assert_eq!(token.access_token, "fresh-access");
    assert_eq!(consent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.exchanges.load(Ordering::SeqCst), 1);
    assert!(path.is_file());
}

#[test]
fn credential_store_tests_rejected_refresh_falls_back_to_consent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("token_player1.json");
    write_cached(&path, 1_000);
    let transport = Arc::new(CountingTransport {
        fail_refresh: true,
        ..CountingTransport::default()
    });
    let consent = Arc::new(ScriptedConsent::default());
    let store = CredentialStore::new(secrets(), &path, transport.clone(), consent.clone());

    let token = store.acquire(5_000).expect("consent should recover");

    assert_eq!(token.access_token, "fresh-access");
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(consent.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn credential_store_tests_corrupt_cache_is_treated_as_absent() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("token_player1.json");
    fs::write(&path, b"pickle bytes").expect("cache should be written");
    let store = CredentialStore::new(
        secrets(),
        &path,
        Arc::new(CountingTransport::default()),
        Arc::new(ScriptedConsent::default()),
    );

    assert!(store.load_cached().expect("corrupt cache is not an error").is_none());
}

#[test]
fn credential_store_tests_token_manager_refreshes_mid_session() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("token_player1.json");
    let transport = Arc::new(CountingTransport::default());
    let store = CredentialStore::new(
        secrets(),
        &path,
        transport.clone(),
        Arc::new(ScriptedConsent::default()),
    );
    let manager = TokenManager::new(
        store,
        SessionToken {
            access_token: "old-access".to_string(),
            refresh_token: Some("old-refresh".to_string()),
            expires_at_ms: 200_000,
            scope: None,
        },
    );

    assert_eq!(manager.bearer_token_at(10_000).expect("valid"), "old-access");
    assert_eq!(
        manager.bearer_token_at(150_000).expect("refreshed"),
        "refreshed-access"
    );
    assert_eq!(
        manager.bearer_token_at(151_000).expect("still valid"),
        "refreshed-access"
    );
    assert_eq!(transport.refreshes.load(Ordering::SeqCst), 1);
}

#[test]
fn credential_store_tests_secrets_require_https_endpoints() {
    let result = ClientSecrets::from_json(
        br#"{"installed":{"client_id":"client","client_secret":"secret",
            "auth_uri":"http://accounts.example.test/auth",
            "token_uri":"https://oauth2.example.test/token"}}"#,
    );
    assert!(matches!(result, Err(AuthError::InvalidEndpoint(_))));
    assert!(matches!(
        ClientSecrets::from_json(br#"{"other":{}}"#),
        Err(AuthError::Secrets(_))
    ));
}
