//! Integration tests for log redaction.

use shotgate_app::redact_sensitive;

#[test]
fn log_redaction_tests_removes_bearer_credentials() {
    let redacted = redact_sensitive("authorization=Bearer abc123");

    assert!(redacted.contains("<redacted>"));
    assert!(!redacted.contains("abc123"));
}

#[test]
fn log_redaction_tests_removes_oauth_form_values() {
    let redacted =
        redact_sensitive("token exchange refresh_token=1//0gx&client_secret=GOCSPX-1 failed");

    assert!(!redacted.contains("1//0gx"));
    assert!(!redacted.contains("GOCSPX-1"));
    assert!(redacted.starts_with("token exchange "));
    assert!(redacted.ends_with(" failed"));
}
