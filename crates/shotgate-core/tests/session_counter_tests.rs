//! Tests session counters and lifecycle transitions.

use shotgate_core::{Session, SessionPhase};

#[test]
fn session_counter_tests_track_each_outcome_separately() {
    let mut session = Session::new("player1").expect("valid username");
    session.start().expect("idle session starts");

    assert_eq!(session.record_skip(), 1);
    assert_eq!(session.record_upload(), 1);
    session.record_failure();
    assert_eq!(session.record_upload(), 2);

    assert_eq!(session.screenshot_count(), 2);
    assert_eq!(session.skipped_count(), 1);
    assert_eq!(session.failed_count(), 1);
    assert_eq!(session.triggers_processed(), 4);
}

#[test]
fn session_counter_tests_running_flag_drops_exactly_once() {
    let mut session = Session::new("player1").expect("valid username");
    assert!(!session.is_running());
    session.start().expect("idle session starts");
    assert!(session.is_running());

    assert!(session.begin_stop());
    assert!(!session.is_running());
    assert!(!session.begin_stop());

    let summary = session.finish().expect("stopping session finishes");
    assert_eq!(summary.skipped, 0);
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(!session.begin_stop());
}

#[test]
fn session_counter_tests_reject_blank_username() {
    assert!(Session::new("   ").is_err());
}
