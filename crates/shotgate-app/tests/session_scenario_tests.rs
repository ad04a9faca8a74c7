//! Integration tests for the end-to-end operator scenarios.

mod common;

use std::sync::atomic::AtomicBool;

use common::{ScriptedTriggers, harness};
use shotgate_app::{CaptureOutcome, ChannelTriggerSource, SessionExit, TriggerEvent};
use shotgate_core::SessionPhase;

const GAME_RUNNING: &[&str] = &["explorer.exe", "r5apex.exe"];

#[test]
fn session_scenario_tests_absent_target_skips_without_a_file() {
    let mut h = harness(&["explorer.exe", "chrome.exe"], true);

    let outcome = h.controller.handle_capture();

    assert_eq!(outcome, CaptureOutcome::Skipped { skipped: 1 });
    assert_eq!(
        h.log_messages(),
        vec!["Target application not running (skipped: 1)".to_string()]
    );
    assert!(h.cached_captures().is_empty());
    assert!(h.uploader.uploaded_names().is_empty());
    assert_eq!(h.controller.session().screenshot_count(), 0);
}

#[test]
fn session_scenario_tests_present_target_caches_and_uploads() {
    let mut h = harness(GAME_RUNNING, true);

    let outcome = h.controller.handle_capture();

    let CaptureOutcome::Uploaded {
        count,
        filename,
        remote,
    } = outcome.clone()
    else {
        panic!("expected upload, got {outcome:?}");
    };
    assert_eq!(count, 1);
    assert!(filename.starts_with("apex_map_") && filename.ends_with(".png"));
    assert_eq!(h.cached_captures(), vec![h.output_dir.join(&filename)]);
    assert_eq!(
        h.log_messages(),
        vec![format!("#1 [r5apex.exe]: {filename} -> remote storage ({})", remote.id)]
    );
    assert_eq!(h.controller.session().screenshot_count(), 1);
}

#[test]
fn session_scenario_tests_failed_upload_keeps_local_file() {
    let mut h = harness(GAME_RUNNING, false);

    let outcome = h.controller.handle_capture();

    let CaptureOutcome::UploadFailed { filename } = outcome.clone() else {
        panic!("expected upload failure, got {outcome:?}");
    };
    assert_eq!(h.cached_captures(), vec![h.output_dir.join(&filename)]);
    assert_eq!(
        h.log_messages(),
        vec![format!("Upload failed for {filename}: server error: 503")]
    );
    assert_eq!(h.controller.session().screenshot_count(), 0);
    assert_eq!(h.controller.session().skipped_count(), 0);
}

#[test]
fn session_scenario_tests_quit_while_idle_exits_cleanly() {
    let mut h = harness(GAME_RUNNING, true);
    let mut source = ScriptedTriggers::events(&[TriggerEvent::Quit]);

    let exit = h.controller.run(&mut source, &AtomicBool::new(false));

    assert_eq!(exit, SessionExit::Normal);
    assert_eq!(exit.code(), 0);
    assert_eq!(h.controller.session().phase(), SessionPhase::Terminated);
    assert!(!source.is_armed());
    let finals: Vec<_> = h
        .log_messages()
        .into_iter()
        .filter(|line| line.starts_with("Session finished."))
        .collect();
    assert_eq!(finals, vec!["Session finished. Screenshots: 0, skipped: 0".to_string()]);
}

#[test]
fn session_scenario_tests_back_to_back_captures_are_distinct() {
    let mut h = harness(GAME_RUNNING, true);
    let (sender, mut source) = ChannelTriggerSource::channel();
    for event in [TriggerEvent::Capture, TriggerEvent::Capture, TriggerEvent::Quit] {
        assert!(sender.send(event));
    }

    let exit = h.controller.run(&mut source, &AtomicBool::new(false));

    assert_eq!(exit, SessionExit::Normal);
    assert_eq!(h.cached_captures().len(), 2);
    let names = h.uploader.uploaded_names();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);

    let messages = h.log_messages();
    let successes = messages.iter().filter(|line| line.starts_with('#')).count();
    assert_eq!(successes, 2);
    assert!(messages[1].starts_with("#2 [r5apex.exe]: "));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Session finished. Screenshots: 2, skipped: 0")
    );
}
