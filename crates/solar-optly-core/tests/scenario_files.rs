use std::path::PathBuf;

use solar_optly_core::config::ControllerConfig;
use solar_optly_core::sim::{Scenario, TimelineEvent};

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

#[test]
fn qualifying_journey_ends_on_the_locked_app() {
    let scenario = Scenario::from_path(demo("qualifying-journey.json")).expect("demo parses");
    let report = scenario
        .run(&ControllerConfig::default())
        .expect("demo runs");

    let state = &report.snapshot.state;
    assert!(state.qualified.is_set());
    assert!(state.iframe_injected.is_set());
    assert!(state.lock_active.is_set());

    let iframe = report.snapshot.iframe.expect("iframe present");
    let src = iframe.src.unwrap_or_default();
    assert!(src.starts_with("https://solar-form-optly-def.vercel.app/loader?"));
    assert!(src.contains("prefill_postcode=SW1A1AA"));
    assert_eq!(iframe.height.as_deref(), Some("913px"));
    assert!(report.snapshot.rows.iter().all(|row| !row.hidden));

    assert!(report
        .timeline
        .iter()
        .any(|entry| matches!(entry.event, TimelineEvent::PageNavigated { .. })));
    assert!(report
        .timeline
        .iter()
        .any(|entry| matches!(entry.event, TimelineEvent::ScriptSetSrc { .. })));
}

#[test]
fn stale_marker_demo_keeps_rows_hidden() {
    let scenario = Scenario::from_path(demo("stale-marker.json")).expect("demo parses");
    let report = scenario
        .run(&ControllerConfig::default())
        .expect("demo runs");

    assert!(!report.snapshot.state.qualified.is_set());
    assert!(report.snapshot.stored_marker.is_none());
    assert!(report.snapshot.rows[0].hidden);
    assert!(report.snapshot.rows[2].hidden);
}

#[test]
fn missing_scenario_file_is_a_read_error() {
    let err = Scenario::from_path(demo("does-not-exist.json")).expect_err("file is missing");
    assert!(err.to_string().starts_with("unable to read scenario"));
}
