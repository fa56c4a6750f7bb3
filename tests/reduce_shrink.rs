mod common;

use serde_json::json;
use wpt_batch::{
    client::JobHandle,
    reduce::{MetricOutcome, ReduceError, Reducer, ShrinkRules},
};

fn handle(name: &str) -> JobHandle {
    JobHandle {
        name: name.into(),
        test_type: "home".into(),
        url: format!("https://example.com/{name}"),
        label: name.into(),
        id: Some(format!("id-{name}")),
        error: None,
    }
}

fn full_result() -> wpt_batch::reduce::NormalizedResult {
    let outcomes = ["SpeedIndex", "TTFB", "render", "loadTime"]
        .iter()
        .map(|m| MetricOutcome::ready(m, common::payload("id-a", m)))
        .collect();
    Reducer::default().reduce(&handle("a"), outcomes).unwrap()
}

#[test]
fn no_outcomes_is_an_internal_error() {
    let err = Reducer::default().reduce(&handle("a"), Vec::new()).unwrap_err();
    assert_eq!(err, ReduceError::NoMetrics { name: "a".into() });
}

#[test]
fn failed_handle_needs_no_outcomes() {
    let mut h = handle("a");
    h.id = None;
    h.error = Some("quota exceeded".into());
    let out = Reducer::default().reduce(&h, Vec::new()).unwrap();
    assert_eq!(out.error.as_deref(), Some("quota exceeded"));
    assert_eq!(out.label.as_deref(), Some("a"));
    assert!(out.metrics.is_empty());
}

#[test]
fn success_record_shape() {
    let r = full_result();
    let v = serde_json::to_value(&r).unwrap();
    assert_eq!(v["name"], "a");
    assert_eq!(v["type"], "home");
    assert_eq!(v["url"], "https://example.com/a");
    assert_eq!(v["id"], "id-a");
    for m in ["SpeedIndex", "TTFB", "render", "loadTime"] {
        assert!(v.get(m).is_some(), "missing {m}");
    }
    assert!(v.get("error").is_none());
    assert!(v.get("label").is_none());
}

#[test]
fn shrink_drops_fields_and_counts_requests() {
    let full = full_result();
    let small = Reducer::default().shrink(&full);

    let ttfb = &small.metrics["TTFB"];
    assert!(ttfb.get("metric").is_none());
    assert_eq!(ttfb["median"]["firstView"]["requests"], json!(3));
    assert!(ttfb["median"]["firstView"].get("thumbnails").is_none());
    assert_eq!(ttfb["runs"]["2"]["firstView"]["requests"], json!(2));
    assert!(ttfb["runs"]["1"]["firstView"].get("rawData").is_none());
    assert!(ttfb["runs"]["3"]["firstView"].get("images").is_none());
    assert_eq!(ttfb["runs"]["1"]["repeatView"]["requests"], json!(0));
    assert_eq!(ttfb["runs"]["1"]["firstView"]["TTFB"], json!(1000));

    // the input still has the full arrays
    assert!(full.metrics["TTFB"]["median"]["firstView"]["requests"].is_array());
    assert_eq!(full.metrics["TTFB"]["metric"], "TTFB");
}

#[test]
fn shrink_twice_is_a_no_op() {
    let reducer = Reducer::default();
    let once = reducer.shrink(&full_result());
    let twice = reducer.shrink(&once);
    assert_eq!(once, twice);
    assert_eq!(twice.metrics["render"]["median"]["firstView"]["requests"], json!(3));
}

#[test]
fn custom_rules_only_touch_listed_fields() {
    let reducer = Reducer::new(ShrinkRules {
        top_level: vec![],
        run_fields: vec!["rawData".into()],
        collapse_to_len: vec![],
    });
    let small = reducer.shrink(&full_result());
    let ttfb = &small.metrics["TTFB"];
    assert_eq!(ttfb["metric"], "TTFB");
    assert!(ttfb["median"]["firstView"]["requests"].is_array());
    assert!(ttfb["runs"]["1"]["firstView"].get("rawData").is_none());
    assert!(ttfb["median"]["firstView"].get("thumbnails").is_some());
}

#[test]
fn serde_round_trip_keeps_metrics_flat() {
    let r = full_result();
    let raw = serde_json::to_string(&r).unwrap();
    let back: wpt_batch::reduce::NormalizedResult = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.metrics.len(), 4);
    assert_eq!(back, r);
}
