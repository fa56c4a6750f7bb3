use std::time::Duration;
use wpt_batch::{config::Config, distribution::View};

fn example() -> Config {
    let raw = include_str!("../wpt-batch.example.toml");
    toml::from_str(raw).expect("parse TOML")
}

#[test]
fn parse_example_config() {
    let cfg = example();
    cfg.validate().unwrap();
    assert_eq!(cfg.metrics.names.len(), 4);
    assert_eq!(cfg.tests.len(), 2);
    assert!(!cfg.paths.out_dir.is_empty());
    assert_eq!(cfg.views().unwrap(), [View::FirstView, View::RepeatView]);
}

#[test]
fn job_specs_apply_service_defaults_and_overrides() {
    let specs = example().job_specs();
    assert_eq!(specs[0].run_count, 9);
    assert_eq!(specs[0].location, "Dulles");
    assert_eq!(specs[0].connection_profile, "Cable");
    assert_eq!(specs[0].notify_email, None);
    assert_eq!(specs[1].run_count, 5);
    assert_eq!(specs[1].test_type, "article");
}

#[test]
fn zero_max_attempts_means_unbounded() {
    let cfg = example();
    let policy = cfg.retry_policy();
    assert_eq!(policy.interval, Duration::from_secs(600));
    assert_eq!(policy.max_attempts, None);
    assert_eq!(policy.ready_status, 200);
}

#[test]
fn api_key_never_reaches_hash_or_dump() {
    let mut cfg = example();
    let before = cfg.normalized_for_hash();
    cfg.service.api_key = "secret-key".into();
    assert_eq!(cfg.normalized_for_hash(), before);
    assert_eq!(cfg.api_key().as_deref(), Some("secret-key"));
    let dumped = toml::to_string(&cfg.redacted()).unwrap();
    assert!(!dumped.contains("secret-key"));
}

#[test]
fn empty_config_uses_defaults() {
    let cfg: Config = toml::from_str("").unwrap();
    assert_eq!(cfg.polling.wait_seconds, 600);
    assert!(cfg.tests.is_empty());
    assert_eq!(cfg.shrink.collapse_to_len, ["requests"]);
}

#[test]
fn unknown_view_is_rejected() {
    let mut cfg = example();
    cfg.chart.views = vec!["thirdView".into()];
    assert!(cfg.validate().is_err());
}

#[test]
fn metric_names_must_not_shadow_result_fields() {
    for reserved in ["name", "type", "id", "metricErrors"] {
        let mut cfg = example();
        cfg.metrics.names.push(reserved.to_string());
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("metrics.names"), "{msg}");
        assert!(msg.contains(reserved), "{msg}");
    }
}

#[test]
fn empty_metric_list_is_rejected() {
    let mut cfg = example();
    cfg.metrics.names.clear();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("at least one metric"));
}
