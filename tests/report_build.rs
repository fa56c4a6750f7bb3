mod common;

use common::{spec, MockClient, Scripted};
use std::time::Duration;
use wpt_batch::{
    config::Config,
    distribution::View,
    orchestrator::{MetricSet, Orchestrator},
    reduce::Reducer,
    report::{self, ReportOptions, Times},
    retry::RetryPolicy,
};

fn times() -> Times {
    Times {
        begin: "2026-01-01T00:00:00Z".into(),
        end: "2026-01-01T00:30:00Z".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn distributions_come_from_full_runs_and_data_is_shrunk() {
    let client = MockClient::new()
        .reject("b")
        .script("id-c", "render", vec![Scripted::Fail("timeout".into())]);
    let orch = Orchestrator::new(
        client,
        MetricSet::default(),
        RetryPolicy::unbounded(Duration::from_secs(1)),
        Reducer::default(),
    );
    let results = orch.run(&[spec("a"), spec("b"), spec("c")]).await.unwrap();

    let mut cfg = Config::default();
    cfg.service.api_key = "secret".into();
    let options = ReportOptions::from_config(&cfg, &View::ALL);
    let report = report::build(results, options, times(), orch.reducer()).unwrap();

    assert_eq!(report.data.len(), 3);
    assert_eq!(report.data[0].metrics["TTFB"]["runs"]["2"]["firstView"]["requests"], 2);

    // a: 4 metrics x 2 views, c: 3 metrics x 2 views, b: failed
    assert_eq!(report.distributions.len(), 14);
    assert!(report.distributions.iter().all(|d| d.job_index != 1));
    let first = report
        .distributions
        .iter()
        .find(|d| d.job_index == 0 && d.metric == "TTFB" && d.view == View::FirstView)
        .unwrap();
    assert_eq!(first.samples, 3);
    assert_eq!(first.buckets.iter().map(|b| b.count).sum::<usize>(), 3);
    let repeat = report
        .distributions
        .iter()
        .find(|d| d.job_index == 0 && d.metric == "TTFB" && d.view == View::RepeatView)
        .unwrap();
    assert_eq!(repeat.samples, 2);

    let raw = serde_json::to_string(&report).unwrap();
    assert!(!raw.contains("secret"));
    assert_eq!(report.times, times());
}
