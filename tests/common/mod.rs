#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use wpt_batch::client::{ClientError, JobSpec, MetricResponse, Submitted, TestClient};

pub enum Scripted {
    Resp(MetricResponse),
    Fail(String),
}

#[derive(Default)]
struct Inner {
    reject: HashSet<String>,
    submit_delay: HashMap<String, Duration>,
    scripts: HashMap<(String, String), VecDeque<Scripted>>,
    fetches: Vec<(String, String, Instant)>,
    submits: Vec<String>,
}

/// Scripted stand-in for the remote service. Job ids are `id-<spec name>`;
/// unscripted fetches answer ready with [`payload`].
#[derive(Clone, Default)]
pub struct MockClient {
    inner: Arc<Mutex<Inner>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(self, name: &str) -> Self {
        self.inner.lock().unwrap().reject.insert(name.to_string());
        self
    }

    pub fn delay_submit(self, name: &str, delay: Duration) -> Self {
        self.inner
            .lock()
            .unwrap()
            .submit_delay
            .insert(name.to_string(), delay);
        self
    }

    pub fn script(self, job_id: &str, metric: &str, steps: Vec<Scripted>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert((job_id.to_string(), metric.to_string()), steps.into());
        self
    }

    pub fn fetch_times(&self, job_id: &str, metric: &str) -> Vec<Instant> {
        self.inner
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|(j, m, _)| j == job_id && m == metric)
            .map(|(_, _, t)| *t)
            .collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.inner.lock().unwrap().fetches.len()
    }

    pub fn submit_count(&self) -> usize {
        self.inner.lock().unwrap().submits.len()
    }
}

#[async_trait]
impl TestClient for MockClient {
    async fn submit(&self, spec: &JobSpec) -> Result<Submitted, ClientError> {
        let (delay, rejected) = {
            let mut inner = self.inner.lock().unwrap();
            inner.submits.push(spec.name.clone());
            (
                inner.submit_delay.get(&spec.name).copied(),
                inner.reject.contains(&spec.name),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if rejected {
            return Err(ClientError::Rejected {
                status_code: 400,
                status_text: format!("invalid url for {}", spec.name),
            });
        }
        Ok(Submitted {
            id: format!("id-{}", spec.name),
        })
    }

    async fn fetch_metric(
        &self,
        job_id: &str,
        metric: &str,
    ) -> Result<MetricResponse, ClientError> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .fetches
                .push((job_id.to_string(), metric.to_string(), Instant::now()));
            inner
                .scripts
                .get_mut(&(job_id.to_string(), metric.to_string()))
                .and_then(VecDeque::pop_front)
        };
        match step {
            Some(Scripted::Resp(resp)) => Ok(resp),
            Some(Scripted::Fail(msg)) => Err(ClientError::Other(msg)),
            None => Ok(MetricResponse::ready(payload(job_id, metric))),
        }
    }
}

pub fn spec(name: &str) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        url: format!("https://example.com/{name}"),
        test_type: "home".to_string(),
        run_count: 3,
        location: "Dulles".to_string(),
        connection_profile: "Cable".to_string(),
        notify_email: None,
    }
}

pub fn pending() -> Scripted {
    Scripted::Resp(MetricResponse::pending(101, "Test Started"))
}

/// A trimmed-down service payload: three runs, run 3 has no repeat view.
pub fn payload(job_id: &str, metric: &str) -> Value {
    json!({
        "id": job_id,
        "url": format!("https://example.com/{}", job_id.trim_start_matches("id-")),
        "metric": metric,
        "median": {
            "firstView": {
                metric: 1100,
                "requests": [{"url": "a"}, {"url": "b"}, {"url": "c"}],
                "thumbnails": {"waterfall": "w.png"}
            }
        },
        "runs": {
            "1": {
                "firstView": {metric: 1000, "requests": [{"url": "a"}], "rawData": {"headers": "h"}},
                "repeatView": {metric: 400, "requests": []}
            },
            "2": {
                "firstView": {metric: 1100, "requests": [{"url": "a"}, {"url": "b"}], "domains": {}},
                "repeatView": {metric: 500, "requests": [{"url": "a"}]}
            },
            "3": {
                "firstView": {metric: 1300, "requests": [], "images": {}}
            }
        }
    })
}
