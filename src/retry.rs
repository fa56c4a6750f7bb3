use crate::client::MetricResponse;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-interval polling policy. Jobs on the remote service take minutes,
/// so there is no backoff and, unless `max_attempts` is set, no attempt cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    /// Status codes below this mean "still processing".
    pub ready_status: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            max_attempts: None,
            ready_status: 200,
        }
    }
}

/// How one fetch answer moves a (job, metric) unit along.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    Ready(serde_json::Value),
    NotReady,
    Failed(String),
}

impl RetryPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn classify(&self, resp: MetricResponse) -> PollStep {
        if resp.status_code < self.ready_status {
            return PollStep::NotReady;
        }
        if !(200..300).contains(&resp.status_code) {
            return PollStep::Failed(format!(
                "status {}: {}",
                resp.status_code, resp.status_text
            ));
        }
        match resp.data {
            Some(data) if !data.is_null() => PollStep::Ready(data),
            _ => PollStep::Failed(format!(
                "status {} without data: {}",
                resp.status_code, resp.status_text
            )),
        }
    }

    /// `attempts` counts fetches already made for the unit.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
