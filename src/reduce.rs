use crate::client::JobHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReduceError {
    #[error("job {name:?} reached the reducer with no metric outcomes and no submission error")]
    NoMetrics { name: String },
}

/// Keys [`NormalizedResult`] serializes itself. A metric with one of these
/// names would collide with them once flattened into the record.
pub const RESERVED_FIELDS: [&str; 7] = [
    "name",
    "type",
    "url",
    "id",
    "label",
    "error",
    "metricErrors",
];

/// Terminal state of one (job, metric) poll.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOutcome {
    pub metric: String,
    pub payload: Result<Value, String>,
}

impl MetricOutcome {
    pub fn ready(metric: &str, data: Value) -> Self {
        Self {
            metric: metric.to_string(),
            payload: Ok(data),
        }
    }

    pub fn failed(metric: &str, message: impl Into<String>) -> Self {
        Self {
            metric: metric.to_string(),
            payload: Err(message.into()),
        }
    }
}

/// One record per submitted job, in submission order.
///
/// Success records carry one entry per ready metric (flattened into the
/// record under the metric name). Failed submissions carry `label` and
/// `error` and nothing else beyond identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub name: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "metricErrors",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub metric_errors: BTreeMap<String, String>,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, Value>,
}

impl NormalizedResult {
    pub fn from_failed_submission(handle: &JobHandle) -> Self {
        Self {
            name: handle.name.clone(),
            test_type: handle.test_type.clone(),
            url: handle.url.clone(),
            id: None,
            label: Some(handle.label.clone()),
            error: Some(
                handle
                    .error
                    .clone()
                    .unwrap_or_else(|| "submission returned no id".to_string()),
            ),
            metric_errors: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Field tables for the shrink step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShrinkRules {
    /// Dropped from each metric payload's top level.
    pub top_level: Vec<String>,
    /// Dropped from every per-view object (median and each run).
    pub run_fields: Vec<String>,
    /// Per-view arrays replaced by their element count.
    pub collapse_to_len: Vec<String>,
}

impl Default for ShrinkRules {
    fn default() -> Self {
        Self {
            top_level: vec!["metric".into(), "data".into()],
            run_fields: vec![
                "thumbnails".into(),
                "images".into(),
                "rawData".into(),
                "domains".into(),
                "breakdown".into(),
                "pages".into(),
                "videoFrames".into(),
            ],
            collapse_to_len: vec!["requests".into()],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reducer {
    rules: ShrinkRules,
}

impl Reducer {
    pub fn new(rules: ShrinkRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ShrinkRules {
        &self.rules
    }

    /// Merges one job's metric outcomes into its record. Partial data is
    /// fine; an empty outcome list means the poll accounting lost units.
    pub fn reduce(
        &self,
        handle: &JobHandle,
        outcomes: Vec<MetricOutcome>,
    ) -> Result<NormalizedResult, ReduceError> {
        if handle.error.is_some() {
            return Ok(NormalizedResult::from_failed_submission(handle));
        }
        if outcomes.is_empty() {
            return Err(ReduceError::NoMetrics {
                name: handle.name.clone(),
            });
        }

        let first = outcomes.iter().find_map(|o| o.payload.as_ref().ok());
        let remote_id = first.and_then(|d| str_field(d, "id"));
        let id = remote_id.or_else(|| handle.id.clone());
        let url = first
            .and_then(|d| str_field(d, "url"))
            .unwrap_or_else(|| handle.url.clone());
        let name = non_empty(&handle.label)
            .or_else(|| first.and_then(|d| str_field(d, "label")))
            .or_else(|| id.clone())
            .unwrap_or_else(|| handle.name.clone());

        let mut metrics = BTreeMap::new();
        let mut metric_errors = BTreeMap::new();
        for outcome in outcomes {
            match outcome.payload {
                Ok(data) => {
                    metrics.insert(outcome.metric, data);
                }
                Err(msg) => {
                    metric_errors.insert(outcome.metric, msg);
                }
            }
        }

        Ok(NormalizedResult {
            name,
            test_type: handle.test_type.clone(),
            url,
            id,
            label: None,
            error: None,
            metric_errors,
            metrics,
        })
    }

    /// Returns a compacted copy: redundant fields dropped, listed arrays
    /// replaced by their length. The input is left untouched so anything that
    /// still needs the full runs can keep reading it. Applying it to an
    /// already shrunk record changes nothing.
    pub fn shrink(&self, result: &NormalizedResult) -> NormalizedResult {
        let mut out = result.clone();
        for payload in out.metrics.values_mut() {
            self.shrink_payload(payload);
        }
        out
    }

    fn shrink_payload(&self, payload: &mut Value) {
        let Some(obj) = payload.as_object_mut() else {
            return;
        };
        for key in &self.rules.top_level {
            obj.remove(key);
        }
        if let Some(median) = obj.get_mut("median").and_then(Value::as_object_mut) {
            self.shrink_views(median);
        }
        match obj.get_mut("runs") {
            Some(Value::Object(runs)) => {
                for run in runs.values_mut() {
                    if let Some(views) = run.as_object_mut() {
                        self.shrink_views(views);
                    }
                }
            }
            Some(Value::Array(runs)) => {
                for run in runs.iter_mut() {
                    if let Some(views) = run.as_object_mut() {
                        self.shrink_views(views);
                    }
                }
            }
            _ => {}
        }
    }

    fn shrink_views(&self, views: &mut Map<String, Value>) {
        for view in views.values_mut() {
            let Some(fields) = view.as_object_mut() else {
                continue;
            };
            for key in &self.rules.run_fields {
                fields.remove(key);
            }
            for key in &self.rules.collapse_to_len {
                let len = match fields.get(key) {
                    Some(Value::Array(items)) => items.len(),
                    _ => continue,
                };
                fields.insert(key.clone(), Value::from(len));
            }
        }
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
