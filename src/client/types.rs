use serde::{Deserialize, Serialize};

/// One measurement job as the caller describes it. Consumed once by submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub run_count: u32,
    pub location: String,
    pub connection_profile: String,
    #[serde(default)]
    pub notify_email: Option<String>,
}

/// Result of submitting one [`JobSpec`]. Exactly one of `id` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    #[serde(rename = "type")]
    pub test_type: String,
    pub url: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobHandle {
    pub fn accepted(spec: &JobSpec, id: String) -> Self {
        Self {
            name: spec.name.clone(),
            test_type: spec.test_type.clone(),
            url: spec.url.clone(),
            label: spec.name.clone(),
            id: Some(id),
            error: None,
        }
    }

    pub fn rejected(spec: &JobSpec, error: String) -> Self {
        Self {
            name: spec.name.clone(),
            test_type: spec.test_type.clone(),
            url: spec.url.clone(),
            label: spec.name.clone(),
            id: None,
            error: Some(error),
        }
    }

    /// A handle with a submission error is terminal and never polled.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.id.is_none()
    }
}

/// What `submit` hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submitted {
    pub id: String,
}

/// Raw answer to one metric fetch. `data` is the service's nested payload,
/// kept untyped until the reducer and analyzer pick what they need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl MetricResponse {
    pub fn ready(data: serde_json::Value) -> Self {
        Self {
            status_code: 200,
            status_text: "Test Complete".into(),
            data: Some(data),
        }
    }

    pub fn pending(status_code: u16, status_text: &str) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            data: None,
        }
    }
}
