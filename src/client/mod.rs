pub mod http;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use types::{JobHandle, JobSpec, MetricResponse, Submitted};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("service rejected request ({status_code}): {status_text}")]
    Rejected { status_code: u16, status_text: String },
    #[error("service accepted request but returned no testId: {status_text}")]
    MissingTestId { status_text: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Raised by non-HTTP clients (tests, alternative backends).
    #[error("{0}")]
    Other(String),
}

/// Boundary to the remote measurement service. Implementations are stateless
/// per call and must tolerate concurrent use from many outstanding polls.
#[async_trait]
pub trait TestClient: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<Submitted, ClientError>;
    async fn fetch_metric(
        &self,
        job_id: &str,
        metric: &str,
    ) -> Result<MetricResponse, ClientError>;
}

