use super::{ClientError, JobSpec, MetricResponse, Submitted, TestClient};
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// WebPageTest-compatible HTTP client. One `reqwest::Client` is shared by
/// every concurrent submission and poll.
pub struct WptClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunTestOut {
    #[serde(rename = "statusCode")]
    status_code: u16,
    #[serde(rename = "statusText", default)]
    status_text: String,
    #[serde(default)]
    data: Option<RunTestData>,
}

#[derive(Debug, Deserialize)]
struct RunTestData {
    #[serde(rename = "testId")]
    test_id: Option<String>,
}

impl WptClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base = Url::parse(cfg.service.base_url.trim())
            .with_context(|| format!("parsing service.base_url: {}", cfg.service.base_url))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.service.request_timeout_seconds.max(1)))
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            http,
            base,
            api_key: cfg.api_key(),
        })
    }

    fn runtest_url(&self, spec: &JobSpec) -> Result<Url, ClientError> {
        let mut params = vec![
            ("url", spec.url.clone()),
            (
                "location",
                format!("{}:{}", spec.location, spec.connection_profile),
            ),
            ("runs", spec.run_count.to_string()),
            ("label", spec.name.clone()),
            ("f", "json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("k", key.clone()));
        }
        if let Some(email) = &spec.notify_email {
            params.push(("notify", email.clone()));
        }
        endpoint(&self.base, "runtest.php", &params)
    }

    fn result_url(&self, job_id: &str, metric: &str) -> Result<Url, ClientError> {
        endpoint(
            &self.base,
            "jsonResult.php",
            &[
                ("test", job_id.to_string()),
                ("medianMetric", metric.to_string()),
            ],
        )
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, ClientError> {
        let shown = redact(&url);
        debug!("GET {shown}");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: shown.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                url: shown,
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await.map_err(|source| ClientError::Transport {
            url: shown.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode { url: shown, source })
    }
}

#[async_trait]
impl TestClient for WptClient {
    async fn submit(&self, spec: &JobSpec) -> Result<Submitted, ClientError> {
        let url = self.runtest_url(spec)?;
        let out: RunTestOut = self.get_json(url).await?;
        submitted(out)
    }

    async fn fetch_metric(
        &self,
        job_id: &str,
        metric: &str,
    ) -> Result<MetricResponse, ClientError> {
        let url = self.result_url(job_id, metric)?;
        self.get_json(url).await
    }
}

fn submitted(out: RunTestOut) -> Result<Submitted, ClientError> {
    if out.status_code != 200 {
        return Err(ClientError::Rejected {
            status_code: out.status_code,
            status_text: out.status_text,
        });
    }
    match out.data.and_then(|d| d.test_id) {
        Some(id) if !id.is_empty() => Ok(Submitted { id }),
        _ => Err(ClientError::MissingTestId {
            status_text: out.status_text,
        }),
    }
}

fn endpoint(base: &Url, path: &str, params: &[(&str, String)]) -> Result<Url, ClientError> {
    // Url::join drops the last segment unless the base ends in '/'.
    let mut root = base.clone();
    if !root.path().ends_with('/') {
        let p = format!("{}/", root.path());
        root.set_path(&p);
    }
    let mut url = root
        .join(path)
        .map_err(|e| ClientError::InvalidUrl(format!("{base} + {path}: {e}")))?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    Ok(url)
}

fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "k" {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            name: "home".into(),
            url: "https://example.com/".into(),
            test_type: "home".into(),
            run_count: 3,
            location: "Dulles".into(),
            connection_profile: "Cable".into(),
            notify_email: Some("ops@example.com".into()),
        }
    }

    fn client(base: &str, key: Option<&str>) -> WptClient {
        WptClient {
            http: reqwest::Client::new(),
            base: Url::parse(base).unwrap(),
            api_key: key.map(String::from),
        }
    }

    #[test]
    fn runtest_url_carries_location_and_key() {
        let c = client("https://wpt.example.org", Some("secret"));
        let url = c.runtest_url(&spec()).unwrap();
        assert_eq!(url.path(), "/runtest.php");
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(q.contains(&("location".into(), "Dulles:Cable".into())));
        assert!(q.contains(&("runs".into(), "3".into())));
        assert!(q.contains(&("k".into(), "secret".into())));
        assert!(q.contains(&("notify".into(), "ops@example.com".into())));
    }

    fn run_test_out(raw: &str) -> RunTestOut {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn submit_response_with_test_id_is_accepted() {
        let out = run_test_out(
            r#"{"statusCode": 200, "statusText": "Ok", "data": {"testId": "260101_AB_1"}}"#,
        );
        assert_eq!(
            submitted(out).unwrap(),
            Submitted {
                id: "260101_AB_1".into()
            }
        );
    }

    #[test]
    fn submit_response_with_error_status_is_rejected() {
        let out = run_test_out(r#"{"statusCode": 400, "statusText": "Invalid API Key"}"#);
        match submitted(out) {
            Err(ClientError::Rejected {
                status_code,
                status_text,
            }) => {
                assert_eq!(status_code, 400);
                assert_eq!(status_text, "Invalid API Key");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn submit_response_without_test_id_keeps_status_text() {
        let out = run_test_out(
            r#"{"statusCode": 200, "statusText": "Queued elsewhere", "data": {}}"#,
        );
        let err = submitted(out).unwrap_err();
        assert!(matches!(
            &err,
            ClientError::MissingTestId { status_text } if status_text == "Queued elsewhere"
        ));
        assert!(err.to_string().contains("Queued elsewhere"));
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let c = client("https://example.org/wpt", None);
        let url = c.result_url("abc", "TTFB").unwrap();
        assert_eq!(url.path(), "/wpt/jsonResult.php");
        assert_eq!(url.query(), Some("test=abc&medianMetric=TTFB"));
    }

    #[test]
    fn redact_hides_api_key() {
        let c = client("https://wpt.example.org", Some("secret"));
        let url = c.runtest_url(&spec()).unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("k=***") || shown.contains("k=%2A%2A%2A"));
    }
}
