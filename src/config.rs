use crate::{
    client::JobSpec,
    distribution::{ChartGeometry, View},
    orchestrator::MetricSet,
    reduce::ShrinkRules,
    retry::RetryPolicy,
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub service: Service,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub metrics: Metrics,
    #[serde(default)]
    pub shrink: Shrink,
    #[serde(default)]
    pub chart: Chart,
    #[serde(default)]
    pub tests: Vec<TestEntry>,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing. The API key is
    /// blanked so rotating it does not move the batch directory.
    pub fn normalized_for_hash(&self) -> String {
        let mut redacted = self.clone();
        redacted.service.api_key.clear();
        toml::to_string(&redacted).unwrap_or_default()
    }

    /// Same as the loaded config but safe to write next to results.
    pub fn redacted(&self) -> Config {
        let mut out = self.clone();
        if !out.service.api_key.is_empty() {
            out.service.api_key = "<redacted>".into();
        }
        out
    }

    /// Resolves the API key: explicit `service.api_key` wins, then the
    /// variable named by `service.api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        if !self.service.api_key.is_empty() {
            return Some(self.service.api_key.clone());
        }
        if self.service.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.service.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn job_specs(&self) -> Vec<JobSpec> {
        self.tests
            .iter()
            .map(|t| JobSpec {
                name: t.name.clone(),
                url: t.url.clone(),
                test_type: t.test_type.clone(),
                run_count: t.runs.unwrap_or(self.service.runs),
                location: t
                    .location
                    .clone()
                    .unwrap_or_else(|| self.service.location.clone()),
                connection_profile: t
                    .connectivity
                    .clone()
                    .unwrap_or_else(|| self.service.connectivity.clone()),
                notify_email: if self.service.notify_email.is_empty() {
                    None
                } else {
                    Some(self.service.notify_email.clone())
                },
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_secs(self.polling.wait_seconds),
            max_attempts: if self.polling.max_attempts == 0 {
                None
            } else {
                Some(self.polling.max_attempts)
            },
            ready_status: self.polling.ready_status,
        }
    }

    pub fn shrink_rules(&self) -> ShrinkRules {
        ShrinkRules {
            top_level: self.shrink.top_level.clone(),
            run_fields: self.shrink.run_fields.clone(),
            collapse_to_len: self.shrink.collapse_to_len.clone(),
        }
    }

    pub fn chart_geometry(&self) -> ChartGeometry {
        ChartGeometry {
            width: self.chart.width,
            height: self.chart.height,
            label_height: self.chart.label_height,
        }
    }

    pub fn views(&self) -> Result<Vec<View>> {
        self.chart
            .views
            .iter()
            .map(|v| View::parse(v).ok_or_else(|| anyhow!("unknown chart view: {v}")))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.base_url.trim().is_empty() {
            return Err(anyhow!("service.base_url is empty"));
        }
        if self.metrics.names.is_empty() {
            return Err(anyhow!("metrics.names must list at least one metric"));
        }
        MetricSet::new(self.metrics.names.iter().cloned()).with_context(|| "metrics.names")?;
        if self.service.runs == 0 {
            return Err(anyhow!("service.runs must be >= 1"));
        }
        for (i, t) in self.tests.iter().enumerate() {
            if t.name.trim().is_empty() || t.url.trim().is_empty() {
                return Err(anyhow!("tests[{i}] needs both name and url"));
            }
        }
        if self.chart.width <= 0.0 || self.chart.height <= 0.0 {
            return Err(anyhow!("chart width/height must be positive"));
        }
        self.views()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub batch_name: String,
    pub resume: bool,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            batch_name: "default".into(),
            resume: true,
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub base_url: String,
    pub api_key: String,
    pub api_key_env: String,
    pub location: String,
    pub connectivity: String,
    pub runs: u32,
    pub notify_email: String,
    pub request_timeout_seconds: u64,
}
impl Default for Service {
    fn default() -> Self {
        Self {
            base_url: "https://www.webpagetest.org".into(),
            api_key: "".into(),
            api_key_env: "WPT_API_KEY".into(),
            location: "Dulles".into(),
            connectivity: "Cable".into(),
            runs: 9,
            notify_email: "".into(),
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polling {
    pub wait_seconds: u64,
    /// 0 means retry until the service answers.
    pub max_attempts: u32,
    pub ready_status: u16,
}
impl Default for Polling {
    fn default() -> Self {
        Self {
            wait_seconds: 600,
            max_attempts: 0,
            ready_status: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub names: Vec<String>,
}
impl Default for Metrics {
    fn default() -> Self {
        Self {
            names: vec![
                "SpeedIndex".into(),
                "TTFB".into(),
                "render".into(),
                "loadTime".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shrink {
    pub top_level: Vec<String>,
    pub run_fields: Vec<String>,
    pub collapse_to_len: Vec<String>,
}
impl Default for Shrink {
    fn default() -> Self {
        let rules = ShrinkRules::default();
        Self {
            top_level: rules.top_level,
            run_fields: rules.run_fields,
            collapse_to_len: rules.collapse_to_len,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chart {
    pub width: f64,
    pub height: f64,
    pub label_height: f64,
    pub views: Vec<String>,
}
impl Default for Chart {
    fn default() -> Self {
        let geometry = ChartGeometry::default();
        Self {
            width: geometry.width,
            height: geometry.height,
            label_height: geometry.label_height,
            views: vec!["firstView".into(), "repeatView".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default = "default_test_type")]
    pub test_type: String,
    #[serde(default)]
    pub runs: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub connectivity: Option<String>,
}

fn default_test_type() -> String {
    "home".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_handles_json: bool,
    pub write_results_json: bool,
    pub write_raw_results_json: bool,
    pub write_index_json: bool,
    pub handles_filename: String,
    pub results_filename: String,
    pub raw_results_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_handles_json: true,
            write_results_json: true,
            write_raw_results_json: false,
            write_index_json: true,
            handles_filename: "handles.json".into(),
            results_filename: "results.json".into(),
            raw_results_filename: "results.raw.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: true,
        }
    }
}
