use crate::{
    config::Config,
    distribution::{self, AnalyzeError, Binning, ChartGeometry, DistributionBucket, View},
    reduce::{NormalizedResult, Reducer},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What report renderers consume. `data` is already shrunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub data: Vec<NormalizedResult>,
    pub options: ReportOptions,
    pub times: Times,
    pub distributions: Vec<Distribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Times {
    pub begin: String,
    pub end: String,
}

/// Non-secret run options echoed into the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportOptions {
    pub batch_name: String,
    pub base_url: String,
    pub location: String,
    pub connectivity: String,
    pub runs: u32,
    pub wait_seconds: u64,
    pub metrics: Vec<String>,
    pub views: Vec<View>,
    pub chart: ChartGeometry,
}

impl ReportOptions {
    pub fn from_config(cfg: &Config, views: &[View]) -> Self {
        Self {
            batch_name: cfg.global.batch_name.clone(),
            base_url: cfg.service.base_url.clone(),
            location: cfg.service.location.clone(),
            connectivity: cfg.service.connectivity.clone(),
            runs: cfg.service.runs,
            wait_seconds: cfg.polling.wait_seconds,
            metrics: cfg.metrics.names.clone(),
            views: views.to_vec(),
            chart: cfg.chart_geometry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub job_index: usize,
    pub name: String,
    pub metric: String,
    pub view: View,
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
    pub buckets: Vec<DistributionBucket>,
}

/// Histograms for every ready (job, view, metric) of unshrunk results.
pub fn distributions(
    results: &[NormalizedResult],
    metrics: &[String],
    views: &[View],
    chart: &ChartGeometry,
) -> Result<Vec<Distribution>, AnalyzeError> {
    let mut out = Vec::new();
    for (job_index, result) in results.iter().enumerate() {
        if result.is_failed() {
            continue;
        }
        for metric in metrics {
            if !result.metrics.contains_key(metric) {
                continue;
            }
            for &view in views {
                let samples = distribution::samples_for(result, metric, view)?;
                let Some(binning) = distribution::bin(&samples)? else {
                    debug!("{} {metric}/{}: no samples", result.name, view.key());
                    continue;
                };
                out.push(summarize(job_index, result, metric, view, &binning, chart));
            }
        }
    }
    Ok(out)
}

fn summarize(
    job_index: usize,
    result: &NormalizedResult,
    metric: &str,
    view: View,
    binning: &Binning,
    chart: &ChartGeometry,
) -> Distribution {
    Distribution {
        job_index,
        name: result.name.clone(),
        metric: metric.to_string(),
        view,
        mean: binning.mean,
        stdev: binning.stdev,
        samples: binning.samples,
        buckets: distribution::layout(binning, chart),
    }
}

/// Runs every consumer of the full run data first, then shrinks.
pub fn build(
    results: Vec<NormalizedResult>,
    options: ReportOptions,
    times: Times,
    reducer: &Reducer,
) -> Result<Report, AnalyzeError> {
    let distributions =
        distributions(&results, &options.metrics, &options.views, &options.chart)?;
    let data = results.iter().map(|r| reducer.shrink(r)).collect();
    Ok(Report {
        data,
        options,
        times,
        distributions,
    })
}
