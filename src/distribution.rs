//! Per-run histograms for one (job, view, metric).
//!
//! Buckets are `stdev` wide and laid out symmetrically around the mean:
//! the bucket count is `2 * ceil((max(mean - least, greatest - mean) + 1) / stdev)`
//! and a sample lands in `floor((sample - mean) / stdev + count / 2)`.
//! Zero variance is a recognized case with exactly two buckets on the single
//! value. Empty buckets at either edge are left out of the rendered output
//! but keep their index, so the surviving bounds are unchanged.

use crate::reduce::NormalizedResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Placeholder for a run that has no data for the requested view.
pub const MISSING_SAMPLE: i64 = -1;

#[derive(Debug, Error, PartialEq)]
pub enum AnalyzeError {
    #[error("sample {index} is negative ({value})")]
    Negative { index: usize, value: i64 },
    #[error("{metric}.{view} in run {run} is not a non-negative integer: {value}")]
    NotInteger {
        metric: String,
        view: String,
        run: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum View {
    FirstView,
    RepeatView,
}

impl View {
    pub const ALL: [View; 2] = [View::FirstView, View::RepeatView];

    pub fn key(self) -> &'static str {
        match self {
            View::FirstView => "firstView",
            View::RepeatView => "repeatView",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        View::ALL
            .into_iter()
            .find(|v| v.key().eq_ignore_ascii_case(raw.trim()))
    }
}

/// Pixel box the bars are fitted into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartGeometry {
    pub width: f64,
    pub height: f64,
    /// Minimum bar height that still fits a count label.
    pub label_height: f64,
}

impl Default for ChartGeometry {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 300.0,
            label_height: 16.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketSide {
    Less,
    Greater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPlacement {
    Above,
    Beside,
}

/// One bucket before trimming and layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBucket {
    pub index: usize,
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    pub mean: f64,
    pub stdev: f64,
    pub samples: usize,
    pub buckets: Vec<RawBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBucket {
    pub lower_bound: i64,
    pub upper_bound: i64,
    pub count: usize,
    pub offset_x: f64,
    pub offset_y: f64,
    pub bar_width: f64,
    pub bar_height: f64,
    #[serde(rename = "type")]
    pub side: BucketSide,
    pub label: LabelPlacement,
}

impl Binning {
    /// Builds bounds for an explicit count vector. `counts[i]` is the number of
    /// samples in bucket `i`.
    pub fn with_counts(mean: f64, stdev: f64, counts: &[usize]) -> Self {
        let total = counts.len();
        let buckets = counts
            .iter()
            .enumerate()
            .map(|(index, &count)| {
                let (lower_bound, upper_bound) = bounds(index, total, mean, stdev);
                RawBucket {
                    index,
                    lower_bound,
                    upper_bound,
                    count,
                }
            })
            .collect();
        Self {
            mean,
            stdev,
            samples: counts.iter().sum(),
            buckets,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.stdev == 0.0
    }
}

/// Bins raw per-run samples. Sentinel values are dropped before any
/// statistics; an input with no real samples yields `None`.
pub fn bin(samples: &[i64]) -> Result<Option<Binning>, AnalyzeError> {
    let mut kept = Vec::with_capacity(samples.len());
    for (index, &value) in samples.iter().enumerate() {
        if value == MISSING_SAMPLE {
            continue;
        }
        if value < 0 {
            return Err(AnalyzeError::Negative { index, value });
        }
        kept.push(value);
    }
    let (Some(&least), Some(&greatest)) = (kept.iter().min(), kept.iter().max()) else {
        return Ok(None);
    };

    let n = kept.len() as f64;
    let mean = kept.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = kept
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let stdev = variance.sqrt();

    let total = if stdev == 0.0 {
        2
    } else {
        let reach = (mean - least as f64).max(greatest as f64 - mean);
        2 * ((reach + 1.0) / stdev).ceil() as usize
    };

    let mut counts = vec![0usize; total];
    for &value in &kept {
        counts[bucket_index(value, mean, stdev, total)] += 1;
    }
    Ok(Some(Binning::with_counts(mean, stdev, &counts)))
}

fn bucket_index(value: i64, mean: f64, stdev: f64, total: usize) -> usize {
    let half = (total / 2) as f64;
    if stdev == 0.0 {
        return total / 2;
    }
    let raw = ((value as f64 - mean) / stdev + half).floor();
    (raw.max(0.0) as usize).min(total - 1)
}

fn bounds(index: usize, total: usize, mean: f64, stdev: f64) -> (i64, i64) {
    let position = index as f64 - (total / 2) as f64;
    let lower = (position * stdev + mean).floor() as i64;
    let upper = ((position + 1.0) * stdev + mean).floor() as i64;
    (lower, upper)
}

/// Trims empty edge buckets and fits the rest into `chart`.
pub fn layout(binning: &Binning, chart: &ChartGeometry) -> Vec<DistributionBucket> {
    let total = binning.buckets.len();
    let visible: &[RawBucket] = if binning.is_degenerate() {
        &binning.buckets
    } else {
        let first = binning.buckets.iter().position(|b| b.count > 0);
        let last = binning.buckets.iter().rposition(|b| b.count > 0);
        match (first, last) {
            (Some(first), Some(last)) => &binning.buckets[first..=last],
            _ => &[],
        }
    };
    if visible.is_empty() {
        return Vec::new();
    }

    let max_count = binning.buckets.iter().map(|b| b.count).max().unwrap_or(0);
    let bar_width = chart.width / visible.len() as f64;

    visible
        .iter()
        .enumerate()
        .map(|(slot, b)| {
            // count / (max_count / height), folded to keep whole-pixel results exact
            let bar_height = if max_count > 0 {
                b.count as f64 * chart.height / max_count as f64
            } else {
                0.0
            };
            DistributionBucket {
                lower_bound: b.lower_bound,
                upper_bound: b.upper_bound,
                count: b.count,
                offset_x: slot as f64 * bar_width,
                offset_y: chart.height - bar_height,
                bar_width,
                bar_height,
                side: if b.index < total / 2 {
                    BucketSide::Less
                } else {
                    BucketSide::Greater
                },
                label: if bar_height >= chart.label_height {
                    LabelPlacement::Above
                } else {
                    LabelPlacement::Beside
                },
            }
        })
        .collect()
}

/// Pure: same samples and geometry always give the same buckets.
pub fn analyze(
    samples: &[i64],
    chart: &ChartGeometry,
) -> Result<Vec<DistributionBucket>, AnalyzeError> {
    Ok(bin(samples)?
        .map(|b| layout(&b, chart))
        .unwrap_or_default())
}

/// Pulls `runs[*][view][metric]` out of an unshrunk result, in run order.
/// Runs without the view (or without the metric in it) give [`MISSING_SAMPLE`].
pub fn samples_for(
    result: &NormalizedResult,
    metric: &str,
    view: View,
) -> Result<Vec<i64>, AnalyzeError> {
    let Some(runs) = result.metrics.get(metric).and_then(|p| p.get("runs")) else {
        return Ok(Vec::new());
    };

    let mut ordered: Vec<(String, &Value)> = match runs {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v))
            .collect(),
        _ => return Ok(Vec::new()),
    };
    ordered.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });

    let mut out = Vec::with_capacity(ordered.len());
    for (run, data) in ordered {
        let value = data.get(view.key()).and_then(|v| v.get(metric));
        let sample = match value {
            None | Some(Value::Null) => MISSING_SAMPLE,
            Some(v) => as_sample(v).ok_or_else(|| AnalyzeError::NotInteger {
                metric: metric.to_string(),
                view: view.key().to_string(),
                run: run.clone(),
                value: v.to_string(),
            })?,
        };
        out.push(sample);
    }
    Ok(out)
}

fn as_sample(v: &Value) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return (i >= 0 || i == MISSING_SAMPLE).then_some(i);
    }
    let f = v.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0 && f <= i64::MAX as f64).then_some(f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_position_from_center() {
        assert_eq!(bounds(0, 4, 100.0, 10.0), (80, 90));
        assert_eq!(bounds(2, 4, 100.0, 10.0), (100, 110));
        assert_eq!(bounds(1, 2, 42.0, 0.0), (42, 42));
    }

    #[test]
    fn index_is_clamped_into_range() {
        assert_eq!(bucket_index(0, 100.0, 1.0, 4), 0);
        assert_eq!(bucket_index(1000, 100.0, 1.0, 4), 3);
        assert_eq!(bucket_index(7, 7.0, 0.0, 2), 1);
    }

    #[test]
    fn whole_floats_are_samples() {
        assert_eq!(as_sample(&serde_json::json!(12.0)), Some(12));
        assert_eq!(as_sample(&serde_json::json!(12.5)), None);
        assert_eq!(as_sample(&serde_json::json!(-3)), None);
        assert_eq!(as_sample(&serde_json::json!("12")), None);
    }
}
