use crate::{
    client::{http::WptClient, JobHandle},
    config::Config,
    distribution::View,
    orchestrator::{MetricSet, Orchestrator},
    reduce::{NormalizedResult, Reducer},
    report::{self, ReportOptions, Times},
    util::{ensure_dir, now_rfc3339, read_json, sha256_hex, write_json},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "wpt-batch")]
#[command(about = "Batch WebPageTest orchestrator (submit + poll + reduce + run distributions)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./wpt-batch.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration (API key redacted).
    Config {},
    /// Submit every configured test and write the job handles.
    Submit {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Poll previously submitted handles and write the report.
    Fetch {
        #[arg(long)]
        handles: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Submit, poll, analyze and write the report.
    Run {
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print run distributions from a saved results file.
    Analyze {
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        metric: Option<String>,
        #[arg(long)]
        view: Option<String>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = Config::load(&cfg_path)?;

    match &args.cmd {
        Command::Config {} => {
            println!("{}", toml::to_string(&cfg.redacted())?);
            Ok(())
        }
        Command::Analyze {
            results,
            metric,
            view,
        } => {
            let log_path = resolve_log_path(&cfg, None);
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            analyze(&cfg, results, metric.as_deref(), view.as_deref())
        }
        Command::Submit { out_dir } => {
            cfg.validate()?;
            let batch_dir = prepare_batch_dir(&cfg, out_dir.as_deref())?;
            let log_path = resolve_log_path(&cfg, Some(&batch_dir));
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            block_on(submit(&cfg, &batch_dir))
        }
        Command::Fetch { handles, out_dir } => {
            cfg.validate()?;
            let batch_dir = prepare_batch_dir(&cfg, out_dir.as_deref())?;
            let log_path = resolve_log_path(&cfg, Some(&batch_dir));
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            let handles: Vec<JobHandle> = read_json(handles)?;
            block_on(fetch(&cfg, &batch_dir, handles, now_rfc3339()))
        }
        Command::Run { out_dir } => {
            cfg.validate()?;
            let batch_dir = prepare_batch_dir(&cfg, out_dir.as_deref())?;
            let log_path = resolve_log_path(&cfg, Some(&batch_dir));
            let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
            block_on(run(&cfg, &batch_dir))
        }
    }
}

static LOGGING_STARTED: AtomicBool = AtomicBool::new(false);

/// False until a subscriber is installed; errors raised earlier have nowhere
/// to go but stderr.
pub fn logging_started() -> bool {
    LOGGING_STARTED.load(Ordering::Acquire)
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("wpt-batch.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("wpt-batch.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;
    LOGGING_STARTED.store(true, Ordering::Release);

    Ok(guard)
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .with_context(|| "building tokio runtime")?;
    rt.block_on(fut)
}

/// Same config and test list always map to the same directory, which is what
/// makes `resume` able to pick up saved handles.
fn batch_id(cfg: &Config) -> String {
    let hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    format!("{}-{}", cfg.global.batch_name, &hash[..12])
}

fn prepare_batch_dir(cfg: &Config, out_override: Option<&Path>) -> Result<PathBuf> {
    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let batch_dir = out_root.join(batch_id(cfg));

    if batch_dir.exists() && !cfg.global.resume {
        return Err(anyhow!(
            "batch_dir already exists and resume=false: {}",
            batch_dir.display()
        ));
    }

    ensure_dir(&batch_dir)?;
    ensure_dir(&batch_dir.join("logs"))?;

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(&cfg.redacted()).unwrap_or_default();
        std::fs::write(batch_dir.join("effective-config.toml"), raw)?;
    }
    Ok(batch_dir)
}

fn orchestrator(cfg: &Config) -> Result<Orchestrator<WptClient>> {
    let client = WptClient::new(cfg)?;
    if cfg.api_key().is_none() {
        warn!("no API key configured; the public instance will likely reject submissions");
    }
    Ok(Orchestrator::new(
        client,
        MetricSet::new(cfg.metrics.names.iter().cloned())?,
        cfg.retry_policy(),
        Reducer::new(cfg.shrink_rules()),
    ))
}

async fn submit(cfg: &Config, batch_dir: &Path) -> Result<()> {
    let orch = orchestrator(cfg)?;
    let specs = cfg.job_specs();
    let handles = orch.run_tests(&specs).await?;
    if cfg.output.write_handles_json {
        let path = batch_dir.join(&cfg.output.handles_filename);
        write_json(&path, &handles)?;
        info!("handles written to {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&handles)?);
    Ok(())
}

async fn run(cfg: &Config, batch_dir: &Path) -> Result<()> {
    let begin = now_rfc3339();
    let orch = orchestrator(cfg)?;
    let handles_path = batch_dir.join(&cfg.output.handles_filename);

    let handles: Vec<JobHandle> = if cfg.global.resume && handles_path.exists() {
        info!("resuming from {}", handles_path.display());
        read_json(&handles_path)?
    } else {
        let specs = cfg.job_specs();
        let handles = orch.run_tests(&specs).await?;
        if cfg.output.write_handles_json {
            write_json(&handles_path, &handles)?;
        }
        handles
    };

    let results = orch.get_results(&handles).await?;
    finish(cfg, batch_dir, orch.reducer(), results, begin)
}

async fn fetch(cfg: &Config, batch_dir: &Path, handles: Vec<JobHandle>, begin: String) -> Result<()> {
    let orch = orchestrator(cfg)?;
    let results = orch.get_results(&handles).await?;
    finish(cfg, batch_dir, orch.reducer(), results, begin)
}

fn finish(
    cfg: &Config,
    batch_dir: &Path,
    reducer: &Reducer,
    results: Vec<NormalizedResult>,
    begin: String,
) -> Result<()> {
    if cfg.output.write_raw_results_json {
        write_json(&batch_dir.join(&cfg.output.raw_results_filename), &results)?;
    }

    let views = cfg.views()?;
    let times = Times {
        begin: begin.clone(),
        end: now_rfc3339(),
    };
    let failed = results.iter().filter(|r| r.is_failed()).count();
    let partial = results.iter().filter(|r| !r.metric_errors.is_empty()).count();
    let total = results.len();
    let report = report::build(results, ReportOptions::from_config(cfg, &views), times, reducer)
        .with_context(|| "computing run distributions")?;

    if cfg.output.write_results_json {
        write_json(&batch_dir.join(&cfg.output.results_filename), &report)?;
    }

    if cfg.output.write_index_json {
        let index = serde_json::json!({
            "batch_id": batch_id(cfg),
            "started": begin,
            "finished": report.times.end,
            "jobs": total,
            "failed_jobs": failed,
            "jobs_with_failed_metrics": partial,
            "handles": cfg.output.handles_filename,
            "results": cfg.output.results_filename,
        });
        write_json(&batch_dir.join("index.json"), &index)?;
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "batch_dir": batch_dir,
                "jobs": total,
                "failed_jobs": failed,
                "jobs_with_failed_metrics": partial,
                "status": if failed == 0 && partial == 0 { "ok" } else { "partial" },
            }))?
        );
    }

    Ok(())
}

fn analyze(cfg: &Config, path: &Path, metric: Option<&str>, view: Option<&str>) -> Result<()> {
    let raw: serde_json::Value = read_json(path)?;
    // Accept either a written report (results under "data") or a raw results array.
    let data = match raw {
        serde_json::Value::Object(mut obj) => obj
            .remove("data")
            .ok_or_else(|| anyhow!("{} has no data array", path.display()))?,
        other => other,
    };
    let results: Vec<NormalizedResult> =
        serde_json::from_value(data).with_context(|| format!("parsing {}", path.display()))?;

    let metrics: Vec<String> = match metric {
        Some(m) => vec![m.to_string()],
        None => cfg.metrics.names.clone(),
    };
    let views = match view {
        Some(v) => vec![View::parse(v).ok_or_else(|| anyhow!("unknown view: {v}"))?],
        None => cfg.views()?,
    };

    let dists = report::distributions(&results, &metrics, &views, &cfg.chart_geometry())?;
    info!("{} distributions from {} results", dists.len(), results.len());
    println!("{}", serde_json::to_string_pretty(&dists)?);
    Ok(())
}

fn resolve_log_path(cfg: &Config, batch_dir: Option<&Path>) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    if let Some(batch_dir) = batch_dir {
        return Some(batch_dir.join("logs").join("wpt-batch.log"));
    }

    Some(PathBuf::from(&cfg.paths.out_dir).join("wpt-batch.log"))
}
