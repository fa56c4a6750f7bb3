use crate::{
    barrier::{BarrierError, JoinBarrier, Slots},
    client::{JobHandle, JobSpec, TestClient},
    reduce::{MetricOutcome, NormalizedResult, ReduceError, Reducer, RESERVED_FIELDS},
    retry::{PollStep, RetryPolicy},
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
    #[error("{phase} results still shared after every unit finished")]
    SlotsShared { phase: &'static str },
    #[error("metric set is empty")]
    NoMetrics,
    #[error("metric name {name:?} collides with a result field")]
    ReservedMetric { name: String },
    #[error("metric {name:?} listed more than once")]
    DuplicateMetric { name: String },
}

/// Ordered list of metric names polled for every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSet {
    names: Vec<String>,
}

impl MetricSet {
    /// Every accepted job is polled for each name, so the set must be
    /// non-empty, free of duplicates, and clear of the record's own fields.
    pub fn new<I, S>(names: I) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for name in names.into_iter().map(Into::into) {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                return Err(OrchestratorError::ReservedMetric { name });
            }
            if out.contains(&name) {
                return Err(OrchestratorError::DuplicateMetric { name });
            }
            out.push(name);
        }
        if out.is_empty() {
            return Err(OrchestratorError::NoMetrics);
        }
        Ok(Self { names: out })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self {
            names: ["SpeedIndex", "TTFB", "render", "loadTime"]
                .map(String::from)
                .into(),
        }
    }
}

/// Fans a batch out to the remote service: every job is submitted
/// concurrently, then every (job, metric) pair is polled concurrently until
/// it is ready or has failed. Per-unit failures become data on the result;
/// only accounting bugs surface as errors.
///
/// There is no cancellation. Callers needing a deadline wrap the whole call
/// (for example in `tokio::time::timeout`); remote jobs keep running.
pub struct Orchestrator<C> {
    client: Arc<C>,
    metrics: MetricSet,
    policy: RetryPolicy,
    reducer: Reducer,
}

impl<C: TestClient + 'static> Orchestrator<C> {
    pub fn new(client: C, metrics: MetricSet, policy: RetryPolicy, reducer: Reducer) -> Self {
        Self {
            client: Arc::new(client),
            metrics,
            policy,
            reducer,
        }
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    /// Submits every spec. Returns one handle per spec, in input order; a
    /// rejected submission is a handle with `error` set.
    pub async fn run_tests(&self, specs: &[JobSpec]) -> Result<Vec<JobHandle>, OrchestratorError> {
        let started = Instant::now();
        info!("submitting {} jobs", specs.len());

        let barrier = JoinBarrier::new(specs.len());
        let slots: Arc<Slots<JobHandle>> = Slots::new(specs.len());
        let mut tasks = JoinSet::new();

        for (index, spec) in specs.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let slots = Arc::clone(&slots);
            let arrival = barrier.arrival();
            let spec = spec.clone();
            tasks.spawn(async move {
                let handle = match client.submit(&spec).await {
                    Ok(submitted) => {
                        info!("job {} submitted id={}", spec.name, submitted.id);
                        JobHandle::accepted(&spec, submitted.id)
                    }
                    Err(err) => {
                        warn!("job {} submission failed: {err}", spec.name);
                        JobHandle::rejected(&spec, err.to_string())
                    }
                };
                let filled = slots.fill(index, handle);
                drop(slots);
                arrival.complete().and(filled)
            });
        }

        barrier.wait().await;
        reap(&mut tasks, "submission").await?;

        let filled = Arc::try_unwrap(slots)
            .map_err(|_| OrchestratorError::SlotsShared {
                phase: "submission",
            })?
            .into_vec();

        let handles: Vec<JobHandle> = filled
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    JobHandle::rejected(spec, "submission task ended without a result".into())
                })
            })
            .collect();

        let failed = handles.iter().filter(|h| h.is_failed()).count();
        info!(
            "submission done: {} accepted, {} failed in {:?}",
            handles.len() - failed,
            failed,
            started.elapsed()
        );
        Ok(handles)
    }

    /// Polls every accepted job for every metric and reduces the outcomes.
    /// Always returns exactly one record per handle, in handle order.
    pub async fn get_results(
        &self,
        handles: &[JobHandle],
    ) -> Result<Vec<NormalizedResult>, OrchestratorError> {
        let started = Instant::now();
        let accepted: Vec<(usize, &JobHandle)> = handles
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_failed())
            .collect();
        let per_job = self.metrics.len();
        let units = accepted.len() * per_job;
        info!(
            "polling {} jobs x {} metrics = {} units (wait {:?})",
            accepted.len(),
            per_job,
            units,
            self.policy.interval
        );

        let barrier = JoinBarrier::new(units);
        let slots: Arc<Slots<MetricOutcome>> = Slots::new(units);
        let mut tasks = JoinSet::new();

        for (pos, (_, handle)) in accepted.iter().enumerate() {
            // accepted handles always carry an id
            let job_id = handle.id.clone().unwrap_or_default();
            for (m, metric) in self.metrics.names().iter().enumerate() {
                let client = Arc::clone(&self.client);
                let slots = Arc::clone(&slots);
                let arrival = barrier.arrival();
                let policy = self.policy.clone();
                let job_id = job_id.clone();
                let metric = metric.clone();
                tasks.spawn(async move {
                    let outcome = poll_unit(client.as_ref(), &policy, &job_id, &metric).await;
                    let filled = slots.fill(pos * per_job + m, outcome);
                    drop(slots);
                    arrival.complete().and(filled)
                });
            }
        }

        barrier.wait().await;
        reap(&mut tasks, "poll").await?;

        let mut outcomes = Arc::try_unwrap(slots)
            .map_err(|_| OrchestratorError::SlotsShared { phase: "poll" })?
            .into_vec()
            .into_iter();

        let mut by_job: Vec<Option<Vec<MetricOutcome>>> = vec![None; handles.len()];
        for (index, _) in &accepted {
            let job: Vec<MetricOutcome> = self
                .metrics
                .names()
                .iter()
                .filter_map(|metric| {
                    let slot = outcomes.next()?;
                    Some(slot.unwrap_or_else(|| {
                        MetricOutcome::failed(metric, "poll task ended without a result")
                    }))
                })
                .collect();
            by_job[*index] = Some(job);
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, outcomes) in handles.iter().zip(by_job) {
            let record = match outcomes {
                Some(outcomes) => self.reducer.reduce(handle, outcomes)?,
                None => NormalizedResult::from_failed_submission(handle),
            };
            results.push(record);
        }

        info!(
            "polling done: {} results in {:?}",
            results.len(),
            started.elapsed()
        );
        Ok(results)
    }

    /// Submission followed by polling.
    pub async fn run(&self, specs: &[JobSpec]) -> Result<Vec<NormalizedResult>, OrchestratorError> {
        let handles = self.run_tests(specs).await?;
        self.get_results(&handles).await
    }
}

/// Drives one (job, metric) unit to a terminal state.
async fn poll_unit<C: TestClient + ?Sized>(
    client: &C,
    policy: &RetryPolicy,
    job_id: &str,
    metric: &str,
) -> MetricOutcome {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let step = match client.fetch_metric(job_id, metric).await {
            Ok(resp) => policy.classify(resp),
            Err(err) => PollStep::Failed(err.to_string()),
        };
        match step {
            PollStep::Ready(data) => {
                debug!("{job_id}/{metric} ready after {attempts} attempts");
                return MetricOutcome::ready(metric, data);
            }
            PollStep::Failed(msg) => {
                warn!("{job_id}/{metric} failed: {msg}");
                return MetricOutcome::failed(metric, msg);
            }
            PollStep::NotReady if policy.exhausted(attempts) => {
                let msg = format!("gave up after {attempts} attempts");
                warn!("{job_id}/{metric} {msg}");
                return MetricOutcome::failed(metric, msg);
            }
            PollStep::NotReady => {
                debug!(
                    "{job_id}/{metric} not ready (attempt {attempts}); retrying in {:?}",
                    policy.interval
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

async fn reap(
    tasks: &mut JoinSet<Result<(), BarrierError>>,
    phase: &'static str,
) -> Result<(), OrchestratorError> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(res) => res?,
            Err(err) => warn!("{phase} task aborted: {err}"),
        }
    }
    Ok(())
}
