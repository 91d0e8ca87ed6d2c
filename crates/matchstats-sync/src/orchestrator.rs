//! Bounded-concurrency fetch of work items with retry, backoff and pacing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use matchstats_core::{DataType, DecryptedArtifact, NaturalKey, WorkItem};
use matchstats_storage::{ArtifactFetcher, BackoffPolicy, FetchError};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on fetches in flight.
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
    pub pacing_min: Duration,
    pub pacing_max: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 15,
            backoff: BackoffPolicy::default(),
            pacing_min: Duration::from_secs(1),
            pacing_max: Duration::from_secs(3),
        }
    }
}

impl OrchestratorConfig {
    fn pacing_delay(&self) -> Duration {
        let min = self.pacing_min.as_millis() as u64;
        let max = self.pacing_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    RetryableFailure,
    FatalFailure,
}

/// One fetch attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptLog {
    pub natural_key: NaturalKey,
    pub data_type: DataType,
    pub url: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub status: FetchStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub work_item: WorkItem,
    /// `Success` or `FatalFailure`; retryable errors that exhaust the attempt budget end fatal.
    pub status: FetchStatus,
    pub artifact: Option<DecryptedArtifact>,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }

    /// True when the item failed only because it ran out of attempts.
    pub fn exhausted(&self) -> bool {
        !self.is_success() && self.error.as_ref().is_some_and(FetchError::is_retryable)
    }

    fn aborted(work_item: WorkItem, message: &str) -> Self {
        let error = FetchError::Aborted {
            url: work_item.url.clone(),
            message: message.to_string(),
        };
        Self {
            work_item,
            status: FetchStatus::FatalFailure,
            artifact: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One outcome per work item, in submission order.
    pub outcomes: Vec<FetchOutcome>,
    pub attempts: Vec<AttemptLog>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// A batch succeeds when at least one item was fetched.
    pub fn is_successful(&self) -> bool {
        self.succeeded() > 0
    }
}

pub struct FetchOrchestrator {
    fetcher: Arc<dyn ArtifactFetcher>,
    config: OrchestratorConfig,
}

impl FetchOrchestrator {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, config: OrchestratorConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn run(&self, items: Vec<WorkItem>) -> BatchReport {
        let total = items.len();
        if total == 0 {
            return BatchReport::default();
        }
        info!(items = total, concurrency = self.config.concurrency, "starting fetch batch");

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: Vec<Option<WorkItem>> = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            pending.push(Some(item.clone()));
            let permits = permits.clone();
            let fetcher = self.fetcher.clone();
            let config = self.config.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, FetchOutcome::aborted(item, "concurrency limiter closed"), Vec::new());
                };
                let mut attempts = Vec::new();
                let outcome = fetch_with_retry(fetcher.as_ref(), &config, item, &mut attempts).await;
                if outcome.is_success() {
                    // pacing holds the permit so the limit also bounds request rate
                    let pause = config.pacing_delay();
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
                (index, outcome, attempts)
            });
        }

        let mut slots: Vec<Option<FetchOutcome>> = vec![None; total];
        let mut attempts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome, mut logs)) => {
                    slots[index] = Some(outcome);
                    attempts.append(&mut logs);
                }
                Err(err) => error!(error = %err, "fetch task did not complete"),
            }
        }

        let outcomes: Vec<FetchOutcome> = slots
            .into_iter()
            .zip(pending)
            .filter_map(|(slot, item)| match (slot, item) {
                (Some(outcome), _) => Some(outcome),
                (None, Some(item)) => Some(FetchOutcome::aborted(item, "fetch task panicked")),
                (None, None) => None,
            })
            .collect();
        attempts.sort_by(|a: &AttemptLog, b: &AttemptLog| a.timestamp.cmp(&b.timestamp));

        let report = BatchReport { outcomes, attempts };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            attempts = report.attempts.len(),
            "fetch batch finished"
        );
        report
    }
}

async fn fetch_with_retry(
    fetcher: &dyn ArtifactFetcher,
    config: &OrchestratorConfig,
    mut item: WorkItem,
    attempts: &mut Vec<AttemptLog>,
) -> FetchOutcome {
    let max_attempts = config.backoff.max_attempts.max(1);
    loop {
        item.attempt_count += 1;
        let attempt = item.attempt_count;
        let span = info_span!(
            "fetch_attempt",
            natural_key = %item.natural_key,
            url = %item.url,
            attempt
        );
        let result = fetcher.fetch(&item.natural_key, &item.url).instrument(span).await;

        let mut log = AttemptLog {
            natural_key: item.natural_key.clone(),
            data_type: item.data_type,
            url: item.url.clone(),
            attempt,
            timestamp: Utc::now(),
            status: FetchStatus::Success,
            error: None,
        };

        match result {
            Ok(artifact) => {
                debug!(key = %item.natural_key, data_type = %item.data_type, attempt, "fetched");
                attempts.push(log);
                return FetchOutcome {
                    work_item: item,
                    status: FetchStatus::Success,
                    artifact: Some(artifact),
                    error: None,
                };
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = config.backoff.sleep_for_attempt(attempt - 1);
                warn!(
                    key = %item.natural_key,
                    data_type = %item.data_type,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "fetch failed; retrying"
                );
                log.status = FetchStatus::RetryableFailure;
                log.error = Some(err.to_string());
                attempts.push(log);
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                log.status = if err.is_retryable() {
                    FetchStatus::RetryableFailure
                } else {
                    FetchStatus::FatalFailure
                };
                log.error = Some(err.to_string());
                attempts.push(log);
                warn!(
                    key = %item.natural_key,
                    data_type = %item.data_type,
                    attempt,
                    exhausted = err.is_retryable(),
                    error = %err,
                    "fetch failed permanently"
                );
                return FetchOutcome {
                    work_item: item,
                    status: FetchStatus::FatalFailure,
                    artifact: None,
                    error: Some(err),
                };
            }
        }
    }
}
