//! Ingest run orchestration: reconcile, fetch, normalize, write.

pub mod orchestrator;
pub mod reconcile;
pub mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Datelike, Utc};
use matchstats_adapters::{
    calendar_table, is_court_vision_capable, listing_record, results_table, AtpResultSource,
    ColumnMap, EndpointTemplates, NormalizeContext, NormalizerRegistry, ResultSource, SourceError,
    CALENDAR_STATUS_COLUMN, RESULTS_STATUS_COLUMN,
};
use matchstats_core::{
    DataType, DecryptedArtifact, ListingEntity, LocalSnapshot, NaturalKey, StoredRecord, TableSpec,
    WorkItem,
};
use matchstats_storage::{
    ArtifactFetcher, ArtifactStore, BackoffPolicy, HttpClientConfig, HttpFetchClient,
    DEFAULT_USER_AGENT,
};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use orchestrator::{
    AttemptLog, BatchReport, FetchOrchestrator, FetchOutcome, FetchStatus, OrchestratorConfig,
};
pub use reconcile::{reconcile, ReconcileStats, Reconciliation};
pub use store::{SnapshotFilter, SqliteStorage, StoreError, StoreWriter, Storage, WriteReport};

pub const CRATE_NAME: &str = "matchstats-sync";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: String,
    pub artifacts_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter: bool,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub write_batch_size: usize,
    pub reconcile_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub overwrite: bool,
    /// Season to ingest; the current UTC year when unset.
    pub year: Option<i32>,
    pub data_types: Vec<DataType>,
    pub endpoints: EndpointTemplates,
    pub column_map: ColumnMap,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://matchstats.db?mode=rwc".to_string(),
            artifacts_dir: PathBuf::from("./artifacts"),
            reports_dir: PathBuf::from("./reports"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            concurrency: 15,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 10_000,
            backoff_jitter: false,
            pacing_min_ms: 1_000,
            pacing_max_ms: 3_000,
            write_batch_size: 10,
            reconcile_timeout_secs: 300,
            write_timeout_secs: 30,
            overwrite: false,
            year: None,
            data_types: DataType::ALL.to_vec(),
            endpoints: EndpointTemplates::default(),
            column_map: ColumnMap::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; unset or unparsable numbers keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let number = |name: &str, default: u64| -> u64 {
            lookup(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };
        let flag = |name: &str| {
            lookup(name)
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
                .unwrap_or(false)
        };

        let data_types = match lookup("MATCHSTATS_DATA_TYPES") {
            Some(raw) if !raw.trim().is_empty() => parse_data_types(&raw)?,
            _ => defaults.data_types.clone(),
        };
        let endpoints = match lookup("MATCHSTATS_ENDPOINTS") {
            Some(path) => EndpointTemplates::from_yaml_file(&path)?,
            None => defaults.endpoints.clone(),
        };
        let column_map = match lookup("MATCHSTATS_COLUMN_MAP") {
            Some(path) => ColumnMap::from_yaml_file(&path)?,
            None => defaults.column_map.clone(),
        };
        let year = match lookup("MATCHSTATS_YEAR") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("MATCHSTATS_YEAR `{raw}` is not a year"))?,
            ),
            None => None,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            artifacts_dir: lookup("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            reports_dir: lookup("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
            user_agent: lookup("MATCHSTATS_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: number("MATCHSTATS_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            concurrency: number("MATCHSTATS_CONCURRENCY", defaults.concurrency as u64) as usize,
            max_attempts: number("MATCHSTATS_MAX_ATTEMPTS", u64::from(defaults.max_attempts)) as u32,
            backoff_base_ms: number("MATCHSTATS_BACKOFF_BASE_MS", defaults.backoff_base_ms),
            backoff_cap_ms: number("MATCHSTATS_BACKOFF_CAP_MS", defaults.backoff_cap_ms),
            backoff_jitter: flag("MATCHSTATS_BACKOFF_JITTER"),
            pacing_min_ms: number("MATCHSTATS_PACING_MIN_MS", defaults.pacing_min_ms),
            pacing_max_ms: number("MATCHSTATS_PACING_MAX_MS", defaults.pacing_max_ms),
            write_batch_size: number("MATCHSTATS_WRITE_BATCH_SIZE", defaults.write_batch_size as u64)
                as usize,
            reconcile_timeout_secs: number(
                "MATCHSTATS_RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout_secs,
            ),
            write_timeout_secs: number("MATCHSTATS_WRITE_TIMEOUT_SECS", defaults.write_timeout_secs),
            overwrite: flag("MATCHSTATS_OVERWRITE"),
            year,
            data_types,
            endpoints,
            column_map,
        })
    }

    pub fn http(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency: self.concurrency.max(1),
            backoff: self.backoff(),
            pacing_min: Duration::from_millis(self.pacing_min_ms),
            pacing_max: Duration::from_millis(self.pacing_max_ms.max(self.pacing_min_ms)),
        }
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

pub fn parse_data_types(raw: &str) -> anyhow::Result<Vec<DataType>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let data_type = DataType::from_str(part).map_err(|e| anyhow!(e))?;
        if !out.contains(&data_type) {
            out.push(data_type);
        }
    }
    Ok(out)
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{step} step exceeded its {limit:?} limit")]
    StepTimeout { step: &'static str, limit: Duration },
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
    #[error("remote listing unavailable: {0}")]
    Listing(#[source] SourceError),
    #[error("writing run report: {0:#}")]
    Report(anyhow::Error),
}

/// End-of-run counts for one data type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTypeSummary {
    /// Fetched and archived this run.
    pub processed: usize,
    /// Already archived and not refetched.
    pub skipped: usize,
    /// Skipped artifacts loaded back from the archive for normalization.
    pub reloaded: usize,
    pub failed: usize,
    pub normalized: usize,
    pub rows_written: u64,
    pub rows_rejected: usize,
    pub normalizer_registered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_id: String,
    pub year: i32,
    pub tournaments: ReconcileStats,
    pub matches: ReconcileStats,
    pub listing_failures: usize,
    pub work_items: usize,
    pub fetch_batch_successful: bool,
    pub data_types: BTreeMap<DataType, DataTypeSummary>,
    pub writes: Vec<WriteReport>,
    /// Set when a step hit its timeout and the rest of the run was skipped.
    pub aborted: Option<String>,
    pub reports_dir: String,
}

impl RunSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, source_id: &str, year: i32) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            source_id: source_id.to_string(),
            year,
            tournaments: ReconcileStats::default(),
            matches: ReconcileStats::default(),
            listing_failures: 0,
            work_items: 0,
            fetch_batch_successful: false,
            data_types: BTreeMap::new(),
            writes: Vec::new(),
            aborted: None,
            reports_dir: String::new(),
        }
    }

    fn data_type(&mut self, data_type: DataType) -> &mut DataTypeSummary {
        self.data_types.entry(data_type).or_default()
    }

    pub fn brief_markdown(&self) -> String {
        let per_type = self
            .data_types
            .iter()
            .map(|(data_type, s)| {
                format!(
                    "- {data_type}: processed {}, skipped {}, reloaded {}, failed {}, rows written {}",
                    s.processed, s.skipped, s.reloaded, s.failed, s.rows_written
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "# Ingest Run {}\n\n- Source: {} ({})\n- Started: {}\n- Finished: {}\n- Tournaments selected: {} of {}\n- Matches selected: {} of {}\n- Listing failures: {}\n- Aborted: {}\n\n## Data Types\n{}\n",
            self.run_id,
            self.source_id,
            self.year,
            self.started_at,
            self.finished_at,
            self.tournaments.selected,
            self.tournaments.remote,
            self.matches.selected,
            self.matches.remote,
            self.listing_failures,
            self.aborted.as_deref().unwrap_or("no"),
            per_type
        )
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
    source: Arc<dyn ResultSource>,
    storage: Arc<dyn Storage>,
    archive: ArtifactStore,
    orchestrator: FetchOrchestrator,
    writer: StoreWriter,
    registry: NormalizerRegistry,
}

impl IngestPipeline {
    /// Wires the HTTP result source, HTTP fetcher and SQLite storage from `config`.
    pub async fn connect(config: IngestConfig) -> anyhow::Result<Self> {
        let http = HttpFetchClient::new(config.http())?;
        let source = Arc::new(AtpResultSource::new(http.clone(), config.endpoints.clone()));
        let storage = SqliteStorage::connect(&config.database_url)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?;
        Ok(Self::with_components(config, source, Arc::new(http), Arc::new(storage)))
    }

    pub fn with_components(
        config: IngestConfig,
        source: Arc<dyn ResultSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let archive = ArtifactStore::new(config.artifacts_dir.clone());
        let orchestrator = FetchOrchestrator::new(fetcher, config.orchestrator());
        let writer = StoreWriter::new(storage.clone(), config.write_batch_size);
        let registry = NormalizerRegistry::with_defaults(config.column_map.clone());
        Self {
            config,
            source,
            storage,
            archive,
            orchestrator,
            writer,
            registry,
        }
    }

    pub fn with_registry(mut self, registry: NormalizerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Creates every listing and stat table. Returns the table names.
    pub async fn migrate(&self) -> Result<Vec<String>, PipelineError> {
        let mut tables = vec![calendar_table(), results_table()];
        tables.extend(self.registry.table_specs());
        for table in &tables {
            self.storage.ensure_table(table).await?;
        }
        Ok(tables.into_iter().map(|t| t.name).collect())
    }

    pub async fn run_once(&self) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let year = self.config.year.unwrap_or_else(|| started_at.year());
        let reports_dir = self.config.reports_dir.join(run_id.to_string());

        let mut run = RunSummary::new(run_id, started_at, self.source.source_id(), year);
        run.reports_dir = reports_dir.display().to_string();
        let mut attempts = Vec::new();
        info!(%run_id, year, source = %run.source_id, "ingest run started");

        match self.execute(year, &mut run, &mut attempts).await {
            Ok(()) => {}
            Err(err @ PipelineError::StepTimeout { .. }) => {
                error!(%run_id, error = %err, "step timed out; rest of the run skipped");
                run.aborted = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }

        run.finished_at = Utc::now();
        self.write_report(&reports_dir, &run, &attempts)
            .await
            .map_err(PipelineError::Report)?;

        for (data_type, s) in &run.data_types {
            info!(
                %run_id,
                %data_type,
                processed = s.processed,
                skipped = s.skipped,
                reloaded = s.reloaded,
                failed = s.failed,
                rows_written = s.rows_written,
                "data type summary"
            );
        }
        Ok(run)
    }

    async fn execute(
        &self,
        year: i32,
        run: &mut RunSummary,
        attempts: &mut Vec<AttemptLog>,
    ) -> Result<(), PipelineError> {
        self.migrate().await?;

        // reconcile
        let calendar = self
            .source
            .list_calendar(year)
            .await
            .map_err(PipelineError::Listing)?;
        let calendar_table = calendar_table();
        let local = self.snapshot(&calendar_table, CALENDAR_STATUS_COLUMN, year).await?;
        let tournaments = reconcile(calendar, &local);
        run.tournaments = tournaments.stats;
        info!(year, stats = ?tournaments.stats, "tournaments reconciled");

        let mut unfinished: BTreeSet<NaturalKey> = BTreeSet::new();
        let mut remote_matches = Vec::new();
        for tournament in &tournaments.to_fetch {
            if tournament.url.is_none() {
                debug!(key = ?tournament.natural_key(), "no results page yet");
                continue;
            }
            match self.source.list_matches(tournament).await {
                Ok(mut matches) => remote_matches.append(&mut matches),
                Err(err) => {
                    run.listing_failures += 1;
                    if let Some(key) = tournament.natural_key() {
                        warn!(%key, error = %err, "match listing failed; tournament skipped");
                        unfinished.insert(key);
                    }
                }
            }
        }

        let results_table = results_table();
        let local = self.snapshot(&results_table, RESULTS_STATUS_COLUMN, year).await?;
        let matches = reconcile(remote_matches, &local);
        run.matches = matches.stats;
        info!(year, stats = ?matches.stats, "matches reconciled");

        // fetch
        let (items, archived) = self.plan_work(&matches.to_fetch, run).await;
        run.work_items = items.len();
        let batch = self.orchestrator.run(items).await;
        run.fetch_batch_successful = batch.is_successful();
        attempts.extend(batch.attempts.iter().cloned());

        let mut fetched: Vec<(NaturalKey, DataType, DecryptedArtifact)> = Vec::new();
        for outcome in batch.outcomes {
            let key = outcome.work_item.natural_key.clone();
            let data_type = outcome.work_item.data_type;
            let artifact = match (outcome.status, outcome.artifact) {
                (FetchStatus::Success, Some(artifact)) => artifact,
                (_, _) => {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no artifact".to_string());
                    warn!(%key, %data_type, %reason, "artifact not fetched");
                    run.data_type(data_type).failed += 1;
                    unfinished.insert(key);
                    continue;
                }
            };
            match self.archive.store(&key, data_type, &artifact, self.config.overwrite).await {
                Ok(stored) => {
                    debug!(%key, %data_type, hash = %stored.content_hash, bytes = stored.byte_size, "archived");
                    run.data_type(data_type).processed += 1;
                    fetched.push((key, data_type, artifact));
                }
                Err(err) => {
                    warn!(%key, %data_type, error = %format!("{err:#}"), "archive write failed");
                    run.data_type(data_type).failed += 1;
                    unfinished.insert(key);
                }
            }
        }

        // rows of an archived artifact may never have been written
        for (key, data_type) in archived {
            match self.archive.load(&key, data_type).await {
                Ok(Some(artifact)) => {
                    run.data_type(data_type).reloaded += 1;
                    fetched.push((key, data_type, artifact));
                }
                Ok(None) => {
                    warn!(%key, %data_type, "archived artifact disappeared; refetched next run");
                    run.data_type(data_type).failed += 1;
                    unfinished.insert(key);
                }
                Err(err) => {
                    warn!(%key, %data_type, error = %format!("{err:#}"), "archived artifact unreadable");
                    run.data_type(data_type).failed += 1;
                    unfinished.insert(key);
                }
            }
        }

        // normalize
        let rounds: HashMap<NaturalKey, Option<String>> = matches
            .to_fetch
            .iter()
            .filter_map(|m| Some((m.natural_key()?, m.attribute_text("round").map(str::to_string))))
            .collect();
        let rallies: HashMap<NaturalKey, DecryptedArtifact> = fetched
            .iter()
            .filter(|(_, data_type, _)| *data_type == DataType::RallyAnalysis)
            .map(|(key, _, artifact)| (key.clone(), artifact.clone()))
            .collect();

        let mut pending_rows: BTreeMap<DataType, Vec<StoredRecord>> = BTreeMap::new();
        for (key, data_type, artifact) in &fetched {
            let Some(normalizer) = self.registry.get(*data_type) else {
                debug!(%key, %data_type, "no normalizer registered; archived only");
                continue;
            };
            let rally = match data_type {
                DataType::KeyStats => self.companion_rally(key, &rallies).await,
                _ => None,
            };
            let ctx = NormalizeContext::new(key.clone())
                .with_round(rounds.get(key).cloned().flatten())
                .with_rally_analysis(rally);
            match normalizer.normalize(*data_type, artifact, &ctx) {
                Ok(records) => {
                    run.data_type(*data_type).normalized += 1;
                    pending_rows.entry(*data_type).or_default().extend(records);
                }
                Err(err) => {
                    warn!(%key, %data_type, error = %err, "normalization failed");
                    run.data_type(*data_type).failed += 1;
                    unfinished.insert(key.clone());
                }
            }
        }
        for data_type in &self.config.data_types {
            let registered = self.registry.get(*data_type).is_some();
            let summary = run.data_type(*data_type);
            summary.normalizer_registered = registered;
            if !registered && summary.processed > 0 {
                info!(%data_type, count = summary.processed, reason = "no normalizer registered", "write skipped");
            }
        }

        // write
        for (data_type, records) in pending_rows {
            let Some(normalizer) = self.registry.get(data_type) else {
                continue;
            };
            let report = self.write(&normalizer.table_spec(), records).await?;
            let summary = run.data_type(data_type);
            summary.rows_written += report.written;
            summary.rows_rejected += report.rejected.len();
            run.writes.push(report);
        }

        let finished_matches: Vec<StoredRecord> = matches
            .to_fetch
            .iter()
            .filter(|m| m.natural_key().is_some_and(|k| !unfinished.contains(&k)))
            .filter_map(listing_record)
            .collect();
        let report = self.write(&results_table, finished_matches).await?;
        run.writes.push(report);

        let finished_tournaments: Vec<StoredRecord> = tournaments
            .to_fetch
            .iter()
            .filter(|t| {
                t.natural_key().is_some_and(|key| {
                    !unfinished.contains(&key) && !unfinished.iter().any(|k| k.tournament_key() == key)
                })
            })
            .filter_map(listing_record)
            .collect();
        let report = self.write(&calendar_table, finished_tournaments).await?;
        run.writes.push(report);
        Ok(())
    }

    /// Work items for every configured data type of every selected match, plus
    /// the artifacts already archived for them.
    async fn plan_work(
        &self,
        matches: &[ListingEntity],
        run: &mut RunSummary,
    ) -> (Vec<WorkItem>, Vec<(NaturalKey, DataType)>) {
        let mut items = Vec::new();
        let mut archived = Vec::new();
        for data_type in &self.config.data_types {
            run.data_type(*data_type);
            for entity in matches {
                let Some(key) = entity.natural_key() else {
                    continue;
                };
                if *data_type == DataType::CourtVision && !is_court_vision_capable(entity) {
                    continue;
                }
                if !self.config.overwrite {
                    match self.archive.contains(&key, *data_type).await {
                        Ok(true) => {
                            info!(%key, %data_type, reason = "already archived", "fetch skipped");
                            run.data_type(*data_type).skipped += 1;
                            archived.push((key, *data_type));
                            continue;
                        }
                        Ok(false) => {}
                        Err(err) => warn!(%key, %data_type, error = %format!("{err:#}"), "archive lookup failed; fetching"),
                    }
                }
                let Some(url) = self.config.endpoints.artifact_url(*data_type, &key) else {
                    continue;
                };
                items.push(WorkItem::new(key, *data_type, url));
            }
        }
        (items, archived)
    }

    async fn companion_rally(
        &self,
        key: &NaturalKey,
        fetched: &HashMap<NaturalKey, DecryptedArtifact>,
    ) -> Option<DecryptedArtifact> {
        if let Some(rally) = fetched.get(key) {
            return Some(rally.clone());
        }
        match self.archive.load(key, DataType::RallyAnalysis).await {
            Ok(rally) => rally,
            Err(err) => {
                warn!(%key, error = %format!("{err:#}"), "archived rally analysis unreadable");
                None
            }
        }
    }

    async fn snapshot(
        &self,
        table: &TableSpec,
        status_column: &str,
        year: i32,
    ) -> Result<LocalSnapshot, PipelineError> {
        let limit = self.config.reconcile_timeout();
        let filter = SnapshotFilter::year(year);
        let query = self.storage.snapshot(table, status_column, &filter);
        match tokio::time::timeout(limit, query).await {
            Ok(snapshot) => Ok(snapshot?),
            Err(_) => Err(PipelineError::StepTimeout {
                step: "reconcile",
                limit,
            }),
        }
    }

    async fn write(&self, table: &TableSpec, records: Vec<StoredRecord>) -> Result<WriteReport, PipelineError> {
        let limit = self.config.write_timeout();
        self.writer
            .write_within(limit, table, records)
            .await?
            .ok_or(PipelineError::StepTimeout { step: "write", limit })
    }

    async fn write_report(&self, dir: &Path, run: &RunSummary, attempts: &[AttemptLog]) -> anyhow::Result<()> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let report = serde_json::to_vec_pretty(&serde_json::json!({
            "summary": run,
            "attempts": attempts,
        }))
        .context("serializing run report")?;
        fs::write(dir.join("run_report.json"), report)
            .await
            .context("writing run_report.json")?;
        fs::write(dir.join("run_brief.md"), run.brief_markdown())
            .await
            .context("writing run_brief.md")?;
        Ok(())
    }
}

pub async fn run_ingest_once_from_env() -> anyhow::Result<RunSummary> {
    let config = IngestConfig::from_env()?;
    let pipeline = IngestPipeline::connect(config).await?;
    Ok(pipeline.run_once().await?)
}
