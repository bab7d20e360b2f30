//! Portal -> Website tournament reconciliation: matching, duplicate
//! resolution, field sync, staging promotion, reports and scheduling.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tourney_core::{TournamentApplication, TournamentRecord, VisibilityState};
use tourney_portal::{source_for, ApplicationSource, PortalConfig, PortalError};
use tourney_storage::{open_store, BackoffPolicy, HttpClientConfig, RecordStore, StoreConfig, StoreError};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod gate;
pub mod matcher;
pub mod report;
pub mod resolver;

pub use gate::{check_record, GateOutcome, PurgeReport, StagingPromoter, SweepReport};
pub use matcher::{matcher_for, MatchMode, MatcherConfig, RecordMatcher};
pub use resolver::{RecordFailure, RecordOperation, SurvivorOrder};

pub const CRATE_NAME: &str = "tourney-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub store: StoreConfig,
    pub portal: PortalConfig,
    pub portal_timeout_secs: u64,
    pub user_agent: String,
    pub matcher: MatcherConfig,
    pub survivor_order: SurvivorOrder,
    pub auto_ingest_unmatched: bool,
    pub scheduler_enabled: bool,
    pub reconcile_cron: String,
    pub sweep_interval_secs: u64,
    pub backoff_max_secs: u64,
    pub purge_enabled: bool,
    pub staging_max_age_secs: u64,
    pub reports_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::File(PathBuf::from("./data/tournaments.json")),
            portal: PortalConfig::Fixture(PathBuf::from("./fixtures/applications.json")),
            portal_timeout_secs: 20,
            user_agent: "tourney-sync/0.1".to_string(),
            matcher: MatcherConfig::default(),
            survivor_order: SurvivorOrder::OldestFirst,
            auto_ingest_unmatched: false,
            scheduler_enabled: false,
            reconcile_cron: "0 */30 * * * *".to_string(),
            sweep_interval_secs: 30,
            backoff_max_secs: 600,
            purge_enabled: false,
            staging_max_age_secs: 3600,
            reports_dir: PathBuf::from("./reports"),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let store = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => StoreConfig::Postgres { url },
            _ => match std::env::var("TOURNEY_STORE_PATH") {
                Ok(path) => StoreConfig::File(PathBuf::from(path)),
                Err(_) => defaults.store,
            },
        };
        let portal = match std::env::var("PORTAL_URL") {
            Ok(base_url) if !base_url.trim().is_empty() => PortalConfig::Http { base_url },
            _ => match std::env::var("PORTAL_FIXTURE") {
                Ok(path) => PortalConfig::Fixture(PathBuf::from(path)),
                Err(_) => defaults.portal,
            },
        };
        Self {
            store,
            portal,
            portal_timeout_secs: env_parse("PORTAL_TIMEOUT_SECS", defaults.portal_timeout_secs),
            user_agent: std::env::var("TOURNEY_USER_AGENT").unwrap_or(defaults.user_agent),
            matcher: MatcherConfig {
                mode: env_parse("TOURNEY_MATCH_MODE", defaults.matcher.mode),
                fuzzy_threshold: env_parse("TOURNEY_FUZZY_THRESHOLD", defaults.matcher.fuzzy_threshold),
            },
            survivor_order: env_parse("TOURNEY_SURVIVOR_ORDER", defaults.survivor_order),
            auto_ingest_unmatched: env_flag("TOURNEY_AUTO_INGEST"),
            scheduler_enabled: env_flag("TOURNEY_SCHEDULER_ENABLED"),
            reconcile_cron: std::env::var("RECONCILE_CRON").unwrap_or(defaults.reconcile_cron),
            sweep_interval_secs: env_parse("STAGING_SWEEP_SECS", defaults.sweep_interval_secs),
            backoff_max_secs: env_parse("STAGING_BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            purge_enabled: env_flag("STAGING_PURGE_ENABLED"),
            staging_max_age_secs: env_parse("STAGING_MAX_AGE_SECS", defaults.staging_max_age_secs),
            reports_dir: std::env::var("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.reports_dir),
        }
    }

    pub fn staging_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_secs(self.sweep_interval_secs.max(1)),
            max_delay: Duration::from_secs(self.backoff_max_secs.max(self.sweep_interval_secs)),
        }
    }

    pub fn http_client(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.portal_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            survivor_order: self.survivor_order,
            auto_ingest_unmatched: self.auto_ingest_unmatched,
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Whole-pass failures. Per-record problems never surface here.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("source applications unavailable")]
    SourceUnavailable(#[source] PortalError),
    #[error("local record store unavailable")]
    LocalStoreUnavailable(#[source] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedApplication {
    pub application_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalOrphan {
    pub record_id: Uuid,
    pub name: String,
    pub source_application_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source_records: usize,
    pub local_records: usize,
    pub matched: usize,
    pub fixed: usize,
    pub duplicates_removed: usize,
    pub promoted: usize,
    pub ingested: usize,
    pub unmatched_source_records: Vec<UnmatchedApplication>,
    pub local_orphans: Vec<LocalOrphan>,
    pub failures: Vec<RecordFailure>,
}

impl ReconcileSummary {
    pub fn headline(&self) -> String {
        format!(
            "matched={} fixed={} duplicates_removed={} promoted={} unmatched={} orphans={} failures={}",
            self.matched,
            self.fixed,
            self.duplicates_removed,
            self.promoted,
            self.unmatched_source_records.len(),
            self.local_orphans.len(),
            self.failures.len()
        )
    }
}

/// Copies the Portal link onto an unlinked survivor. Name and dates are left
/// alone. Returns whether anything changed.
pub fn sync_fields(
    survivor: &mut TournamentRecord,
    application: &TournamentApplication,
    now: DateTime<Utc>,
) -> bool {
    if survivor.has_source_id() {
        return false;
    }
    survivor.source_application_id = Some(application.application_id.clone());
    survivor.managed_by_source = true;
    survivor.updated_at = now;
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    Created { record_id: Uuid, gate: GateOutcome },
    AlreadyPresent { record_id: Uuid },
    NotApproved,
}

/// Creates a staging record for an approved application unless one already
/// references it, then runs the completeness check on it.
pub async fn ingest_application(
    store: &dyn RecordStore,
    application: &TournamentApplication,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, StoreError> {
    if !application.is_approved() {
        return Ok(IngestOutcome::NotApproved);
    }
    let existing = store.list_records().await?;
    if let Some(record) = existing
        .iter()
        .find(|r| r.source_id() == Some(application.application_id.as_str()))
    {
        return Ok(IngestOutcome::AlreadyPresent { record_id: record.id });
    }

    let record = TournamentRecord::from_application(application, now);
    store.insert_record(&record).await?;
    info!(record_id = %record.id, application_id = %application.application_id, "ingested application into staging");
    let gate = check_record(store, record.id, now).await?;
    Ok(IngestOutcome::Created {
        record_id: record.id,
        gate,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub survivor_order: SurvivorOrder,
    pub auto_ingest_unmatched: bool,
}

/// One full, sequential reconciliation pass over both stores.
pub struct Reconciler {
    source: Arc<dyn ApplicationSource>,
    store: Arc<dyn RecordStore>,
    matcher: Box<dyn RecordMatcher>,
    promoter: Option<Arc<StagingPromoter>>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(source: Arc<dyn ApplicationSource>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            source,
            store,
            matcher: matcher_for(&MatcherConfig::default()),
            promoter: None,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn RecordMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_promoter(mut self, promoter: Arc<StagingPromoter>) -> Self {
        self.promoter = Some(promoter);
        self
    }

    pub async fn run(&self) -> Result<ReconcileSummary, ReconcileError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, matcher = self.matcher.name());
        self.run_pass(run_id).instrument(span).await
    }

    async fn run_pass(&self, run_id: Uuid) -> Result<ReconcileSummary, ReconcileError> {
        let started_at = Utc::now();
        let applications: Vec<TournamentApplication> = self
            .source
            .fetch_applications()
            .await
            .map_err(ReconcileError::SourceUnavailable)?
            .into_iter()
            .filter(TournamentApplication::is_approved)
            .collect();
        let mut working = self
            .store
            .list_records()
            .await
            .map_err(ReconcileError::LocalStoreUnavailable)?;
        let local_records = working.len();

        let mut summary = ReconcileSummary {
            run_id,
            started_at,
            finished_at: started_at,
            source_records: applications.len(),
            local_records,
            matched: 0,
            fixed: 0,
            duplicates_removed: 0,
            promoted: 0,
            ingested: 0,
            unmatched_source_records: Vec::new(),
            local_orphans: Vec::new(),
            failures: Vec::new(),
        };
        let mut matched_ids: HashSet<Uuid> = HashSet::new();

        for application in &applications {
            let candidates: Vec<TournamentRecord> = self
                .matcher
                .find_matches(application, &working)
                .into_iter()
                .cloned()
                .collect();

            if candidates.is_empty() {
                if self.options.auto_ingest_unmatched {
                    self.ingest_unmatched(application, &mut summary).await;
                } else {
                    summary.unmatched_source_records.push(UnmatchedApplication {
                        application_id: application.application_id.clone(),
                        title: application.title.clone(),
                    });
                }
                continue;
            }

            summary.matched += 1;
            matched_ids.extend(candidates.iter().map(|r| r.id));

            let Some(resolution) = resolver::resolve_duplicates(
                &application.application_id,
                candidates,
                self.options.survivor_order,
            ) else {
                continue;
            };

            if !resolution.removed.is_empty() {
                let outcome = resolver::remove_duplicates(self.store.as_ref(), &resolution).await;
                summary.duplicates_removed += outcome.removed.len();
                summary.failures.extend(outcome.failures);
                working.retain(|r| !outcome.removed.contains(&r.id) && !outcome.already_gone.contains(&r.id));
            }

            let mut survivor = resolution.survivor;
            if !sync_fields(&mut survivor, application, Utc::now()) {
                continue;
            }
            match self.store.update_record(&survivor).await {
                Ok(()) => {
                    summary.fixed += 1;
                    if let Some(slot) = working.iter_mut().find(|r| r.id == survivor.id) {
                        *slot = survivor.clone();
                    }
                    if survivor.visibility == VisibilityState::Staging {
                        self.recheck(survivor.id, &mut summary).await;
                    }
                }
                Err(err) => {
                    warn!(record_id = %survivor.id, error = %err, "failed to sync source fields");
                    summary
                        .failures
                        .push(RecordFailure::new(survivor.id, RecordOperation::Update, &err));
                }
            }
        }

        summary.local_orphans = working
            .iter()
            .filter(|r| !matched_ids.contains(&r.id))
            .map(|r| LocalOrphan {
                record_id: r.id,
                name: r.name.clone(),
                source_application_id: r.source_application_id.clone(),
            })
            .collect();
        summary.finished_at = Utc::now();
        info!(summary = %summary.headline(), "reconciliation pass finished");
        Ok(summary)
    }

    async fn recheck(&self, id: Uuid, summary: &mut ReconcileSummary) {
        let now = Utc::now();
        let outcome = match &self.promoter {
            Some(promoter) => promoter.on_record_written(id, now).await,
            None => check_record(self.store.as_ref(), id, now).await,
        };
        match outcome {
            Ok(GateOutcome::Promoted) => summary.promoted += 1,
            Ok(_) => {}
            Err(err) => {
                warn!(record_id = %id, error = %err, "completeness check failed");
                summary
                    .failures
                    .push(RecordFailure::new(id, RecordOperation::Promote, &err));
            }
        }
    }

    async fn ingest_unmatched(&self, application: &TournamentApplication, summary: &mut ReconcileSummary) {
        match ingest_application(self.store.as_ref(), application, Utc::now()).await {
            Ok(IngestOutcome::Created { gate, .. }) => {
                summary.ingested += 1;
                if gate == GateOutcome::Promoted {
                    summary.promoted += 1;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(application_id = %application.application_id, error = %err, "failed to ingest application");
                summary.unmatched_source_records.push(UnmatchedApplication {
                    application_id: application.application_id.clone(),
                    title: application.title.clone(),
                });
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: ReconcileSummary,
    pub reports_dir: Option<PathBuf>,
    pub report_error: Option<String>,
}

/// Owns the opened store and source for the lifetime of a command or server.
/// Call [`SyncPipeline::close`] when done.
pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    source: Arc<dyn ApplicationSource>,
    promoter: Arc<StagingPromoter>,
}

impl SyncPipeline {
    pub async fn open(config: SyncConfig) -> Result<Self> {
        let store = open_store(&config.store)
            .await
            .context("opening record store")?;
        let source = source_for(&config.portal, config.http_client()).context("building portal source")?;
        Ok(Self::from_parts(config, store, Arc::from(source)))
    }

    pub fn from_parts(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn ApplicationSource>,
    ) -> Self {
        let promoter = Arc::new(StagingPromoter::new(store.clone(), config.staging_backoff()));
        Self {
            config,
            store,
            source,
            promoter,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn source(&self) -> Arc<dyn ApplicationSource> {
        self.source.clone()
    }

    pub fn promoter(&self) -> Arc<StagingPromoter> {
        self.promoter.clone()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.source.clone(), self.store.clone())
            .with_matcher(matcher_for(&self.config.matcher))
            .with_options(self.config.reconcile_options())
            .with_promoter(self.promoter.clone())
    }

    /// Reconciles and writes the run's report artifacts.
    /// Only whole-pass failures are errors. Once the pass has run, a failure
    /// to write its reports is logged and carried in the outcome.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let summary = self.reconciler().run().await?;
        let (reports_dir, report_error) = match self.write_run_reports(&summary).await {
            Ok(dir) => (Some(dir), None),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(run_id = %summary.run_id, error = %message, "failed to write run reports");
                (None, Some(message))
            }
        };
        Ok(RunOutcome {
            summary,
            reports_dir,
            report_error,
        })
    }

    async fn write_run_reports(&self, summary: &ReconcileSummary) -> Result<PathBuf> {
        let records = self
            .store
            .list_records()
            .await
            .context("listing records for run snapshot")?;
        report::write_reports(&self.config.reports_dir, summary, &records).await
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let report = self.promoter.sweep(Utc::now()).await?;
        if self.config.purge_enabled {
            self.purge_once().await?;
        }
        Ok(report)
    }

    pub async fn purge_once(&self) -> Result<PurgeReport> {
        let max_age = Duration::from_secs(self.config.staging_max_age_secs);
        Ok(self.promoter.purge_stale(max_age, Utc::now()).await?)
    }

    pub async fn ingest(&self, application_id: &str) -> Result<IngestOutcome> {
        let application = self
            .source
            .fetch_application(application_id)
            .await
            .context("fetching application from portal")?
            .with_context(|| format!("application {application_id} not found in portal feed"))?;
        Ok(ingest_application(self.store.as_ref(), &application, Utc::now()).await?)
    }

    /// Staging sweep on a fixed interval plus reconciliation on a cron
    /// schedule. `None` unless the scheduler is enabled.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let pipeline = Arc::clone(self);
        let sweep = Job::new_repeated_async(
            Duration::from_secs(self.config.sweep_interval_secs.max(1)),
            move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                Box::pin(async move {
                    if let Err(err) = pipeline.sweep_once().await {
                        warn!(error = %format!("{err:#}"), "scheduled staging sweep failed");
                    }
                })
            },
        )
        .context("creating staging sweep job")?;
        sched.add(sweep).await.context("adding staging sweep job")?;

        let pipeline = Arc::clone(self);
        let cron = self.config.reconcile_cron.clone();
        let reconcile = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(outcome) => info!(summary = %outcome.summary.headline(), "scheduled reconciliation finished"),
                    Err(err) => warn!(error = %format!("{err:#}"), "scheduled reconciliation failed"),
                }
            })
        })
        .with_context(|| format!("creating reconciliation job for cron {cron}"))?;
        sched.add(reconcile).await.context("adding reconciliation job")?;

        Ok(Some(sched))
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await.context("closing record store")
    }
}

/// Opens the configured stores, runs `f`, and always closes the store.
pub async fn with_pipeline_from_env<T, F, Fut>(f: F) -> Result<T>
where
    F: FnOnce(Arc<SyncPipeline>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let pipeline = Arc::new(SyncPipeline::open(SyncConfig::from_env()).await?);
    let result = f(pipeline.clone()).await;
    let closed = pipeline.close().await;
    let value = result?;
    closed?;
    Ok(value)
}

pub async fn run_reconcile_once_from_env() -> Result<RunOutcome> {
    with_pipeline_from_env(|pipeline| async move { pipeline.run_once().await }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;
    use tourney_core::ApplicationStatus;
    use tourney_portal::StaticApplicationSource;
    use tourney_storage::InMemoryRecordStore;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).single().unwrap()
    }

    fn application(id: &str, title: &str, status: ApplicationStatus) -> TournamentApplication {
        TournamentApplication {
            application_id: id.into(),
            title: title.into(),
            start_date: None,
            end_date: None,
            status,
            organizer: Some("County Association".into()),
            venue: Some("Riverside Hall".into()),
            contact_phone: Some("0123 456789".into()),
        }
    }

    fn test_config(reports_dir: PathBuf) -> SyncConfig {
        SyncConfig {
            store: StoreConfig::Memory,
            reports_dir,
            ..Default::default()
        }
    }

    #[test]
    fn sync_fields_only_fills_empty_links() {
        let app = application("A1", "Summer Cup", ApplicationStatus::Approved);
        let mut record = TournamentRecord::new("Summer Cup (renamed)", ts());
        record.source_application_id = Some("  ".into());
        assert!(sync_fields(&mut record, &app, ts()));
        assert_eq!(record.source_application_id.as_deref(), Some("A1"));
        assert!(record.managed_by_source);
        assert_eq!(record.name, "Summer Cup (renamed)");

        let other = application("A2", "Summer Cup", ApplicationStatus::Approved);
        assert!(!sync_fields(&mut record, &other, ts()));
        assert_eq!(record.source_application_id.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn ingest_skips_linked_and_unapproved_applications() {
        let store = InMemoryRecordStore::new();
        let approved = application("A1", "Summer Cup", ApplicationStatus::Approved);

        let created = ingest_application(&store, &approved, ts()).await.expect("ingest");
        let IngestOutcome::Created { record_id, gate } = created else {
            panic!("expected a created record, got {created:?}");
        };
        assert_eq!(gate, GateOutcome::Promoted);

        let again = ingest_application(&store, &approved, ts()).await.expect("ingest again");
        assert_eq!(again, IngestOutcome::AlreadyPresent { record_id });

        let pending = application("A2", "Autumn Classic", ApplicationStatus::PendingReview);
        assert_eq!(
            ingest_application(&store, &pending, ts()).await.expect("pending"),
            IngestOutcome::NotApproved
        );
        assert_eq!(store.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn auto_ingest_creates_records_for_unmatched_applications() {
        let store = Arc::new(InMemoryRecordStore::new());
        let source = Arc::new(StaticApplicationSource::new(vec![application(
            "A7",
            "Coastal Invitational",
            ApplicationStatus::Approved,
        )]));
        let reconciler = Reconciler::new(source, store.clone()).with_options(ReconcileOptions {
            auto_ingest_unmatched: true,
            ..Default::default()
        });
        let summary = reconciler.run().await.expect("run");
        assert_eq!(summary.ingested, 1);
        assert!(summary.unmatched_source_records.is_empty());

        let second = reconciler.run().await.expect("second run");
        assert_eq!((second.matched, second.ingested, second.fixed), (1, 0, 0));
    }

    #[tokio::test]
    async fn pipeline_run_writes_reports() {
        let dir = tempdir().expect("tempdir");
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::with_records(vec![
            TournamentRecord::new("Summer Cup", ts()),
            TournamentRecord::new("Legacy Masters", ts()),
        ]));
        let source = Arc::new(StaticApplicationSource::new(vec![application(
            "A1",
            "Summer Cup",
            ApplicationStatus::Approved,
        )]));
        let pipeline = SyncPipeline::from_parts(test_config(dir.path().join("reports")), store, source);

        let outcome = pipeline.run_once().await.expect("run");
        assert_eq!(outcome.summary.fixed, 1);
        assert!(outcome.report_error.is_none());
        let run_dir = outcome.reports_dir.clone().expect("reports dir");
        assert!(run_dir.join(report::SUMMARY_FILE).exists());
        assert!(run_dir.join("snapshots/tournaments.parquet").exists());

        let brief = std::fs::read_to_string(run_dir.join(report::BRIEF_FILE)).expect("brief");
        assert!(brief.contains("Legacy Masters"));

        let runs = report::list_runs(&dir.path().join("reports"), 5).expect("runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].fixed, 1);
        assert!(runs[0].has_parquet_manifest);

        let markdown = report::report_recent_markdown(5, &dir.path().join("reports")).expect("markdown");
        assert!(markdown.contains(&outcome.summary.run_id.to_string()));
        pipeline.close().await.expect("close");
    }

    #[tokio::test]
    async fn unwritable_reports_do_not_fail_a_finished_pass() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("reports");
        std::fs::write(&blocker, b"not a directory").expect("blocker file");
        let store = Arc::new(InMemoryRecordStore::with_records(vec![
            TournamentRecord::new("Summer Cup", ts()),
            TournamentRecord::new("Summer Cup", ts() + chrono::TimeDelta::minutes(1)),
        ]));
        let source = Arc::new(StaticApplicationSource::new(vec![application(
            "A1",
            "Summer Cup",
            ApplicationStatus::Approved,
        )]));
        let pipeline = SyncPipeline::from_parts(test_config(blocker), store.clone(), source);

        let outcome = pipeline.run_once().await.expect("pass itself succeeded");
        assert_eq!((outcome.summary.fixed, outcome.summary.duplicates_removed), (1, 1));
        assert!(outcome.reports_dir.is_none());
        assert!(outcome.report_error.is_some());

        let left = store.snapshot().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].source_application_id.as_deref(), Some("A1"));
    }

    #[test]
    fn staging_backoff_never_drops_below_sweep_interval() {
        let mut config = test_config(PathBuf::from("reports"));
        config.sweep_interval_secs = 45;
        config.backoff_max_secs = 10;
        let policy = config.staging_backoff();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(45));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(45));
    }
}
