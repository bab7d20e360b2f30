//! Axum + Askama admin surface: public catalog, staging queue, manual edits
//! and on-demand reconciliation.

use std::net::SocketAddr;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tourney_core::{TournamentRecord, VisibilityState};
use tourney_storage::StoreError;
use tourney_sync::{check_record, report, GateOutcome, ReconcileError, SyncConfig, SyncPipeline};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tourney-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Editable contact fields. Absent keys are left untouched; an empty string
/// clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TournamentPatch {
    pub contact_phone: Option<String>,
    pub venue: Option<String>,
    pub organizer: Option<String>,
}

impl TournamentPatch {
    fn apply(self, record: &mut TournamentRecord) -> bool {
        let mut changed = false;
        for (slot, value) in [
            (&mut record.contact_phone, self.contact_phone),
            (&mut record.venue, self.venue),
            (&mut record.organizer, self.organizer),
        ] {
            let Some(value) = value else { continue };
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            if *slot != value {
                *slot = value;
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Serialize)]
struct PatchResponse {
    record: TournamentRecord,
    gate: GateOutcome,
}

#[derive(Debug, Clone)]
struct CatalogRow {
    name: String,
    dates: String,
    venue: String,
    organizer: String,
    contact_phone: String,
}

#[derive(Debug, Clone)]
struct StagingRow {
    id: String,
    name: String,
    source_application_id: String,
    missing: String,
    created_at: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    live: usize,
    staging: usize,
    unlinked: usize,
    latest_run_id: String,
}

#[derive(Template)]
#[template(path = "tournaments.html")]
struct TournamentsTemplate {
    rows: Vec<CatalogRow>,
}

#[derive(Template)]
#[template(path = "staging.html")]
struct StagingTemplate {
    rows: Vec<StagingRow>,
}

#[derive(Template)]
#[template(path = "reports.html")]
struct ReportsTemplate {
    runs: Vec<report::RunReportRow>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/tournaments", get(tournaments_page_handler))
        .route("/staging", get(staging_handler))
        .route("/reports", get(reports_handler))
        .route("/api/tournaments", get(live_tournaments_handler))
        .route("/api/tournaments/{id}", patch(patch_tournament_handler))
        .route("/api/tournaments/{id}/promote", post(promote_handler))
        .route("/api/reconcile", post(reconcile_handler))
        .route("/api/sweep", post(sweep_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(pipeline: Arc<SyncPipeline>, port: u16) -> anyhow::Result<()> {
    let scheduler = pipeline.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "web surface listening");
    axum::serve(listener, app(AppState::new(pipeline)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await?;
    }
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("TOURNEY_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let pipeline = Arc::new(SyncPipeline::open(SyncConfig::from_env()).await?);
    let served = serve(pipeline.clone(), port).await;
    let closed = pipeline.close().await;
    served?;
    closed
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let records = match state.pipeline.store().list_records().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let runs = report::list_runs(&state.pipeline.config().reports_dir, 1).unwrap_or_default();
    render_html(IndexTemplate {
        live: records.iter().filter(|r| r.visibility == VisibilityState::Live).count(),
        staging: records.iter().filter(|r| r.visibility == VisibilityState::Staging).count(),
        unlinked: records.iter().filter(|r| !r.has_source_id()).count(),
        latest_run_id: runs
            .first()
            .map(|r| r.run_id.clone())
            .unwrap_or_else(|| "n/a".into()),
    })
}

async fn tournaments_page_handler(State(state): State<Arc<AppState>>) -> Response {
    match live_records(&state).await {
        Ok(records) => render_html(TournamentsTemplate {
            rows: records.iter().map(catalog_row).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn live_tournaments_handler(State(state): State<Arc<AppState>>) -> Response {
    match live_records(&state).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => store_error(err),
    }
}

async fn staging_handler(State(state): State<Arc<AppState>>) -> Response {
    match state
        .pipeline
        .store()
        .list_by_visibility(VisibilityState::Staging)
        .await
    {
        Ok(records) => render_html(StagingTemplate {
            rows: records.iter().map(staging_row).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn reports_handler(State(state): State<Arc<AppState>>) -> Response {
    match report::list_runs(&state.pipeline.config().reports_dir, 20) {
        Ok(runs) => render_html(ReportsTemplate { runs }),
        Err(err) => server_error(err),
    }
}

async fn patch_tournament_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(patch): Json<TournamentPatch>,
) -> Response {
    let store = state.pipeline.store();
    let mut record = match store.get_record(id).await {
        Ok(Some(record)) => record,
        Ok(None) => return store_error(StoreError::NotFound(id)),
        Err(err) => return store_error(err),
    };

    let now = Utc::now();
    if patch.apply(&mut record) {
        record.updated_at = now;
        if let Err(err) = store.update_record(&record).await {
            return store_error(err);
        }
        info!(record_id = %id, "tournament fields edited");
    }

    let gate = match state.pipeline.promoter().on_record_written(id, now).await {
        Ok(gate) => gate,
        Err(err) => return store_error(err),
    };
    match store.get_record(id).await {
        Ok(Some(record)) => Json(PatchResponse { record, gate }).into_response(),
        Ok(None) => store_error(StoreError::NotFound(id)),
        Err(err) => store_error(err),
    }
}

async fn promote_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<Uuid>) -> Response {
    match check_record(state.pipeline.store().as_ref(), id, Utc::now()).await {
        Ok(GateOutcome::NotFound) => store_error(StoreError::NotFound(id)),
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => store_error(err),
    }
}

async fn reconcile_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.run_once().await {
        Ok(outcome) => Json(outcome.summary).into_response(),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reconciliation request failed");
            let status = match err.downcast_ref::<ReconcileError>() {
                Some(_) => StatusCode::SERVICE_UNAVAILABLE,
                None => StatusCode::INTERNAL_SERVER_ERROR,
            };
            json_error(status, format!("{err:#}"))
        }
    }
}

async fn sweep_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.sweep_once().await {
        Ok(report) => Json(report).into_response(),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
    }
}

async fn live_records(state: &AppState) -> Result<Vec<TournamentRecord>, StoreError> {
    state
        .pipeline
        .store()
        .list_by_visibility(VisibilityState::Live)
        .await
}

fn catalog_row(record: &TournamentRecord) -> CatalogRow {
    let dates = match (record.start_date, record.end_date) {
        (Some(start), Some(end)) if start != end => format!("{start} to {end}"),
        (Some(start), _) => start.to_string(),
        (None, Some(end)) => end.to_string(),
        (None, None) => "tbc".to_string(),
    };
    CatalogRow {
        name: record.name.clone(),
        dates,
        venue: record.venue.clone().unwrap_or_default(),
        organizer: record.organizer.clone().unwrap_or_default(),
        contact_phone: record.contact_phone.clone().unwrap_or_default(),
    }
}

fn staging_row(record: &TournamentRecord) -> StagingRow {
    let missing = record.missing_fields();
    StagingRow {
        id: record.id.to_string(),
        name: record.name.clone(),
        source_application_id: record.source_id().unwrap_or("none").to_string(),
        missing: if missing.is_empty() {
            "none".to_string()
        } else {
            missing
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        },
        created_at: record.created_at.format("%Y-%m-%d %H:%M").to_string(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

fn store_error(err: StoreError) -> Response {
    let status = match &err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) | StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.to_string())
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
