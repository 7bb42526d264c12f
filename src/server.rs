use std::path::PathBuf;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::{
    error::Error,
    orchestrator::ScanOrchestrator,
    types::{ReportId, ReportSummary, ScanRequest, ScanRequestBody},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ScanOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: ScanOrchestrator) -> Self {
        Self { orchestrator }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = match &self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyRunning | Error::NotRunning => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::WorkerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Engine(_) | Error::DuplicateId(_) | Error::Io(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (code, Json(json!({ "success": false, "message": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ScanAccepted {
    success: bool,
    message: &'static str,
    host: String,
    port_spec: String,
    script_selection: String,
    profile: String,
    arguments: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReportList {
    reports: Vec<ReportSummary>,
    total: usize,
}

/// API routes plus an optional static UI directory as fallback.
pub fn router(state: AppState, ui_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/health", get(get_health))
        .route("/scan", post(post_scan))
        .route("/stop", post(post_stop))
        .route("/status", get(get_status))
        .route("/reports", get(list_reports).delete(clear_reports))
        .route("/reports/{id}", get(get_report).delete(delete_report))
        .route("/reports/{id}/download", get(download_report))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    match ui_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true)),
        None => app,
    }
}

/// Serve until `shutdown` is cancelled.
pub async fn spawn_server(
    bind: &str,
    state: AppState,
    ui_dir: Option<PathBuf>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(state, ui_dir);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

async fn get_health(State(app): State<AppState>) -> impl IntoResponse {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(json!({
        "status": "ok",
        "timestamp": now,
        "reports": app.orchestrator.store().len().await,
    }))
}

async fn post_scan(
    State(app): State<AppState>,
    Json(body): Json<ScanRequestBody>,
) -> Result<impl IntoResponse, Error> {
    let req = ScanRequest::try_from(body)?;
    let accepted = app.orchestrator.start_scan(req.clone())?;
    let out = ScanAccepted {
        success: true,
        message: "scan started",
        host: req.host,
        port_spec: req.port_spec,
        script_selection: req.script_selection,
        profile: req.profile.to_string(),
        arguments: accepted.arguments,
    };
    Ok((StatusCode::ACCEPTED, Json(out)))
}

async fn post_stop(State(app): State<AppState>) -> Result<impl IntoResponse, Error> {
    app.orchestrator.request_stop()?;
    Ok(Json(json!({ "success": true, "message": "scan stopped" })))
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.orchestrator.status())
}

async fn list_reports(State(app): State<AppState>) -> Result<impl IntoResponse, Error> {
    let reports = app.orchestrator.store().list().await?;
    let total = reports.len();
    Ok(Json(ReportList { reports, total }))
}

async fn clear_reports(State(app): State<AppState>) -> Result<impl IntoResponse, Error> {
    let removed = app.orchestrator.store().clear().await?;
    info!(removed, "reports cleared");
    Ok(Json(json!({ "success": true, "removed": removed })))
}

/// Ids that are not UUIDs cannot exist in the store, so they are not found.
fn parse_id(raw: &str) -> Result<ReportId, Error> {
    raw.parse().map_err(|_| Error::NotFound(raw.to_string()))
}

async fn get_report(
    State(app): State<AppState>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&raw)?;
    Ok(Json(app.orchestrator.store().get(&id).await?))
}

async fn download_report(
    State(app): State<AppState>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&raw)?;
    let report = app.orchestrator.store().get(&id).await?;
    let disposition = format!("attachment; filename=\"{}.txt\"", report.name);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.content,
    ))
}

async fn delete_report(
    State(app): State<AppState>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let id = parse_id(&raw)?;
    let report = app.orchestrator.store().delete(&id).await?;
    info!(%id, name = %report.name, "report deleted");
    Ok(Json(json!({ "success": true, "deleted": id })))
}
