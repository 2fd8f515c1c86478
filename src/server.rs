use std::path::{Path as FsPath, PathBuf};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{stream, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    config::STREAM_INTERVAL,
    error::{CatalogError, ScanError},
    orchestrator::ScanSupervisor,
    status::ScanStatus,
    types::{default_scope, ManualService, ScopeId, ServiceEdit, ServiceId, ServiceRecord},
};

#[derive(Clone)]
pub struct AppState {
    pub scans: ScanSupervisor,
    /// Scanner binary resolved at startup, reported by the health check.
    pub nmap_path: Option<PathBuf>,
}

/// Error body is `{"detail": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Scan(ScanError::AlreadyRunning { .. }) => StatusCode::CONFLICT,
            ApiError::Scan(ScanError::NotRunning) => StatusCode::CONFLICT,
            ApiError::Scan(ScanError::InvalidTarget { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Scan(ScanError::Catalog(e)) | ApiError::Catalog(e) => catalog_status(e),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn catalog_status(e: &CatalogError) -> StatusCode {
    match e {
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::Duplicate { .. } => StatusCode::CONFLICT,
        CatalogError::Database(_) | CatalogError::Poisoned => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Build the application router: JSON API under `/api`, icons and other assets
/// under `/static`, and the optional single-page UI as fallback.
pub fn router(state: AppState, static_dir: &FsPath, ui_dir: Option<&FsPath>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/services", get(list_services))
        .route("/services/manual", post(add_manual_service))
        .route("/services/{id}", post(update_service).delete(delete_service))
        .route("/reorder-services", post(reorder_services))
        .route("/scan", post(start_scan))
        .route("/scan/status", get(scan_status))
        .route("/scan/stream", get(scan_stream))
        .route("/scan/cancel", post(cancel_scan))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .with_state(state);

    let mut app = Router::new()
        .nest("/api", api)
        .nest_service("/static", ServeDir::new(static_dir));

    if let Some(ui) = ui_dir {
        // Unknown paths get index.html so client-side routes survive a reload.
        let spa = ServeDir::new(ui)
            .append_index_html_on_directories(true)
            .fallback(ServeFile::new(ui.join("index.html")));
        app = app.fallback_service(spa);
    }

    app.layer(TraceLayer::new_for_http())
}

/// Serve `app` on `bind` until Ctrl+C.
pub async fn spawn_server(bind: &str, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    nmap_found: bool,
    nmap_path: Option<String>,
}

async fn health(State(app): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        nmap_found: app.nmap_path.is_some(),
        nmap_path: app.nmap_path.as_ref().map(|p| p.display().to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    #[serde(default = "default_scope")]
    profile_id: ScopeId,
}

async fn list_services(
    State(app): State<AppState>,
    Query(q): Query<ScopeQuery>,
) -> Result<Json<Vec<ServiceRecord>>, ApiError> {
    Ok(Json(app.scans.catalog().list_visible(q.profile_id)?))
}

async fn update_service(
    State(app): State<AppState>,
    Path(id): Path<ServiceId>,
    Json(edit): Json<ServiceEdit>,
) -> Result<Json<ServiceRecord>, ApiError> {
    let catalog = app.scans.catalog();
    let mut record = catalog.get(id)?.ok_or(CatalogError::NotFound(id))?;
    record.apply_edit(&edit);
    catalog.update(&record)?;
    info!(id, "service edited and locked");
    Ok(Json(record))
}

async fn delete_service(
    State(app): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    app.scans.catalog().delete(id)?;
    info!(id, "service deleted");
    Ok(Json(json!({ "message": "Deleted" })))
}

async fn add_manual_service(
    State(app): State<AppState>,
    Json(body): Json<ManualService>,
) -> Result<Json<ServiceRecord>, ApiError> {
    let record = app.scans.catalog().insert(&body.into_new_service())?;
    info!(id = record.id, ip = %record.ip, port = record.port, "manual service added");
    Ok(Json(record))
}

/// Either a bare id array or `{"ordered_ids": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReorderBody {
    Ids(Vec<ServiceId>),
    Wrapped {
        #[serde(default)]
        ordered_ids: Vec<ServiceId>,
    },
}

impl ReorderBody {
    fn into_ids(self) -> Vec<ServiceId> {
        match self {
            ReorderBody::Ids(ids) => ids,
            ReorderBody::Wrapped { ordered_ids } => ordered_ids,
        }
    }
}

async fn reorder_services(
    State(app): State<AppState>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ids = body.into_ids();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("ordered_ids is required".into()));
    }
    let count = app.scans.catalog().reorder(&ids)?;
    Ok(Json(json!({ "message": "Reordered successfully", "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// Address, CIDR or hostname; empty means the local network.
    #[serde(default)]
    pub target_ip: String,
    #[serde(default = "default_scope")]
    pub profile_id: ScopeId,
}

async fn start_scan(
    State(app): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = app.scans.start(&req.target_ip, req.profile_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Scan started", "target": target })),
    ))
}

async fn cancel_scan(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    app.scans.cancel().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Cancellation requested" })),
    ))
}

async fn scan_status(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.scans.status().snapshot().await)
}

async fn scan_stream(
    State(app): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(status_frames(app.scans.status().clone()))
}

/// One snapshot immediately, then one per `STREAM_INTERVAL` while a run is active.
/// The frame that observes a stopped run is the last one.
fn status_frames(status: ScanStatus) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(Some((status, false)), |state| async move {
        let (status, delay) = state?;
        if delay {
            tokio::time::sleep(STREAM_INTERVAL).await;
        }
        let snapshot = status.snapshot().await;
        let next = snapshot.running.then_some((status, true));
        Some((Event::default().json_data(&snapshot), next))
    })
}
