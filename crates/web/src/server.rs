//! Web server implementation

use std::path::Path as FsPath;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use cyberlab_common::{format_size, Error, MachineRecord, Result, WriteupRecord, VERSION};

use crate::catalog::{
    AddWriteupRequest, CatalogRepository, CatalogService, StagedUpload, UpdateMachineRequest,
    UploadFields,
};
use crate::download::{check_machine_handler, download_file_handler, download_machine_handler};
use crate::store::{file_extension, ArchiveStore, ALLOWED_EXTENSIONS};

#[derive(Clone, Debug)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct WebServerConfig {
    /// Root directory holding the archive store.
    pub data_dir: PathBuf,
    /// The single hardcoded credential pair. Fake auth by design: the
    /// returned token is a non-verifiable placeholder.
    pub admin: AdminCredentials,
    /// Upload size ceiling in bytes, `MAX_UPLOAD_BYTES` in production.
    pub max_upload_bytes: u64,
}

/// Shared request-handler state
pub struct AppState {
    pub catalog: CatalogService,
    pub admin: AdminCredentials,
    pub max_upload_bytes: u64,
}

/// Web server state
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(cfg: WebServerConfig) -> anyhow::Result<Self> {
        let store = ArchiveStore::new(&cfg.data_dir);
        store.ensure_directories()?;

        let catalog = CatalogService::new(store, CatalogRepository::with_seed());

        Ok(Self {
            state: Arc::new(AppState {
                catalog,
                admin: cfg.admin,
                max_upload_bytes: cfg.max_upload_bytes,
            }),
        })
    }

    /// Server built over an existing state, used by tests to point the
    /// store at a scratch directory.
    pub fn with_state(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Create router
    pub fn router(&self) -> Router {
        // Slack over the upload ceiling for multipart framing and
        // metadata fields, so the byte-count guard fires before the
        // transport limit.
        let upload_body_limit = self.state.max_upload_bytes as usize + 1024 * 1024;

        // Route params at the same position must share a name, so the
        // name-addressed download/check routes reuse `:id`.
        Router::new()
            .route("/", get(root_handler))
            .route("/api/auth/login", post(login_handler))
            .route("/api/machines", get(list_machines_handler))
            .route(
                "/api/machines/upload",
                post(upload_machine_handler).layer(DefaultBodyLimit::max(upload_body_limit)),
            )
            .route(
                "/api/machines/:id",
                put(update_machine_handler).delete(delete_machine_handler),
            )
            .route("/api/machines/:id/writeup", post(add_writeup_handler))
            .route("/api/machines/:id/download", get(download_machine_handler))
            .route("/api/machines/:id/check", get(check_machine_handler))
            .route("/api/download/:filename", get(download_file_handler))
            .route("/api/files", get(list_files_handler))
            .route("/api/health", get(health_handler))
            .fallback(not_found_handler)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: std::net::SocketAddr) -> anyhow::Result<()> {
        info!("CyberLab API starting on http://{}", addr);
        info!(
            "Machines loaded: {}",
            self.state.catalog.machine_count().await
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation(_) | Error::UploadTooLarge { .. } | Error::UnsupportedFileType(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Every error surfaces to the caller as a JSON `{error}` payload.
pub(crate) fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Request failed: {}", err);
    }
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "CyberLab API up and running",
        "version": VERSION,
        "status": "online",
    }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    if req.username == state.admin.username && req.password == state.admin.password {
        info!("Admin login");
        Json(serde_json::json!({
            "token": "fake-jwt-token",
            "user": { "id": 1, "username": state.admin.username, "role": "admin" },
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid credentials" })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListMachinesQuery {
    /// Recompute every record's size from the archive store.
    #[serde(default)]
    refresh: bool,
}

async fn list_machines_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListMachinesQuery>,
) -> Json<Vec<MachineRecord>> {
    Json(state.catalog.list_machines(params.refresh).await)
}

async fn upload_machine_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut fields = UploadFields::default();
    let mut staged: Option<StagedUpload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard_staged(&staged);
                return error_response(Error::Internal(format!("malformed upload: {}", e)));
            }
        };

        let result: Result<()> = match field.name() {
            Some("machineFile") if staged.is_none() => {
                match stage_upload_field(state.catalog.store(), field, state.max_upload_bytes).await
                {
                    Ok(s) => {
                        staged = Some(s);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Some("name") => read_text(field, &mut fields.name).await,
            Some("description") => read_text(field, &mut fields.description).await,
            Some("difficulty") => read_text(field, &mut fields.difficulty).await,
            Some("tags") => read_text(field, &mut fields.tags).await,
            _ => Ok(()),
        };

        if let Err(e) = result {
            discard_staged(&staged);
            return error_response(e);
        }
    }

    let staged = match staged {
        Some(s) => s,
        None => return error_response(Error::Validation("no file received".to_string())),
    };

    match state.catalog.upload_machine(fields, staged).await {
        Ok(machine) => Json(serde_json::json!({
            "message": "Machine uploaded successfully",
            "machine": machine,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn read_text(field: Field<'_>, into: &mut String) -> Result<()> {
    *into = field
        .text()
        .await
        .map_err(|e| Error::Internal(format!("malformed upload: {}", e)))?;
    Ok(())
}

/// Stream a multipart file field to a staging file under the upload
/// directory, enforcing the size ceiling chunk by chunk.
async fn stage_upload_field(
    store: &ArchiveStore,
    field: Field<'_>,
    max_bytes: u64,
) -> Result<StagedUpload> {
    let original = field.file_name().unwrap_or_default().to_string();
    let extension = file_extension(FsPath::new(&original));
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::UnsupportedFileType(original));
    }

    let path = store.upload_dir().join(format!(
        ".staged-{}",
        chrono::Utc::now().timestamp_millis()
    ));

    let result = write_staged(&path, field, max_bytes).await;
    match result {
        Ok(()) => Ok(StagedUpload { path, extension }),
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            Err(e)
        }
    }
}

async fn write_staged(path: &FsPath, mut field: Field<'_>, max_bytes: u64) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written: u64 = 0;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(Error::Internal(format!("upload interrupted: {}", e))),
        };

        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::UploadTooLarge {
                limit_mb: max_bytes / (1024 * 1024),
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(())
}

fn discard_staged(staged: &Option<StagedUpload>) {
    if let Some(staged) = staged {
        let _ = std::fs::remove_file(&staged.path);
    }
}

async fn update_machine_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateMachineRequest>,
) -> Response {
    let id = match parse_machine_id(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.catalog.update_machine(id, patch).await {
        Ok(machine) => Json(serde_json::json!({
            "message": "Machine updated successfully",
            "machine": machine,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_machine_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_machine_id(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.catalog.delete_machine(id).await {
        Ok(()) => Json(serde_json::json!({ "message": "Machine deleted successfully" }))
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn add_writeup_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AddWriteupRequest>,
) -> Response {
    let id = match parse_machine_id(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.catalog.add_writeup(id, req).await {
        Ok(writeup) => writeup_response(writeup),
        Err(e) => error_response(e),
    }
}

fn writeup_response(writeup: WriteupRecord) -> Response {
    Json(serde_json::json!({
        "message": "Writeup added successfully",
        "writeup": writeup,
    }))
    .into_response()
}

/// Non-numeric ids behave like unknown machines, matching the original
/// API rather than surfacing a parse error.
fn parse_machine_id(raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| Error::NotFound {
        kind: "machine".to_string(),
        id: raw.to_string(),
    })
}

async fn list_files_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.catalog.store();
    match store.list_files() {
        Ok(files) => {
            let total = files.len();
            let total_size: u64 = files.iter().map(|f| f.size).sum();
            Json(serde_json::json!({
                "files": files,
                "total": total,
                "directory": store.upload_dir().to_string_lossy(),
                "totalSize": total_size,
            }))
            .into_response()
        }
        Err(e) => error_response(e.into()),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.catalog.store();
    let files = store.list_files().unwrap_or_default();
    let total_size: u64 = files.iter().map(|f| f.size).sum();

    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "machines": state.catalog.machine_count().await,
        "directories": {
            "uploads": store.upload_dir().is_dir(),
        },
        "statistics": {
            "totalFiles": files.len(),
            "totalSize": total_size,
            "totalSizeFormatted": format_size(total_size),
        },
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Endpoint not found" })),
    )
}
