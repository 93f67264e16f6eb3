//! HTTP API server.
//!
//! All project-scoped routes live under `/api/projects/{project_id}`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/documents` | Upload a requirement document (multipart `file`) |
//! | `GET`    | `/documents` | List documents, newest first |
//! | `DELETE` | `/documents?documentId=` | Delete a document and its blob |
//! | `POST`   | `/documents/analyze` | Analyse stored documents |
//! | `GET`    | `/vendors` | Vendors with score breakdowns |
//! | `POST`   | `/vendors` | Register a vendor |
//! | `PATCH`  | `/vendors/{vendor_id}` | Change a vendor's status |
//! | `POST`   | `/vendors/{vendor_id}/evaluations` | Record an evaluation |
//! | `POST`   | `/requirements/analyze` | One-off analysis of an uploaded file |
//! | `POST`   | `/requirements/generate` | Generate persona questions |
//! | `GET`    | `/blobs/{*key}` | Download a stored file |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "documentId is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `unsupported_format` (400),
//! `upstream` (500), `internal` (500).

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analysis::BatchAnalyzer;
use crate::config::Config;
use crate::documents::{self, AnalyzeRequest};
use crate::error::ServiceError;
use crate::llm::{create_model, GenerativeModel};
use crate::models::{AnalysisResult, Document, Vendor, VendorEvaluation};
use crate::requirements::{self, GeneratedQuestion, RequirementPrompt};
use crate::scoring::{DuplicatePolicy, VendorScore};
use crate::storage::{create_blob_store, BlobStore, StorageError};
use crate::store::{ProjectStore, SqliteStore};
use crate::vendors::{self, CreateVendorRequest, EvaluationRequest, StatusRequest};

/// Shared, immutable state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProjectStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: BatchAnalyzer,
    /// Model used for requirement question generation.
    pub drafting: Arc<dyn GenerativeModel>,
    pub duplicate_policy: DuplicatePolicy,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Opens the database, blob storage, and both model clients.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteStore::open(config).await?;
        let blobs = create_blob_store(&config.storage)?;
        let analysis_model = create_model(&config.models.analysis)?;
        let drafting = create_model(&config.models.drafting)?;

        Ok(Self {
            store: Arc::new(store),
            blobs,
            analyzer: BatchAnalyzer::from_config(analysis_model, &config.analysis),
            drafting,
            duplicate_policy: config.scoring.duplicate_policy,
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let project_routes = Router::new()
        .route(
            "/documents",
            post(handle_upload_document)
                .get(handle_list_documents)
                .delete(handle_delete_document),
        )
        .route("/documents/analyze", post(handle_analyze_documents))
        .route(
            "/vendors",
            get(handle_list_vendors).post(handle_create_vendor),
        )
        .route("/vendors/{vendor_id}", patch(handle_set_vendor_status))
        .route(
            "/vendors/{vendor_id}/evaluations",
            post(handle_add_evaluation),
        )
        .route("/requirements/analyze", post(handle_analyze_requirements))
        .route("/requirements/generate", post(handle_generate_requirements));

    Router::new()
        .route("/health", get(handle_health))
        .route("/blobs/{*key}", get(handle_get_blob))
        .nest("/api/projects/{project_id}", project_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server and blocks until it shuts down.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    tracing::info!(
        analysis_model = state.analyzer.model_name(),
        drafting_model = state.drafting.model_name(),
        storage = %config.storage.backend,
        "services initialised"
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match err {
            ServiceError::Validation(_) | ServiceError::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Upstream(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match err {
            ServiceError::Internal(ref e) => {
                tracing::error!(code = err.code(), error = %format!("{:#}", e), "request failed");
                "internal server error".to_string()
            }
            ref other => {
                if status.is_server_error() {
                    tracing::error!(code = err.code(), error = %other, "request failed");
                }
                other.to_string()
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Reads the multipart field named `file`. Returns its file name and bytes.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read uploaded file: {}", e)))?;
        if file_name.trim().is_empty() {
            return Err(bad_request("uploaded file has no name"));
        }
        return Ok((file_name, bytes.to_vec()));
    }
    Err(bad_request("no file uploaded"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /blobs/{*key} ============

async fn handle_get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    match state.blobs.get(&key).await {
        Ok(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidKey(_)) => Err(
            ServiceError::NotFound(format!("file not found: {}", key)).into(),
        ),
        Err(e) => Err(ServiceError::Upstream(e.to_string()).into()),
    }
}

// ============ Documents ============

async fn handle_upload_document(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Document>, AppError> {
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    let document = documents::upload(
        state.store.as_ref(),
        state.blobs.as_ref(),
        &project_id,
        &file_name,
        &bytes,
    )
    .await?;
    Ok(Json(document))
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(
        documents::list(state.store.as_ref(), &project_id).await?,
    ))
}

#[derive(Deserialize)]
struct DeleteParams {
    #[serde(rename = "documentId")]
    document_id: Option<String>,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<Json<SuccessResponse>, AppError> {
    let Query(params) = params?;
    documents::delete(
        state.store.as_ref(),
        state.blobs.as_ref(),
        &project_id,
        params.document_id.as_deref(),
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Serialize)]
struct AnalyzeResponse {
    success: bool,
    results: Vec<AnalysisResult>,
}

async fn handle_analyze_documents(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let Json(req) = body?;
    let results = documents::analyze(
        state.store.as_ref(),
        state.blobs.as_ref(),
        &state.analyzer,
        Some(&project_id),
        &req.ids(),
    )
    .await?;
    Ok(Json(AnalyzeResponse {
        success: true,
        results,
    }))
}

// ============ Vendors ============

#[derive(Serialize)]
struct VendorsResponse {
    vendors: Vec<VendorScore>,
}

async fn handle_list_vendors(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<VendorsResponse>, AppError> {
    let vendors =
        vendors::list_scores(state.store.as_ref(), &project_id, state.duplicate_policy).await?;
    Ok(Json(VendorsResponse { vendors }))
}

async fn handle_create_vendor(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<CreateVendorRequest>, JsonRejection>,
) -> Result<Json<Vendor>, AppError> {
    let Json(req) = body?;
    Ok(Json(
        vendors::create(state.store.as_ref(), &project_id, req).await?,
    ))
}

async fn handle_set_vendor_status(
    State(state): State<AppState>,
    Path((project_id, vendor_id)): Path<(String, String)>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<Vendor>, AppError> {
    let Json(req) = body?;
    Ok(Json(
        vendors::set_status(state.store.as_ref(), &project_id, &vendor_id, req).await?,
    ))
}

async fn handle_add_evaluation(
    State(state): State<AppState>,
    Path((project_id, vendor_id)): Path<(String, String)>,
    body: Result<Json<EvaluationRequest>, JsonRejection>,
) -> Result<Json<VendorEvaluation>, AppError> {
    let Json(req) = body?;
    Ok(Json(
        vendors::add_evaluation(state.store.as_ref(), &project_id, &vendor_id, req).await?,
    ))
}

// ============ Requirements ============

#[derive(Serialize)]
struct AnalysisContent {
    content: String,
}

async fn handle_analyze_requirements(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisContent>, AppError> {
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    let content = requirements::analyze_file(&state.analyzer, &file_name, &bytes).await?;
    Ok(Json(AnalysisContent { content }))
}

#[derive(Serialize)]
struct QuestionsResponse {
    content: Vec<GeneratedQuestion>,
}

async fn handle_generate_requirements(
    State(state): State<AppState>,
    body: Result<Json<RequirementPrompt>, JsonRejection>,
) -> Result<Json<QuestionsResponse>, AppError> {
    let Json(req) = body?;
    let content = requirements::generate_questions(state.drafting.as_ref(), &req).await?;
    Ok(Json(QuestionsResponse { content }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = ServiceError::Internal(
            anyhow::anyhow!("UNIQUE constraint failed: vendors.id")
                .context("failed to record vendor"),
        );
        let app_err = AppError::from(err);
        assert_eq!(app_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app_err.code, "internal");
        assert_eq!(app_err.message, "internal server error");
    }

    #[test]
    fn client_errors_keep_their_message() {
        let app_err = AppError::from(ServiceError::NotFound("vendor not found: v1".into()));
        assert_eq!(app_err.status, StatusCode::NOT_FOUND);
        assert!(app_err.message.contains("v1"));
    }
}
