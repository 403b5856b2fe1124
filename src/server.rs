//! HTTP transport over [`AnswerService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload?name=` | Ingest the raw request body (PDF, or text when `Content-Type: text/*`) |
//! | `POST` | `/ask` | Answer `{ "question", "extra_context" }` |
//! | `GET`  | `/history` | Conversation turns, oldest first |
//! | `POST` | `/generate_quiz` | Quiz from `{ "text", "count" }` |
//! | `GET`  | `/status` | Loaded document, index and turn count |
//! | `GET`  | `/health` | Liveness and version |
//!
//! `/ask` also accepts the field names `prompt` and `context`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_not_ready", "message": "no document has been ingested" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_request` | 400 |
//! | `index_not_ready` | 409 |
//! | `embedding_failure` | 502 |
//! | `generation_failure` | 502 |
//! | `persistence_failure` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser-based
//! document viewer can call the API.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use askdoc_core::models::Turn;

use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::MIME_TEXT;
use crate::quiz::{self, Quiz, DEFAULT_QUESTION_COUNT};
use crate::service::{AnswerService, IngestReport, Status};

/// Open the service and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(AnswerService::open(config).await?);
    let app = router(service, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "http server listening");
    println!("askdoc listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router. Uploads larger than `max_upload_bytes` are rejected
/// with 413 before reaching the service.
pub fn router(service: Arc<AnswerService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/ask", post(handle_ask))
        .route("/history", get(handle_history))
        .route("/generate_quiz", post(handle_generate_quiz))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(service)
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

struct AppError {
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

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::IndexNotReady(_) => StatusCode::CONFLICT,
        PipelineError::EmbeddingFailure(_) | PipelineError::GenerationFailure(_) => {
            StatusCode::BAD_GATEWAY
        }
        PipelineError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.message().to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        PipelineError::InvalidRequest(rejection.body_text()).into()
    }
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadQuery {
    name: Option<String>,
}

async fn handle_upload(
    State(service): State<Arc<AnswerService>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    let is_text = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/"));
    let name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload.pdf".to_string());

    let report = if is_text {
        service.ingest_bytes(body.to_vec(), MIME_TEXT, &name).await?
    } else {
        service.ingest_pdf(body.to_vec(), &name).await?
    };
    Ok(Json(report))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default, alias = "prompt")]
    question: Option<String>,
    #[serde(default, alias = "context")]
    extra_context: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    response: String,
}

async fn handle_ask(
    State(service): State<Arc<AnswerService>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = payload?;
    let question = req.question.unwrap_or_default();
    let response = service
        .answer(&question, req.extra_context.as_deref())
        .await?;
    Ok(Json(AskResponse { response }))
}

// ============ GET /history ============

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<Turn>,
}

async fn handle_history(
    State(service): State<Arc<AnswerService>>,
) -> Result<Json<HistoryResponse>, AppError> {
    let turns = service.history().await?;
    Ok(Json(HistoryResponse { turns }))
}

// ============ POST /generate_quiz ============

#[derive(Deserialize)]
struct QuizRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    count: Option<usize>,
}

async fn handle_generate_quiz(
    State(service): State<Arc<AnswerService>>,
    payload: Result<Json<QuizRequest>, JsonRejection>,
) -> Result<Json<Quiz>, AppError> {
    let Json(req) = payload?;
    let count = req.count.unwrap_or(DEFAULT_QUESTION_COUNT);
    let quiz = quiz::generate(&service, &req.text, count).await?;
    Ok(Json(quiz))
}

// ============ GET /status, /health ============

async fn handle_status(
    State(service): State<Arc<AnswerService>>,
) -> Result<Json<Status>, AppError> {
    Ok(Json(service.status().await?))
}

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
