//! HTTP server for browser and service clients.
//!
//! Exposes the pipeline over a small JSON API. `POST /query` streams each
//! request's stage transitions as Server-Sent Events so a frontend can show
//! progress while SQL is generated, executed, and repaired; the other
//! endpoints are plain JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/schema` | Schema document from the last completed refresh |
//! | `POST` | `/refresh` | Re-introspect the target and rebuild the index |
//! | `POST` | `/query` | Answer one question; SSE stream of stage events |
//!
//! # Error Contract
//!
//! Non-streaming endpoints return:
//!
//! ```json
//! { "error": { "code": "index_rebuild_error", "message": "..." } }
//! ```
//!
//! Codes are the stable pipeline error kinds plus `bad_request` and
//! `not_found`. `POST /query` reports failures in-stream instead, as a final
//! `{"status":"error", "error": {...}}` event.
//!
//! # Events
//!
//! Each `POST /query` event carries the stage just entered and the response
//! as assembled so far:
//!
//! ```json
//! { "status": "executing", "response": { "user_question": "...", "generated_sql_query": "...", "usage": {} } }
//! ```
//!
//! Statuses: `retrieving`, `generating_sql`, `executing`, `repairing`,
//! `summarizing`, `completed`, `error`. Closing the connection abandons the
//! request's remaining stages.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser frontends can
//! call the API directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::PipelineError;
use crate::generation;
use crate::introspect::DatabaseSchemaSource;
use crate::models::{ApplicationResponse, SchemaDocument};
use crate::pipeline::{PipelineUpdate, QueryPipeline, QueryProgress, Stage};
use crate::progress::NoProgress;
use crate::schema_store::{self, RefreshOutcome};

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated. This is the entry point behind `tdb serve`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/schema", get(handle_schema))
        .route("/refresh", post(handle_refresh))
        .route("/query", post(handle_query))
        .layer(cors)
        .with_state(state);

    println!("talkdb server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 error with the generic internal code.
fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal_error".to_string(),
        message: message.into(),
    }
}

/// Maps a pipeline failure to an HTTP error carrying its stable kind as the
/// error code.
fn pipeline_error(err: PipelineError) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: err.kind().to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /schema ============

/// Handler for `GET /schema`.
///
/// Returns the schema document persisted by the last completed refresh, or
/// 404 if no refresh has ever completed.
async fn handle_schema(State(state): State<AppState>) -> Result<Json<SchemaDocument>, AppError> {
    let doc = schema_store::load_document(&state.config.index.schema_doc_path)
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found("no schema document yet; POST /refresh first"))?;
    Ok(Json(doc))
}

// ============ POST /refresh ============

/// Handler for `POST /refresh`.
///
/// Re-introspects the target database and rebuilds the embedding index. The
/// previous index stays live until the rebuild succeeds, so a failure here
/// never leaves queries without grounding.
async fn handle_refresh(State(state): State<AppState>) -> Result<Json<RefreshOutcome>, AppError> {
    let config = &state.config;
    let embedder =
        embedding::create_client(&config.embedding).map_err(|e| internal_error(e.to_string()))?;
    let source = DatabaseSchemaSource::new(&config.target);
    let pool = db::open(config)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let outcome = schema_store::refresh_schema(
        &pool,
        &source,
        embedder.as_ref(),
        &config.index.schema_doc_path,
        config.embedding.batch_size,
        &NoProgress,
    )
    .await;
    pool.close().await;

    let outcome = outcome.map_err(pipeline_error)?;
    println!(
        "Schema refreshed: {} tables, {} index entries",
        outcome.tables,
        outcome.table_entries + outcome.column_entries
    );
    Ok(Json(outcome))
}

// ============ POST /query ============

/// JSON request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

/// Handler for `POST /query`.
///
/// Validates the question, then runs the pipeline on its own task and
/// streams its stage events back as SSE. Dropping the connection closes the
/// channel, which the pipeline observes as cancellation before each
/// remaining stage.
async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let (tx, rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let config = state.config.clone();

    tokio::spawn(async move {
        run_streaming_query(config, question, tx).await;
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let value = rx.recv().await?;
        let event = Event::default()
            .json_data(&value)
            .unwrap_or_else(|_| Event::default().data(value.to_string()));
        Some((Ok::<_, Infallible>(event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Drives one question to completion, forwarding stage transitions into the
/// event channel. Any failure, including setup failures before the pipeline
/// starts, ends the stream with an error event.
async fn run_streaming_query(
    config: Arc<Config>,
    question: String,
    tx: mpsc::UnboundedSender<serde_json::Value>,
) {
    let embedder = match embedding::create_client(&config.embedding) {
        Ok(client) => client,
        Err(e) => return send_error(&tx, "internal_error", &e.to_string()),
    };
    let generator = match generation::create_client(&config.generation) {
        Ok(client) => client,
        Err(e) => return send_error(&tx, "internal_error", &e.to_string()),
    };
    let pool = match db::open(&config).await {
        Ok(pool) => pool,
        Err(e) => return send_error(&tx, "internal_error", &e.to_string()),
    };

    let pipeline = QueryPipeline {
        config: &config,
        pool: &pool,
        embedder: embedder.as_ref(),
        generator: generator.as_ref(),
    };
    let progress = ChannelQueryProgress { tx: tx.clone() };

    let outcome = pipeline.run(&question, true, &progress).await;
    pool.close().await;

    if let Err(e) = outcome {
        send_error(&tx, e.kind(), &e.to_string());
    }
}

fn send_error(tx: &mpsc::UnboundedSender<serde_json::Value>, code: &str, message: &str) {
    let _ = tx.send(serde_json::json!({
        "status": Stage::Error,
        "error": { "code": code, "message": message },
    }));
}

/// Forwards pipeline updates into the SSE channel. A closed channel (client
/// gone) reads back as cancellation.
struct ChannelQueryProgress {
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl QueryProgress for ChannelQueryProgress {
    fn update(&self, status: Stage, response: &ApplicationResponse) {
        let update = PipelineUpdate {
            status,
            response: response.clone(),
        };
        if let Ok(value) = serde_json::to_value(&update) {
            let _ = self.tx.send(value);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}
