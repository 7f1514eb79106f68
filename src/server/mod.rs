//! HTTP surface
//!
//! Three endpoints over the pipeline and router: multipart `/upload`,
//! `/query` (POST and GET), and `/health`. Error kinds map onto status
//! codes here; everything else returns `{ok: true, ...}` JSON.

use crate::answer::{AnswerRequest, RagRouter};
use crate::config::Config;
use crate::error::Error;
use crate::ingest::IngestPipeline;
use crate::llm::ChatMessage;
use crate::store::VectorStore;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the HTTP server
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<VectorStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub router: Arc<RagRouter>,
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Input(_) => StatusCode::BAD_REQUEST,
        Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        Error::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Ingest { source, .. } => status_for(source),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = Json(json!({ "ok": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    question: Option<String>,
    #[serde(default)]
    match_count: Option<usize>,
    #[serde(default)]
    history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    max_new_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, Error> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Input(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "upload".to_string());
        let mime = field
            .content_type()
            .map(|c| c.to_string())
            .unwrap_or_default();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::Input(format!("failed to read upload: {}", e)))?;

        if bytes.len() > state.config.server.max_upload_bytes {
            return Err(Error::TooLarge(format!(
                "upload is {} bytes, limit is {}",
                bytes.len(),
                state.config.server.max_upload_bytes
            )));
        }

        let report = state.pipeline.ingest(&bytes, &original_name, &mime).await?;
        return Ok(Json(json!({
            "ok": true,
            "chunks": report.chunks,
            "stored": report.stored,
            "tables": report.tables,
            "pages": report.pages,
            "image_caption_chunks": report.image_caption_chunks,
        })));
    }

    Err(Error::Input("multipart field 'file' is missing".to_string()))
}

async fn answer_question(
    state: &AppState,
    question: String,
    body: QueryBody,
) -> Result<Json<serde_json::Value>, Error> {
    if question.trim().is_empty() {
        return Err(Error::Input("question is missing".to_string()));
    }
    if question.chars().count() > state.config.server.max_question_chars {
        return Err(Error::TooLarge(format!(
            "question exceeds {} characters",
            state.config.server.max_question_chars
        )));
    }

    let response = state
        .router
        .answer(AnswerRequest {
            question,
            history: body.history.unwrap_or_default(),
            match_count: body.match_count,
            max_new_tokens: body.max_new_tokens,
            temperature: body.temperature,
            top_p: body.top_p,
        })
        .await?;

    Ok(Json(json!({
        "ok": true,
        "mode": "json",
        "answer": response.answer,
        "sources": response.sources,
        "rag_mode": response.rag_mode,
    })))
}

async fn query_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<QueryBody>,
) -> Result<Json<serde_json::Value>, Error> {
    let question = body.question.clone().unwrap_or_default();
    answer_question(&state, question, body).await
}

async fn query_get(
    State(state): State<Arc<AppState>>,
    Path(question): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let body = QueryBody {
        question: None,
        match_count: None,
        history: None,
        max_new_tokens: None,
        temperature: None,
        top_p: None,
    };
    answer_question(&state, question, body).await
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let fragments = state.store.count_fragments().await.unwrap_or(-1);
    Json(json!({
        "ok": true,
        "emb_url": state.config.embedding.url,
        "llm_url": state.config.generation.url,
        "storage": state.config.paths.db_file.display().to_string(),
        "fragments": fragments,
        "flags": {
            "fast_mode": state.config.ingest.fast_mode,
            "render_pages": state.config.ingest.render_pages,
            "enable_table_index": state.config.ingest.enable_table_index,
        },
    }))
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.server.max_upload_bytes;

    Router::new()
        .route("/upload", post(upload))
        .route("/query", post(query_post))
        .route("/query/{question}", get(query_get))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_upload + 1024 * 1024))
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>) -> crate::error::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("docent listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
