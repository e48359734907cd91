//! HTTP surface.
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `GET /` | – | fixed liveness string |
//! | `POST /extract-text` | multipart, `file` field | `{"slides": [{"slide_number", "text"}]}` |
//! | `POST /generate-flashcards` | `{"slides": [...]}` | `{"cards": [...]}` |
//! | `POST /generate-apkg` | card payload | `.apkg` attachment |
//!
//! `/extract-pdf` is kept as an alias of `/extract-text` for older clients.
//! Errors are JSON `{"error": message, "status": code}`.

use crate::config::ServiceConfig;
use crate::error::{ErrorClass, Lecture2AnkiError};
use crate::generate::{build_package, extract_slides, generate_cards, parse_slides_payload, Collaborators};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Liveness response body.
pub const HEALTH_MESSAGE: &str = "lecture2anki is running";

/// Shared, read-only state of the service.
pub struct AppState {
    pub config: ServiceConfig,
    pub collaborators: Collaborators,
}

impl AppState {
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            config,
            collaborators,
        })
    }
}

/// Build the router with every route, the body limit and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.max_body_bytes);
    Router::new()
        .route("/", get(health))
        .route("/extract-text", post(extract_text))
        .route("/extract-pdf", post(extract_text))
        .route("/generate-flashcards", post(generate_flashcards))
        .route("/generate-apkg", post(generate_apkg))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{addr}");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
}

async fn health() -> &'static str {
    HEALTH_MESSAGE
}

async fn extract_text(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|e| Lecture2AnkiError::UnsupportedPayload {
        detail: format!("expected a multipart upload: {}", e.body_text()),
    })?;

    let mut pdf: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Lecture2AnkiError::UnsupportedPayload {
            detail: format!("Failed to read form field: {e}"),
        })?
    {
        if field.name() != Some("file") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| Lecture2AnkiError::UnsupportedPayload {
                detail: format!("Failed to read file data: {e}"),
            })?;
        if !data.is_empty() {
            pdf = Some(data.to_vec());
        }
    }

    let pdf = pdf.ok_or_else(|| Lecture2AnkiError::MissingFile {
        field: "file".into(),
    })?;
    let slides = extract_slides(pdf, state.collaborators.extractor.as_ref()).await?;
    Ok(Json(json!({ "slides": slides })).into_response())
}

async fn generate_flashcards(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let slides = parse_slides_payload(&body)?;
    let summarizer = state.collaborators.require_summarizer()?;
    let cards = generate_cards(&slides, summarizer, &state.config, None).await?;
    Ok(Json(json!({ "cards": cards })).into_response())
}

async fn generate_apkg(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let package = build_package(&body, &state.collaborators, &state.config).await?;
    let headers = [
        (header::CONTENT_TYPE, "application/apkg".to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(&package.file_name)),
    ];
    Ok((headers, package.bytes).into_response())
}

/// `attachment` disposition with an ASCII fallback name and, when needed, an
/// RFC 5987 `filename*` carrying the UTF-8 name.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    if ascii == file_name {
        return format!("attachment; filename=\"{ascii}\"");
    }
    let encoded: String = file_name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect();
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

/// HTTP wrapper for [`Lecture2AnkiError`].
#[derive(Debug)]
pub struct ApiError(pub Lecture2AnkiError);

impl From<Lecture2AnkiError> for ApiError {
    fn from(e: Lecture2AnkiError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.class() {
            ErrorClass::ClientInput => StatusCode::BAD_REQUEST,
            ErrorClass::UpstreamUnavailable if self.0.is_not_configured() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorClass::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorClass::InternalConsistency => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.0.class() {
            ErrorClass::InternalConsistency => error!("Request failed: {}", self.0),
            _ => warn!("Request rejected ({}): {}", status.as_u16(), self.0),
        }

        let body = Json(json!({
            "error": self.0.to_string(),
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
