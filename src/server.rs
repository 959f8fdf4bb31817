//! HTTP surface: a fire-and-forget generate endpoint plus status polling.

use crate::db::{self, Pool};
use crate::model::BookStatus;
use crate::payment::PaymentGateway;
use crate::pipeline::{self, Services};
use crate::scrape::PartialProfile;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub services: Services,
    pub payment: Arc<dyn PaymentGateway>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/api/generate", post(handle_generate))
        .route("/api/books/:id", get(handle_status))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub website_url: String,
    pub company_data: Option<PartialProfile>,
    pub additional_info: Option<String>,
}

/// Input checks that produce an immediate 4xx, before any outbound call.
pub fn validate_request(req: &GenerateRequest) -> Result<(), &'static str> {
    if req.session_id.trim().is_empty() {
        return Err("sessionId is required");
    }
    if req.website_url.trim().is_empty() {
        return Err("websiteUrl is required");
    }
    let parsed = url::Url::parse(req.website_url.trim()).map_err(|_| "websiteUrl is not a valid URL")?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("websiteUrl must be http or https");
    }
    Ok(())
}

/// Accepts the request, validates payment, inserts the book row, and spawns
/// the pipeline. Replies 202 with the id the client polls with.
#[instrument(skip_all)]
async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> (StatusCode, Json<Value>) {
    if let Err(msg) = validate_request(&req) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })));
    }

    let session = match state.payment.fetch_session(req.session_id.trim()).await {
        Ok(session) => session,
        Err(err) => {
            warn!(?err, "payment session retrieval failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "payment session could not be verified" })),
            );
        }
    };
    if !session.paid {
        return (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({ "error": "payment session is not paid" })),
        );
    }
    let email = match session.customer_email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "payment session has no customer email" })),
            );
        }
    };

    let book_id = match db::insert_book(
        &state.pool,
        &email,
        req.website_url.trim(),
        req.additional_info.as_deref(),
        session.chapter_count,
    )
    .await
    {
        Ok(id) => id,
        Err(err) => {
            warn!(?err, "failed to insert book row");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "could not start generation" })),
            );
        }
    };

    info!(%book_id, chapter_count = session.chapter_count, "generation accepted");
    let pool = state.pool.clone();
    let services = state.services.clone();
    let overrides = req.company_data.clone();
    let spawned_id = book_id.clone();
    tokio::spawn(async move {
        pipeline::run_generation(&pool, &services, &spawned_id, overrides).await;
    });

    (StatusCode::ACCEPTED, Json(json!({ "bookId": book_id })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    book_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<crate::model::ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    epub_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_base64: Option<String>,
}

#[instrument(skip_all, fields(book_id = %book_id))]
async fn handle_status(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<Value>)> {
    let book = match db::fetch_book(&state.pool, &book_id).await {
        Ok(Some(book)) => book,
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown book id" })),
            ));
        }
        Err(err) => {
            warn!(?err, "failed to fetch book row");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "could not load book" })),
            ));
        }
    };

    let progress = db::latest_progress(&state.pool, &book_id)
        .await
        .unwrap_or(None);

    // Document blobs are only exposed once the book is actually done.
    let (epub, pdf) = if book.status == BookStatus::Completed {
        (book.epub_base64, book.pdf_base64)
    } else {
        (None, None)
    };

    Ok(Json(StatusResponse {
        book_id: book.id,
        status: book.status.as_str(),
        title: book.title,
        cover_url: book.cover_url,
        error: book.error,
        progress,
        epub_base64: epub,
        pdf_base64: pdf,
    }))
}
