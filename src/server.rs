#![forbid(unsafe_code)]

//! Route table, handlers and the process-wide layers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::download::{self, DownloadQuery};
use crate::error::{ApiError, ApiResult};
use crate::metadata::{MetaDocument, get_meta};
use crate::source::MediaSource;
use crate::subtitles::{fetch_subtitle, subtitle_response};

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn MediaSource>,
}

impl AppState {
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self { source }
    }
}

fn default_sub_lang() -> String {
    "en".to_string()
}

fn default_sub_format() -> String {
    "vtt".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SubQuery {
    #[serde(default = "default_sub_lang")]
    pub l: String,
    #[serde(default = "default_sub_format")]
    pub f: String,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/dl/{content_id}", get(download_media))
        .route("/meta/{content_id}", get(get_metadata))
        .route("/sub/{content_id}", get(get_subtitle))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Any origin when `allowed_origins` is empty, otherwise exactly the listed
/// ones. Unparsable origins are skipped with a warning.
pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn download_media(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    download::respond(state.source.as_ref(), query.into_request(content_id)).await
}

async fn get_metadata(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
) -> ApiResult<Json<MetaDocument>> {
    let doc = get_meta(state.source.clone(), content_id).await?;
    Ok(Json(doc))
}

async fn get_subtitle(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<SubQuery>,
) -> ApiResult<Response> {
    let file = fetch_subtitle(state.source.clone(), content_id.clone(), query.l, &query.f).await?;
    subtitle_response(file, &content_id).await
}

async fn not_found() -> Response {
    ApiError::not_found("endpoint not found").into_response()
}

pub async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
