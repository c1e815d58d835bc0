#![forbid(unsafe_code)]

//! `/dl` responder: peek the first chunk, sniff it, commit headers, then
//! stream everything to the client.

use std::io;

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::security::{validate_content_id, validate_language};
use crate::sniff::{SniffResult, sniff};
use crate::source::{ChunkStream, MediaRequest, MediaSource};
use crate::splice::StreamSplicer;

pub const DEFAULT_FORMAT: &str = "best";

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// Query string of `/dl/{content_id}`. The web frontend sends `f` instead of
/// `format`.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default = "default_format", alias = "f")]
    pub format: String,
    pub sl: Option<String>,
    pub title: Option<String>,
}

impl DownloadQuery {
    pub fn into_request(self, content_id: String) -> MediaRequest {
        MediaRequest {
            content_id,
            format_selector: self.format,
            subtitle_lang: self.sl.filter(|lang| !lang.trim().is_empty()),
            display_title: self.title,
        }
    }
}

/// Streams the media for `request`.
///
/// Nothing is sent before the first chunk arrived: an empty upstream or a
/// failure before any data still produces a proper error response.
pub async fn respond(source: &dyn MediaSource, request: MediaRequest) -> ApiResult<Response> {
    validate_content_id(&request.content_id)?;
    if let Some(lang) = &request.subtitle_lang {
        validate_language(lang)?;
    }

    let mut splicer = StreamSplicer::new(source.open_stream(&request));
    let first = splicer.detach_first().await?;
    let sniffed = sniff(&first);

    info!(
        content_id = %request.content_id,
        mime = %sniffed.mime_type,
        ext = sniffed.extension,
        "streaming download"
    );

    let disposition = content_disposition(request.display_title.as_deref(), &sniffed);
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| ApiError::internal("could not build download file name header"))?;
    let content_type = HeaderValue::from_str(sniffed.mime_type.as_ref())
        .map_err(|_| ApiError::internal("could not build content type header"))?;

    let body = track_transfer(request.content_id, splicer.rejoin());
    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// `attachment;filename*=UTF-8''<title><.ext>` with the title percent-encoded
/// down to the RFC 3986 unreserved set.
pub fn content_disposition(title: Option<&str>, sniffed: &SniffResult) -> String {
    let title = urlencoding::encode(title.unwrap_or_default());
    format!("attachment;filename*=UTF-8''{title}{}", sniffed.suffix())
}

/// Passes chunks through unchanged, logging how the transfer ended. An
/// upstream error is forwarded so the transport aborts the response.
fn track_transfer(
    content_id: String,
    mut chunks: ChunkStream,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::stream! {
        let mut sent: u64 = 0;
        let mut failed = false;
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    sent += chunk.len() as u64;
                    yield Ok(chunk);
                }
                Err(err) => {
                    warn!(%content_id, bytes = sent, error = %err, "download aborted mid-stream");
                    failed = true;
                    yield Err(err);
                    break;
                }
            }
        }
        if !failed {
            debug!(%content_id, bytes = sent, "download complete");
        }
    }
}
