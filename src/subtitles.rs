#![forbid(unsafe_code)]

//! Subtitle fetching and the post-response cleanup of the fetched file.
//!
//! The source writes each subtitle to disk. The file is streamed back to the
//! client and removed once the response body is dropped, which happens after
//! the last byte was handed to the transport or when the client goes away.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{ApiError, ApiResult, ProxyError};
use crate::security::{validate_content_id, validate_language};
use crate::source::MediaSource;

/// Pseudo language yt-dlp uses for the live chat replay.
pub const LIVE_CHAT_LANG: &str = "live_chat";

/// The only extensions the cleanup is ever allowed to delete.
pub const REMOVABLE_EXTENSIONS: [&str; 3] = ["vtt", "srt", "ass"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Vtt,
    Srt,
    Ass,
    /// Live chat replay, only available for [`LIVE_CHAT_LANG`].
    LiveChatJson,
}

impl SubtitleFormat {
    /// Accepts `vtt`, `srt`, `ass`, plus `json` when the language is the live
    /// chat.
    pub fn from_request(lang: &str, format: &str) -> Result<Self, ProxyError> {
        match format {
            "vtt" => Ok(Self::Vtt),
            "srt" => Ok(Self::Srt),
            "ass" => Ok(Self::Ass),
            "json" if lang == LIVE_CHAT_LANG => Ok(Self::LiveChatJson),
            _ => Err(ProxyError::InvalidFormat),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Vtt => "vtt",
            Self::Srt => "srt",
            Self::Ass => "ass",
            Self::LiveChatJson => "json",
        }
    }

    /// Whether yt-dlp can convert other subtitle formats into this one.
    pub fn is_convertible(self) -> bool {
        !matches!(self, Self::LiveChatJson)
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Vtt => "text/vtt; charset=utf-8",
            Self::Srt => "application/x-subrip; charset=utf-8",
            Self::Ass => "text/x-ssa; charset=utf-8",
            Self::LiveChatJson => "application/json",
        }
    }
}

/// A subtitle produced by the source for exactly one response. The file is
/// removed when this value (or the response body it moved into) is dropped.
#[derive(Debug)]
pub struct SubtitleFile {
    pub language: String,
    pub format: SubtitleFormat,
    guard: CleanupGuard,
}

impl SubtitleFile {
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Name the client sees: `{content_id}.{lang}.{format}`.
    pub fn download_name(&self, content_id: &str) -> String {
        format!(
            "{content_id}.{}.{}",
            self.language,
            self.format.extension()
        )
    }
}

/// Validates the request and has the source produce the subtitle file.
///
/// Every check runs before the source is touched so rejected requests cost
/// nothing downstream. The cleanup guard is created on the blocking thread
/// itself: if the caller is cancelled mid-fetch, the finished task drops the
/// guard and the file is still removed.
pub async fn fetch_subtitle(
    source: Arc<dyn MediaSource>,
    content_id: String,
    lang: String,
    format: &str,
) -> Result<SubtitleFile, ProxyError> {
    let format = SubtitleFormat::from_request(&lang, format)?;
    validate_content_id(&content_id)?;
    validate_language(&lang)?;

    let task_lang = lang.clone();
    let guard = tokio::task::spawn_blocking(move || {
        source
            .fetch_subtitle(&content_id, &task_lang, format)
            .map(CleanupGuard::new)
    })
    .await
    .map_err(|err| ProxyError::Upstream(anyhow!(err).context("subtitle task failed")))??;

    Ok(SubtitleFile {
        language: lang,
        format,
        guard,
    })
}

/// Builds the file response. The file is deleted when the body goes away.
pub async fn subtitle_response(file: SubtitleFile, content_id: &str) -> ApiResult<Response> {
    let handle = File::open(file.path()).await.map_err(|err| {
        ProxyError::Upstream(anyhow!(err).context(format!("opening {}", file.path().display())))
    })?;
    let size = handle
        .metadata()
        .await
        .map_err(|err| ProxyError::Upstream(anyhow!(err).context("reading subtitle metadata")))?
        .len();

    let disposition = format!("attachment; filename=\"{}\"", file.download_name(content_id));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| ApiError::internal("could not build subtitle file name header"))?;
    let content_type = HeaderValue::from_static(file.format.content_type());

    let body = async_stream::stream! {
        let _file = file;
        let mut reader = ReaderStream::new(handle);
        while let Some(chunk) = reader.next().await {
            yield chunk;
        }
    };

    let mut response = Body::from_stream(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// Deletes one subtitle file when dropped.
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
}

impl CleanupGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        remove_subtitle_file(&self.path);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    /// Extension not on the allow-list; the file was left alone.
    Skipped,
    /// Removal failed, usually because the file is already gone.
    Failed,
}

/// Removes `path` if, and only if, it carries a subtitle extension. Errors are
/// logged and swallowed.
pub fn remove_subtitle_file(path: &Path) -> CleanupOutcome {
    if !is_removable(path) {
        debug!(path = %path.display(), "refusing to remove non-subtitle file");
        return CleanupOutcome::Skipped;
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed subtitle file");
            CleanupOutcome::Removed
        }
        Err(err) => {
            debug!(path = %path.display(), error = %err, "subtitle cleanup failed");
            CleanupOutcome::Failed
        }
    }
}

fn is_removable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| REMOVABLE_EXTENSIONS.contains(&ext))
}
