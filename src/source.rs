#![forbid(unsafe_code)]

//! The seam between the HTTP layer and whatever actually talks to the video
//! platform.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::metadata::MetaDocument;
use crate::subtitles::SubtitleFormat;

/// Lazy, finite, non-restartable sequence of media bytes.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// One `/dl` request, built per request and dropped with the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub content_id: String,
    pub format_selector: String,
    pub subtitle_lang: Option<String>,
    pub display_title: Option<String>,
}

/// Media extraction backend.
///
/// `open_stream` must not do any work until the returned stream is polled;
/// dropping the stream must release whatever the source started. The other
/// two calls are blocking and are run on the blocking pool by callers.
pub trait MediaSource: Send + Sync + 'static {
    fn open_stream(&self, request: &MediaRequest) -> ChunkStream;

    /// `Ok(None)` means the platform had nothing for this id.
    fn fetch_meta(&self, content_id: &str) -> Result<Option<MetaDocument>>;

    /// Produces a subtitle file on disk and returns its path. The caller owns
    /// the file from then on.
    fn fetch_subtitle(
        &self,
        content_id: &str,
        lang: &str,
        format: SubtitleFormat,
    ) -> Result<PathBuf>;
}
