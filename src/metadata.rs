#![forbid(unsafe_code)]

//! Metadata documents served by `/meta` and the lookup responder.
//!
//! The document shape mirrors what the web frontend renders: title, author,
//! counters, the list of downloadable formats and the available subtitle
//! languages. It is built from yt-dlp's `--dump-single-json` output.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::ProxyError;
use crate::security::validate_content_id;
use crate::source::MediaSource;

/// Whole metadata payload for a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDocument {
    pub title: String,
    pub author: Author,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default)]
    pub formats: Vec<Format>,
    /// Language code to display name.
    #[serde(default)]
    pub subs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<u64>,
}

/// One selectable format. Either side may be missing for video-only or
/// audio-only formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub id: String,
    pub note: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSourceMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoSourceMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSourceMeta {
    /// Sample rate in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
    /// Average bitrate in kbit/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    pub codec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSourceMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    pub codec: String,
}

#[derive(Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_follower_count: Option<u64>,
    thumbnail: Option<String>,
    like_count: Option<u64>,
    view_count: Option<u64>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
    #[serde(default)]
    subtitles: BTreeMap<String, Vec<YtDlpSubtitle>>,
}

#[derive(Deserialize)]
struct YtDlpFormat {
    format_id: String,
    format_note: Option<String>,
    resolution: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    fps: Option<f64>,
    asr: Option<u64>,
    abr: Option<f64>,
}

#[derive(Deserialize)]
struct YtDlpSubtitle {
    name: Option<String>,
}

impl MetaDocument {
    /// Parses the JSON printed by `yt-dlp --dump-single-json`.
    pub fn from_ytdlp_json(raw: &[u8]) -> serde_json::Result<Self> {
        let info: YtDlpInfo = serde_json::from_slice(raw)?;
        Ok(Self::from_info(info))
    }

    fn from_info(info: YtDlpInfo) -> Self {
        let formats = info.formats.into_iter().map(Format::from_ytdlp).collect();
        let subs = info
            .subtitles
            .into_iter()
            .map(|(code, tracks)| {
                let name = tracks
                    .into_iter()
                    .find_map(|track| track.name)
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| code.clone());
                (code, name)
            })
            .collect();

        Self {
            title: info.title.or(info.fulltitle).unwrap_or_default(),
            author: Author {
                name: info.channel.or(info.uploader).unwrap_or_default(),
                subscribers: info.channel_follower_count,
            },
            thumbnail: info.thumbnail,
            likes: info.like_count,
            views: info.view_count,
            formats,
            subs,
        }
    }
}

impl Format {
    fn from_ytdlp(format: YtDlpFormat) -> Self {
        let audio = present_codec(format.acodec).map(|codec| AudioSourceMeta {
            samples: format.asr,
            rate: format.abr,
            codec,
        });
        let video = present_codec(format.vcodec).map(|codec| VideoSourceMeta {
            width: format.width,
            height: format.height,
            fps: format.fps,
            codec,
        });
        let note = format
            .format_note
            .or(format.resolution)
            .unwrap_or_default();

        Self {
            id: format.format_id,
            note,
            audio,
            video,
        }
    }
}

/// yt-dlp spells a missing stream as the literal codec `none`.
fn present_codec(codec: Option<String>) -> Option<String> {
    codec.filter(|value| !value.is_empty() && value != "none")
}

/// Looks up metadata for `content_id`, mapping "no document" to
/// [`ProxyError::NotFound`].
pub async fn get_meta(
    source: Arc<dyn MediaSource>,
    content_id: String,
) -> Result<MetaDocument, ProxyError> {
    validate_content_id(&content_id)?;

    let lookup = tokio::task::spawn_blocking(move || source.fetch_meta(&content_id))
        .await
        .map_err(|err| ProxyError::Upstream(anyhow!(err).context("metadata lookup task failed")))?;

    lookup?.ok_or(ProxyError::NotFound)
}
