#![forbid(unsafe_code)]

//! In-memory [`MediaSource`] used by the responder and router tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{StreamExt, stream};

use crate::metadata::{Author, AudioSourceMeta, Format, MetaDocument, VideoSourceMeta};
use crate::source::{ChunkStream, MediaRequest, MediaSource};
use crate::subtitles::SubtitleFormat;

#[derive(Default)]
pub struct FakeSource {
    pub chunks: Vec<Bytes>,
    /// Error yielded after all `chunks` when set.
    pub fail_after: Option<String>,
    pub meta: Option<MetaDocument>,
    pub subtitle_dir: PathBuf,
    pub stream_requests: Mutex<Vec<MediaRequest>>,
    pub meta_calls: AtomicUsize,
    pub subtitle_calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_meta(meta: MetaDocument) -> Self {
        Self {
            meta: Some(meta),
            ..Self::default()
        }
    }

    pub fn with_subtitle_dir(dir: &Path) -> Self {
        Self {
            subtitle_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn failing_after(mut self, message: &str) -> Self {
        self.fail_after = Some(message.to_string());
        self
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }
}

impl MediaSource for FakeSource {
    fn open_stream(&self, request: &MediaRequest) -> ChunkStream {
        self.stream_requests.lock().unwrap().push(request.clone());

        let mut items: Vec<io::Result<Bytes>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.fail_after {
            items.push(Err(io::Error::other(message.clone())));
        }
        stream::iter(items).boxed()
    }

    fn fetch_meta(&self, _content_id: &str) -> Result<Option<MetaDocument>> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.meta.clone())
    }

    fn fetch_subtitle(
        &self,
        content_id: &str,
        lang: &str,
        format: SubtitleFormat,
    ) -> Result<PathBuf> {
        self.subtitle_calls.fetch_add(1, Ordering::SeqCst);
        let path = self
            .subtitle_dir
            .join(format!("{content_id}.{lang}.{}", format.extension()));
        std::fs::write(&path, "WEBVTT\n\n00:00.000 --> 00:01.000\nhello\n")
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

pub fn sample_meta() -> MetaDocument {
    MetaDocument {
        title: "Alpha Title".into(),
        author: Author {
            name: "Channel".into(),
            subscribers: Some(100),
        },
        thumbnail: Some("https://i.ytimg.com/vi/alpha/maxresdefault.jpg".into()),
        likes: Some(5),
        views: Some(10),
        formats: vec![
            Format {
                id: "251".into(),
                note: "medium".into(),
                audio: Some(AudioSourceMeta {
                    samples: Some(48000),
                    rate: Some(140.2),
                    codec: "opus".into(),
                }),
                video: None,
            },
            Format {
                id: "248".into(),
                note: "1080p".into(),
                audio: None,
                video: Some(VideoSourceMeta {
                    width: Some(1920),
                    height: Some(1080),
                    fps: Some(25.0),
                    codec: "vp9".into(),
                }),
            },
        ],
        subs: BTreeMap::from([("en".to_string(), "English".to_string())]),
    }
}
