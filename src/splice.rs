#![forbid(unsafe_code)]

//! Peek-then-rejoin over a lazy chunk stream.
//!
//! The download path has to know the media type before it can commit
//! response headers, and the only reliable source for that is the first bytes
//! of the stream itself. [`StreamSplicer`] pulls exactly one chunk up front and
//! later hands back a stream that replays that chunk followed by the untouched
//! remainder, so nothing is buffered beyond the first chunk.

use bytes::Bytes;
use futures::{StreamExt, future, stream};

use crate::error::ProxyError;
use crate::source::ChunkStream;

pub struct StreamSplicer {
    source: ChunkStream,
    first: Option<Bytes>,
}

impl StreamSplicer {
    pub fn new(source: ChunkStream) -> Self {
        Self {
            source,
            first: None,
        }
    }

    /// Waits for the first non-empty chunk and keeps it for [`rejoin`].
    ///
    /// Calling this again returns the same chunk without touching the source.
    /// Zero-length chunks in front of the data are dropped; they carry nothing
    /// to sniff.
    ///
    /// [`rejoin`]: StreamSplicer::rejoin
    pub async fn detach_first(&mut self) -> Result<Bytes, ProxyError> {
        if let Some(first) = &self.first {
            return Ok(first.clone());
        }

        let chunk = loop {
            match self.source.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(err)) => {
                    return Err(ProxyError::Upstream(
                        anyhow::Error::new(err).context("reading first media chunk"),
                    ));
                }
                None => return Err(ProxyError::UpstreamEmpty),
            }
        };

        self.first = Some(chunk.clone());
        Ok(chunk)
    }

    /// Consumes the splicer, yielding the detached chunk (if any) and then the
    /// rest of the source in its original order.
    pub fn rejoin(self) -> ChunkStream {
        match self.first {
            Some(first) => stream::once(future::ready(Ok(first)))
                .chain(self.source)
                .boxed(),
            None => self.source,
        }
    }
}
