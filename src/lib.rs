#![forbid(unsafe_code)]

//! tubeproxy: a thin HTTP front end that proxies downloads, subtitles and
//! metadata lookups through an external media source (yt-dlp by default).

pub mod config;
pub mod download;
pub mod error;
pub mod metadata;
pub mod security;
pub mod server;
pub mod sniff;
pub mod source;
pub mod splice;
pub mod subtitles;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod test_support;
