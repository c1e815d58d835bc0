#![forbid(unsafe_code)]

//! Guards that run before anything reaches the media source or the process
//! starts serving.

use anyhow::{Result, bail};
use nix::unistd::Uid;

use crate::error::ProxyError;

/// Longest identifier accepted from clients. Real ids are 11 characters.
pub const MAX_CONTENT_ID_LEN: usize = 64;
/// Longest subtitle language code, e.g. `zh-Hans-en`.
pub const MAX_LANGUAGE_LEN: usize = 32;

/// Fails fast when the server is started as root. yt-dlp writes scratch files
/// and executes extractor code, neither of which should run privileged.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Content ids end up inside the watch URL and inside file names, so only the
/// platform's id alphabet is let through. Ids may start with `-`; they are
/// never passed to yt-dlp as a bare argument.
pub fn validate_content_id(value: &str) -> Result<(), ProxyError> {
    if !is_plain_token(value, MAX_CONTENT_ID_LEN) {
        return Err(ProxyError::InvalidContentId);
    }
    Ok(())
}

/// Subtitle languages become a bare yt-dlp argument and part of the subtitle
/// file name, so a leading `-` is refused as well.
pub fn validate_language(value: &str) -> Result<(), ProxyError> {
    if !is_plain_token(value, MAX_LANGUAGE_LEN) || value.starts_with('-') {
        return Err(ProxyError::InvalidLanguage);
    }
    Ok(())
}

fn is_plain_token(value: &str, max_len: usize) -> bool {
    !value.is_empty()
        && value.len() <= max_len
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
