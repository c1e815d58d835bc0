#![forbid(unsafe_code)]

//! Magic-byte content sniffing for the first chunk of a download.
//!
//! Only the leading bytes are inspected; the sniffer never fails. Buffers it
//! cannot place come back as `application/octet-stream` with the fallback
//! extension, since container ambiguity is the normal case for merged
//! downloads.

use mime_guess::mime::{self, Mime};

/// Extension used whenever the type cannot be mapped to one.
pub const FALLBACK_EXTENSION: &str = "mkv";

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const TS_PACKET_LEN: usize = 188;
/// How far into an EBML header the DocType is searched for.
const EBML_DOCTYPE_WINDOW: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffResult {
    pub mime_type: Mime,
    /// Extension without the leading dot.
    pub extension: &'static str,
}

impl SniffResult {
    /// `.ext` suffix appended to download names.
    pub fn suffix(&self) -> String {
        format!(".{}", self.extension)
    }
}

pub fn sniff(buffer: &[u8]) -> SniffResult {
    let mime_type: Mime = detect_mime(buffer)
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    let extension = extension_for(&mime_type);
    SniffResult {
        mime_type,
        extension,
    }
}

fn detect_mime(buf: &[u8]) -> &'static str {
    if buf.starts_with(&EBML_MAGIC) {
        let window = &buf[..buf.len().min(EBML_DOCTYPE_WINDOW)];
        return if contains(window, b"webm") {
            "video/webm"
        } else {
            "video/x-matroska"
        };
    }

    if buf.len() >= 12 && &buf[4..8] == b"ftyp" {
        let brand = &buf[8..12];
        return match brand {
            b"M4A " | b"M4B " | b"M4P " => "audio/mp4",
            b"qt  " => "video/quicktime",
            _ if brand.starts_with(b"3gp") || brand.starts_with(b"3g2") => "video/3gpp",
            _ => "video/mp4",
        };
    }
    if buf.len() >= 8 && matches!(&buf[4..8], b"moov" | b"mdat" | b"free") {
        return "video/mp4";
    }

    if buf.starts_with(b"OggS") {
        return "audio/ogg";
    }
    if buf.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if buf.starts_with(b"ID3") {
        return "audio/mpeg";
    }
    if buf.len() >= 12 && buf.starts_with(b"RIFF") {
        match &buf[8..12] {
            b"WAVE" => return "audio/x-wav",
            b"AVI " => return "video/x-msvideo",
            _ => {}
        }
    }
    if buf.starts_with(b"FLV\x01") {
        return "video/x-flv";
    }
    if buf.len() > TS_PACKET_LEN && buf[0] == 0x47 && buf[TS_PACKET_LEN] == 0x47 {
        return "video/mp2t";
    }
    if buf.len() >= 2 && buf[0] == 0xFF {
        // ADTS uses layer bits 00, MPEG audio frames never do.
        if buf[1] & 0xF6 == 0xF0 {
            return "audio/aac";
        }
        if buf[1] & 0xE0 == 0xE0 && buf[1] & 0x06 != 0 {
            return "audio/mpeg";
        }
    }

    detect_text(buf).unwrap_or("application/octet-stream")
}

fn detect_text(buf: &[u8]) -> Option<&'static str> {
    let text = std::str::from_utf8(buf).ok()?;
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("WEBVTT") {
        return Some("text/vtt");
    }
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return None;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some("application/json");
    }
    if trimmed.is_empty() {
        return None;
    }
    Some("text/plain")
}

/// Maps a MIME type to the extension a download should carry.
pub fn extension_for(mime_type: &Mime) -> &'static str {
    let essence = mime_type.essence_str();
    let preferred = match essence {
        "video/webm" => Some("webm"),
        "video/x-matroska" => Some("mkv"),
        "video/mp4" => Some("mp4"),
        "audio/mp4" => Some("m4a"),
        "video/quicktime" => Some("mov"),
        "video/3gpp" => Some("3gp"),
        "audio/ogg" => Some("ogg"),
        "audio/flac" => Some("flac"),
        "audio/mpeg" => Some("mp3"),
        "audio/aac" => Some("aac"),
        "audio/x-wav" => Some("wav"),
        "video/x-msvideo" => Some("avi"),
        "video/x-flv" => Some("flv"),
        "video/mp2t" => Some("ts"),
        "text/vtt" => Some("vtt"),
        "application/json" => Some("json"),
        "text/plain" => Some("txt"),
        "application/octet-stream" => return FALLBACK_EXTENSION,
        _ => None,
    };

    preferred
        .or_else(|| {
            mime_guess::get_mime_extensions_str(essence)
                .and_then(|extensions| extensions.first().copied())
        })
        .unwrap_or(FALLBACK_EXTENSION)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
