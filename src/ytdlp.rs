#![forbid(unsafe_code)]

//! [`MediaSource`] backed by the `yt-dlp` executable.
//!
//! Plain downloads are piped straight from yt-dlp's stdout. Downloads with an
//! embedded subtitle track cannot be written to stdout, so those go through a
//! private scratch directory that lives exactly as long as the stream.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::config::ServerSettings;
use crate::metadata::MetaDocument;
use crate::source::{ChunkStream, MediaRequest, MediaSource};
use crate::subtitles::SubtitleFormat;

pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";
const READ_CHUNK_SIZE: usize = 64 * 1024;
/// File stem used for downloads inside a scratch directory.
const SCRATCH_STEM: &str = "media";

pub fn watch_url(content_id: &str) -> String {
    format!("{WATCH_URL_PREFIX}{content_id}")
}

/// Subtitle files are written to `work_dir` under unique stems. Live chat
/// dumps stay there after being served until [`YtDlpSource::sweep_live_chat`]
/// runs, which the server does at startup.
pub struct YtDlpSource {
    binary: PathBuf,
    work_dir: PathBuf,
    cookies: Option<PathBuf>,
    next_stem: AtomicU64,
}

impl YtDlpSource {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
            cookies: None,
            next_stem: AtomicU64::new(0),
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self::new(&settings.yt_dlp, &settings.work_dir).with_cookies(settings.cookies.clone())
    }

    /// `--cookies <file>` when a cookies file is configured and present.
    fn cookie_args(&self) -> Vec<OsString> {
        match &self.cookies {
            Some(path) if path.exists() => {
                vec![OsString::from("--cookies"), path.clone().into_os_string()]
            }
            _ => Vec::new(),
        }
    }

    fn async_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(self.cookie_args())
            .args(["--no-warnings", "--no-progress"])
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn blocking_command(&self) -> StdCommand {
        let mut command = StdCommand::new(&self.binary);
        command
            .args(self.cookie_args())
            .args(["--no-warnings", "--no-progress"])
            .stdin(Stdio::null());
        command
    }

    /// Unique per process and request so concurrent subtitle fetches for the
    /// same id never share files.
    fn subtitle_stem(&self, content_id: &str) -> String {
        let n = self.next_stem.fetch_add(1, Ordering::Relaxed);
        format!("{content_id}-{}-{n}", std::process::id())
    }

    /// Removes `*.live_chat.json` dumps left in the work dir by earlier runs.
    /// Subtitle cleanup never deletes `.json` files, so nothing else does.
    pub fn sweep_live_chat(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.work_dir.display()));
            }
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_live_chat = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".live_chat.json"));
            if !is_live_chat || !entry.file_type()?.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not remove stale live chat file")
                }
            }
        }
        Ok(removed)
    }
}

impl MediaSource for YtDlpSource {
    fn open_stream(&self, request: &MediaRequest) -> ChunkStream {
        let mut command = self.async_command();
        command.arg("--format").arg(&request.format_selector);
        let url = watch_url(&request.content_id);

        match &request.subtitle_lang {
            None => {
                command.args(["--output", "-"]).arg(url);
                piped_stream(command).boxed()
            }
            Some(lang) => {
                command
                    .args(["--embed-subs", "--write-subs", "--write-auto-subs"])
                    .arg("--sub-langs")
                    .arg(lang);
                embedded_stream(command, self.work_dir.clone(), url).boxed()
            }
        }
    }

    fn fetch_meta(&self, content_id: &str) -> Result<Option<MetaDocument>> {
        let output = self
            .blocking_command()
            .args(["--dump-single-json", "--skip-download"])
            .arg(watch_url(content_id))
            .output()
            .with_context(|| format!("launching {}", self.binary.display()))?;

        if !output.status.success() {
            debug!(
                content_id,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "no metadata returned"
            );
            return Ok(None);
        }

        match MetaDocument::from_ytdlp_json(&output.stdout) {
            Ok(doc) => Ok(Some(doc)),
            Err(err) => {
                warn!(content_id, error = %err, "could not parse yt-dlp metadata");
                Ok(None)
            }
        }
    }

    fn fetch_subtitle(
        &self,
        content_id: &str,
        lang: &str,
        format: SubtitleFormat,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("creating {}", self.work_dir.display()))?;

        let ext = format.extension();
        let stem = self.subtitle_stem(content_id);
        let template = self.work_dir.join(format!("{stem}.%(ext)s"));

        let mut command = self.blocking_command();
        command
            .args(["--skip-download", "--write-subs", "--write-auto-subs"])
            .arg("--sub-langs")
            .arg(lang)
            .arg("--sub-format")
            .arg(format!("{ext}/best"));
        if format.is_convertible() {
            command.arg("--convert-subs").arg(ext);
        }
        let output = command
            .arg("--output")
            .arg(&template)
            .arg(watch_url(content_id))
            .output()
            .with_context(|| format!("launching {}", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "yt-dlp exited with {} fetching {lang} subtitles for {content_id}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let path = self.work_dir.join(format!("{stem}.{lang}.{ext}"));
        if !path.is_file() {
            bail!("yt-dlp produced no {lang}.{ext} subtitle for {content_id}");
        }
        Ok(path)
    }
}

/// Runs `command` on first poll and yields its stdout. A non-zero exit after
/// EOF becomes the final item.
fn piped_stream(mut command: Command) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        let mut child = command.stdout(Stdio::piped()).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stdout was not captured"))?;

        let tail = collect_stderr_tail(&mut child);

        let mut reader = ReaderStream::with_capacity(stdout, READ_CHUNK_SIZE);
        while let Some(chunk) = reader.next().await {
            yield chunk?;
        }

        let status = child.wait().await?;
        if !status.success() {
            Err::<(), io::Error>(exit_error(status, tail).await)?;
        }
    }
}

/// Downloads into a scratch directory under `work_dir`, then streams the
/// produced file. The directory goes away with the stream.
fn embedded_stream(
    mut command: Command,
    work_dir: PathBuf,
    url: String,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        fs::create_dir_all(&work_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix("embed-")
            .tempdir_in(&work_dir)?;
        let template = scratch.path().join(format!("{SCRATCH_STEM}.%(ext)s"));

        let mut child = command
            .arg("--output")
            .arg(&template)
            .arg(&url)
            .stdout(Stdio::null())
            .spawn()?;
        let tail = collect_stderr_tail(&mut child);
        let status = child.wait().await?;
        if !status.success() {
            Err::<(), io::Error>(exit_error(status, tail).await)?;
        }

        let path = locate_output(scratch.path())?;
        let file = tokio::fs::File::open(&path).await?;
        let mut reader = ReaderStream::with_capacity(file, READ_CHUNK_SIZE);
        while let Some(chunk) = reader.next().await {
            yield chunk?;
        }
        drop(scratch);
    }
}

/// Drains the child's stderr in the background, keeping its last non-empty
/// line. The pipe must be read or a chatty yt-dlp blocks on a full buffer.
fn collect_stderr_tail(child: &mut Child) -> Option<JoinHandle<Option<String>>> {
    let stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() {
                last = Some(line.to_string());
            }
        }
        last
    }))
}

async fn exit_error(status: ExitStatus, tail: Option<JoinHandle<Option<String>>>) -> io::Error {
    let last_line = match tail {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    };
    match last_line {
        Some(line) => io::Error::other(format!("yt-dlp exited with {status}: {line}")),
        None => io::Error::other(format!("yt-dlp exited with {status}")),
    }
}

/// Picks the merged output inside a scratch directory: the largest finished
/// `media.*` file. Leftover subtitle sidecars and partial files are ignored.
fn locate_output(dir: &Path) -> io::Result<PathBuf> {
    let prefix = format!("{SCRATCH_STEM}.");
    let mut best: Option<(u64, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&prefix) || name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        if best.as_ref().is_none_or(|(size, _)| meta.len() > *size) {
            best = Some((meta.len(), entry.path()));
        }
    }

    best.map(|(_, path)| path)
        .ok_or_else(|| io::Error::other("yt-dlp did not produce a media file"))
}
