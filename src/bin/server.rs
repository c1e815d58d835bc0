#![forbid(unsafe_code)]

//! HTTP entry point: resolves settings, installs logging and serves the
//! download, subtitle and metadata routes.

use std::{fs, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubeproxy::{
    config::{RuntimeOverrides, ServerSettings, resolve_server_settings},
    security::ensure_not_root,
    server::{AppState, build_cors_layer, router, shutdown_signal},
    ytdlp::YtDlpSource,
};

const DEFAULT_LOG_FILTER: &str = "tubeproxy=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "tubeproxy")]
#[command(version, about = "Streams yt-dlp downloads, subtitles and metadata over HTTP")]
struct ServerArgs {
    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Runtime worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// yt-dlp executable
    #[arg(long = "yt-dlp", value_name = "PATH")]
    yt_dlp: Option<PathBuf>,

    /// Directory for subtitle files and scratch downloads
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Netscape cookies file handed to yt-dlp
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Env file read before the process environment
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            workers: self.workers,
            yt_dlp: self.yt_dlp,
            work_dir: self.work_dir,
            cookies: self.cookies,
            env_path: self.env_file,
        }
    }
}

fn main() -> Result<()> {
    let args = ServerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    ensure_not_root("tubeproxy")?;

    let settings = resolve_server_settings(args.into_overrides())?;
    fs::create_dir_all(&settings.work_dir)
        .with_context(|| format!("creating {}", settings.work_dir.display()))?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.workers)
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(serve(settings))
}

async fn serve(settings: ServerSettings) -> Result<()> {
    let source = YtDlpSource::from_settings(&settings);
    match source.sweep_live_chat() {
        Ok(0) => {}
        Ok(removed) => info!(removed, "removed stale live chat files"),
        Err(err) => warn!(error = %err, "could not sweep work dir"),
    }
    let source = Arc::new(source);
    let app = router(
        AppState::new(source),
        build_cors_layer(&settings.allowed_origins),
    );

    let addr = SocketAddr::new(settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        workers = settings.workers,
        yt_dlp = %settings.yt_dlp.display(),
        work_dir = %settings.work_dir.display(),
        "tubeproxy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("tubeproxy stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_to_unset() {
        let args = ServerArgs::try_parse_from(["tubeproxy"]).unwrap();
        let overrides = args.into_overrides();
        assert!(overrides.host.is_none());
        assert!(overrides.port.is_none());
        assert!(overrides.env_path.is_none());
    }

    #[test]
    fn args_map_onto_overrides() {
        let args = ServerArgs::try_parse_from([
            "tubeproxy",
            "--host",
            "127.0.0.1",
            "--port",
            "4100",
            "--workers",
            "2",
            "--yt-dlp",
            "/opt/yt-dlp",
            "--work-dir",
            "/var/tmp/tp",
            "--cookies",
            "/etc/cookies.txt",
            "--env-file",
            "/etc/tubeproxy.env",
        ])
        .unwrap();
        let overrides = args.into_overrides();
        assert_eq!(overrides.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(overrides.port, Some(4100));
        assert_eq!(overrides.workers, Some(2));
        assert_eq!(overrides.yt_dlp, Some(PathBuf::from("/opt/yt-dlp")));
        assert_eq!(overrides.work_dir, Some(PathBuf::from("/var/tmp/tp")));
        assert_eq!(overrides.cookies, Some(PathBuf::from("/etc/cookies.txt")));
        assert_eq!(overrides.env_path, Some(PathBuf::from("/etc/tubeproxy.env")));
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(ServerArgs::try_parse_from(["tubeproxy", "--port", "http"]).is_err());
    }
}
