#![forbid(unsafe_code)]

//! Server settings: CLI override > process environment > `.env` file >
//! built-in default.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const WORK_DIR_NAME: &str = "tubeproxy";

pub const HOST_KEY: &str = "TUBEPROXY_HOST";
pub const PORT_KEY: &str = "TUBEPROXY_PORT";
pub const WORKERS_KEY: &str = "TUBEPROXY_WORKERS";
pub const YT_DLP_KEY: &str = "TUBEPROXY_YT_DLP";
pub const WORK_DIR_KEY: &str = "TUBEPROXY_WORK_DIR";
pub const COOKIES_KEY: &str = "TUBEPROXY_COOKIES";
pub const ALLOWED_ORIGINS_KEY: &str = "TUBEPROXY_ALLOWED_ORIGINS";

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: IpAddr,
    pub port: u16,
    pub workers: usize,
    pub yt_dlp: PathBuf,
    /// Where subtitle files and embedded-subtitle scratch dirs are created.
    pub work_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub yt_dlp: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub cookies: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_server_settings(overrides: RuntimeOverrides) -> Result<ServerSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServerSettings> {
    build_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<ServerSettings> {
    let host_raw = overrides
        .host
        .and_then(non_blank)
        .or_else(|| lookup_value(HOST_KEY, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let host = host_raw
        .parse::<IpAddr>()
        .with_context(|| format!("invalid listen host {host_raw:?}"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value(PORT_KEY, file_vars, &env_lookup).and_then(|value| value.parse().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let workers = overrides
        .workers
        .or_else(|| {
            lookup_value(WORKERS_KEY, file_vars, &env_lookup)
                .and_then(|value| value.parse::<usize>().ok())
        })
        .filter(|count| *count > 0)
        .unwrap_or(DEFAULT_WORKERS);
    let yt_dlp = overrides
        .yt_dlp
        .or_else(|| lookup_value(YT_DLP_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let work_dir = overrides
        .work_dir
        .or_else(|| lookup_value(WORK_DIR_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| env::temp_dir().join(WORK_DIR_NAME));
    let cookies = overrides
        .cookies
        .or_else(|| lookup_value(COOKIES_KEY, file_vars, &env_lookup).map(PathBuf::from));
    let allowed_origins = lookup_value(ALLOWED_ORIGINS_KEY, file_vars, &env_lookup)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ServerSettings {
        host,
        port,
        workers,
        yt_dlp,
        work_dir,
        cookies,
        allowed_origins,
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> ServerSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = settings_from("");
        assert_eq!(settings.host.to_string(), DEFAULT_HOST);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.yt_dlp, PathBuf::from(DEFAULT_YT_DLP));
        assert_eq!(settings.work_dir, env::temp_dir().join(WORK_DIR_NAME));
        assert!(settings.cookies.is_none());
        assert!(settings.allowed_origins.is_empty());
    }

    #[test]
    fn reads_values_from_env_file() {
        let settings = settings_from(
            "TUBEPROXY_HOST=\"127.0.0.1\"\nTUBEPROXY_PORT=\"4242\"\nTUBEPROXY_WORKERS=2\n\
             TUBEPROXY_YT_DLP=/opt/yt-dlp\nTUBEPROXY_COOKIES=/etc/cookies.txt\n",
        );
        assert_eq!(settings.host.to_string(), "127.0.0.1");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.yt_dlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.cookies, Some(PathBuf::from("/etc/cookies.txt")));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from("TUBEPROXY_PORT=\"nope\"\nTUBEPROXY_WORKERS=0\n");
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn invalid_host_is_an_error() {
        let cfg = make_config("TUBEPROXY_HOST=not-an-ip\n");
        let vars = read_env_file(cfg.path()).unwrap();
        let err = build_settings(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("invalid listen host"));
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let settings = settings_from(
            "TUBEPROXY_ALLOWED_ORIGINS=\"https://a.example, https://b.example,,\"\n",
        );
        assert_eq!(
            settings.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("TUBEPROXY_PORT=5000\n").path()).unwrap();
        let settings = build_settings(&vars, |key| {
            if key == PORT_KEY {
                Some("6000".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.port, 6000);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEPROXY_YT_DLP="/usr/bin/yt-dlp"
            TUBEPROXY_WORK_DIR='/var/tmp/tp'
            TUBEPROXY_HOST =  "0.0.0.0"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get(YT_DLP_KEY).unwrap(), "/usr/bin/yt-dlp");
        assert_eq!(vars.get(WORK_DIR_KEY).unwrap(), "/var/tmp/tp");
        assert_eq!(vars.get(HOST_KEY).unwrap(), "0.0.0.0");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn override_precedence() {
        let mut vars = HashMap::new();
        vars.insert(HOST_KEY.to_string(), "10.0.0.1".to_string());
        vars.insert(PORT_KEY.to_string(), "7000".to_string());
        vars.insert(WORK_DIR_KEY.to_string(), "/file-work".to_string());
        vars.insert(YT_DLP_KEY.to_string(), "/file/yt-dlp".to_string());

        let overrides = RuntimeOverrides {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            work_dir: None,
            yt_dlp: Some(PathBuf::from("/cli/yt-dlp")),
            ..RuntimeOverrides::default()
        };

        let settings = build_settings_with_overrides(
            &vars,
            |key| {
                if key == WORK_DIR_KEY {
                    Some("/env-work".to_string())
                } else if key == PORT_KEY {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();

        assert_eq!(settings.host.to_string(), "127.0.0.1");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.work_dir, PathBuf::from("/env-work"));
        assert_eq!(settings.yt_dlp, PathBuf::from("/cli/yt-dlp"));
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_settings_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host.to_string(), DEFAULT_HOST);
    }

    #[test]
    fn resolve_reads_the_given_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("custom.env");
        fs::write(&env_path, "TUBEPROXY_WORKERS=3\n").unwrap();
        let settings = resolve_server_settings(RuntimeOverrides {
            env_path: Some(env_path),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        // Process env could set it too; only assert when it does not.
        if env::var(WORKERS_KEY).is_err() {
            assert_eq!(settings.workers, 3);
        }
    }
}
