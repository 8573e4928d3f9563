#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DOWNLOADER: &str = "youtube-dl";
pub const DEFAULT_OUTPUT_ROOT: &str = ".";
pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix";
pub const PAGE_DELAY: Duration = Duration::from_secs(1);

/// Immutable settings for one archive run. Built once at startup and handed
/// to every component by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: String,
    pub access_token: Option<String>,
    pub output_root: PathBuf,
    pub workers: NonZeroUsize,
    pub downloader: PathBuf,
    pub api_base: String,
    pub video_type: Option<String>,
    pub progress_file: Option<PathBuf>,
    pub page_delay: Duration,
}

/// Which lookup resolves the channel owner. Exactly one is allowed per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySelector {
    Login(String),
    Id(String),
}

impl IdentitySelector {
    pub fn from_flags(user: Option<String>, user_id: Option<String>) -> Result<Self> {
        let user = user.filter(|value| !value.trim().is_empty());
        let user_id = user_id.filter(|value| !value.trim().is_empty());
        match (user, user_id) {
            (Some(_), Some(_)) => bail!("only use one of --user or --userid"),
            (None, None) => bail!("missing --user or --userid"),
            (Some(login), None) => Ok(Self::Login(login.trim().to_string())),
            (None, Some(id)) => Ok(Self::Id(id.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub client_id: Option<String>,
    pub access_token: Option<String>,
    pub output_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub downloader: Option<PathBuf>,
    pub video_type: Option<String>,
    pub progress_file: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings(&file_vars, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let client_id = non_blank(overrides.client_id)
        .or_else(|| lookup_value("TWITCH_CLIENT_ID", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("TWITCH_CLIENT_ID not set (pass --clientid)"))?;
    let access_token = non_blank(overrides.access_token)
        .or_else(|| lookup_value("TWITCH_ACCESS_TOKEN", file_vars, &env_lookup));
    let output_root = overrides
        .output_root
        .or_else(|| lookup_value("ARCHIVE_OUTPUT_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT));
    let workers = match overrides.workers {
        Some(value) => value,
        None => match lookup_value("ARCHIVE_WORKERS", file_vars, &env_lookup) {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("ARCHIVE_WORKERS is not a number: {raw}"))?,
            None => DEFAULT_WORKERS,
        },
    };
    let workers =
        NonZeroUsize::new(workers).ok_or_else(|| anyhow!("worker count must be at least 1"))?;
    let downloader = overrides
        .downloader
        .or_else(|| lookup_value("ARCHIVE_DOWNLOADER", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADER));
    let api_base = lookup_value("HELIX_API_URL", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_HELIX_URL.to_string())
        .trim_end_matches('/')
        .to_string();
    let video_type = non_blank(overrides.video_type)
        .map(|value| value.to_ascii_lowercase())
        .filter(|value| value != "all");
    if let Some(kind) = &video_type
        && !matches!(kind.as_str(), "archive" | "highlight" | "upload")
    {
        bail!("unknown video type: {kind}");
    }

    Ok(Settings {
        client_id,
        access_token,
        output_root,
        workers,
        downloader,
        api_base,
        video_type,
        progress_file: overrides.progress_file,
        page_delay: PAGE_DELAY,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
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
