use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
use crate::notifications::MarkReadPolicy;
use crate::playback::DEFAULT_VISIBILITY_THRESHOLD;

const DEFAULT_ENV_PREFIX: &str = "NAGRIS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Bearer token issued by the web login. Absent means anonymous browsing.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            token: None,
            page_size: default_page_size(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("nagris-tui/{}", crate::VERSION)
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Cards from the end of the list at which the next page is requested.
    #[serde(default = "default_preload_threshold")]
    pub preload_threshold: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            preload_threshold: default_preload_threshold(),
        }
    }
}

fn default_preload_threshold() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_enabled")]
    pub enabled: bool,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    #[serde(default = "default_player_command")]
    pub player_command: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: default_playback_enabled(),
            visibility_threshold: default_visibility_threshold(),
            player_command: default_player_command(),
        }
    }
}

fn default_playback_enabled() -> bool {
    true
}

fn default_visibility_threshold() -> f32 {
    DEFAULT_VISIBILITY_THRESHOLD
}

fn default_player_command() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub mark_read_on_open: MarkReadPolicy,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            mark_read_on_open: MarkReadPolicy::default(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the log file; the user cache dir when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Reads the YAML file (explicit path or the default location) and then
/// applies `NAGRIS_SECTION__FIELD` environment overrides.
pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        anyhow::ensure!(
            path.exists(),
            "config: file {} does not exist",
            path.display()
        );
        cfg = read_config_file(path)?;
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.token" => {
            let trimmed = value.trim();
            cfg.api.token = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        "api.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.api.page_size = parsed.max(1);
            }
        }
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "feed.preload_threshold" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.feed.preload_threshold = parsed;
            }
        }
        "playback.enabled" => cfg.playback.enabled = parse_bool(&value),
        "playback.visibility_threshold" => {
            if let Ok(parsed) = value.parse::<f32>() {
                cfg.playback.visibility_threshold = parsed;
            }
        }
        "playback.player_command" => cfg.playback.player_command = value,
        "notifications.poll_interval" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.notifications.poll_interval = duration;
            }
        }
        "notifications.mark_read_on_open" => {
            if let Ok(policy) = serde_yaml::from_str::<MarkReadPolicy>(value.trim()) {
                cfg.notifications.mark_read_on_open = policy;
            }
        }
        "log.level" => cfg.log.level = value,
        "log.dir" => cfg.log.dir = Some(PathBuf::from(value)),
        _ => {}
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nagris").join("config.yaml"))
}
