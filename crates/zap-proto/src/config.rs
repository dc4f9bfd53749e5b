use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playlist: PlaylistConfig,
    #[serde(default)]
    pub logos: LogoConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Where the channel list comes from and how hard we try to get it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    #[serde(default = "default_playlist_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_playlist_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_playlist_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_playlist_redirects")]
    pub max_redirects: usize,
    /// HEAD probe against `url`.  0 disables it.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoConfig {
    #[serde(default = "default_logo_concurrency")]
    pub max_concurrent: usize,
    #[serde(default = "default_logo_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_logo_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_logo_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_thumb_width")]
    pub thumb_width: u32,
    #[serde(default = "default_thumb_height")]
    pub thumb_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Start the last watched stream once the playlist is in.
    #[serde(default)]
    pub autoplay_last_stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_hwdec")]
    pub hwdec: String,
    #[serde(default = "default_cache_secs")]
    pub cache_secs: u64,
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            url: default_playlist_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_playlist_timeout(),
            max_bytes: default_playlist_max_bytes(),
            max_redirects: default_playlist_redirects(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl Default for LogoConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_logo_concurrency(),
            timeout_secs: default_logo_timeout(),
            max_bytes: default_logo_max_bytes(),
            max_redirects: default_logo_redirects(),
            thumb_width: default_thumb_width(),
            thumb_height: default_thumb_height(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            search_debounce_ms: default_search_debounce_ms(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            autoplay_last_stream: false,
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            hwdec: default_hwdec(),
            cache_secs: default_cache_secs(),
            network_timeout_secs: default_network_timeout(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

fn default_playlist_url() -> String {
    "https://iptv-org.github.io/iptv/index.m3u".to_string()
}

fn default_user_agent() -> String {
    concat!("zaptv/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_playlist_timeout() -> u64 {
    15
}

fn default_playlist_max_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_playlist_redirects() -> usize {
    5
}

fn default_probe_interval() -> u64 {
    30
}

fn default_logo_concurrency() -> usize {
    8
}

fn default_logo_timeout() -> u64 {
    6
}

fn default_logo_max_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_logo_redirects() -> usize {
    3
}

fn default_thumb_width() -> u32 {
    52
}

fn default_thumb_height() -> u32 {
    42
}

fn default_debounce_ms() -> u64 {
    150
}

fn default_search_debounce_ms() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    3
}

fn default_hwdec() -> String {
    "auto".to_string()
}

fn default_cache_secs() -> u64 {
    10
}

fn default_network_timeout() -> u64 {
    15
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

impl PlaylistConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LogoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PlaybackConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// Writes a default file on first run.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
