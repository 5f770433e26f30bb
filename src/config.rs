use std::path::PathBuf;
use std::time::Duration;

use crate::keys::SHORTCUT_SLOTS;

pub const DEFAULT_API_URL: &str = "http://localhost:4000";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024; // 1 MB
pub const DEFAULT_MAX_DURATION_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Which sounds get their audio resolved ahead of the first key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadPolicy {
    None,
    /// Only the sounds reachable from keyboard shortcuts.
    Shortcuts,
    All,
}

impl PreloadPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" | "off" | "0" | "false" => Some(PreloadPolicy::None),
            "shortcuts" | "keys" => Some(PreloadPolicy::Shortcuts),
            "all" => Some(PreloadPolicy::All),
            _ => None,
        }
    }

    /// Number of leading list entries to preload for a list of `len` sounds.
    pub fn limit(self, len: usize) -> usize {
        match self {
            PreloadPolicy::None => 0,
            PreloadPolicy::Shortcuts => len.min(SHORTCUT_SLOTS),
            PreloadPolicy::All => len,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub session_file: PathBuf,
    pub max_upload_bytes: u64,
    pub max_duration_secs: u64,
    pub request_timeout: Duration,
    pub preload: PreloadPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        let api_url = std::env::var("SOUNDBOARD_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let session_file = std::env::var("SOUNDBOARD_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_session_file());

        let preload = std::env::var("SOUNDBOARD_PRELOAD")
            .ok()
            .and_then(|v| PreloadPolicy::parse(&v))
            .unwrap_or(PreloadPolicy::Shortcuts);

        Self {
            api_url: normalize_api_url(&api_url),
            session_file,
            max_upload_bytes: env_u64("SOUNDBOARD_MAX_UPLOAD_BYTES")
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_duration_secs: env_u64("SOUNDBOARD_MAX_DURATION_SECS")
                .unwrap_or(DEFAULT_MAX_DURATION_SECS),
            request_timeout: Duration::from_secs(
                env_u64("SOUNDBOARD_REQUEST_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            preload,
        }
    }

    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = normalize_api_url(url);
        self
    }

    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.session_file = path;
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
}

fn normalize_api_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn default_session_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("soundboard")
        .join("session.json")
}
