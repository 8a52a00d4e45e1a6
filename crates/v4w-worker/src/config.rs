//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::warn;
use v4w_media::{TranscoderLocator, DEFAULT_VIDEO_EXTENSIONS};
use v4w_models::{CompressionLevel, VideoSettings, SCALE_WIDTHS};

/// Default broadcast buffer for status events.
const DEFAULT_STATUS_EVENT_CAPACITY: usize = 256;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs running at once
    pub max_concurrent_jobs: usize,
    /// Explicit transcoder executable
    pub transcoder_path: Option<PathBuf>,
    /// Directory holding bundled transcoder binaries
    pub resource_dir: Option<PathBuf>,
    /// Input extensions accepted for processing (lowercase)
    pub supported_extensions: Vec<String>,
    /// Buffer size of the status broadcast channel
    pub status_event_capacity: usize,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_concurrency(),
            transcoder_path: None,
            resource_dir: None,
            supported_extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            status_event_capacity: DEFAULT_STATUS_EVENT_CAPACITY,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("V4W_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or_else(default_concurrency),
            transcoder_path: std::env::var("V4W_FFMPEG_PATH").ok().map(PathBuf::from),
            resource_dir: std::env::var("V4W_RESOURCE_DIR").ok().map(PathBuf::from),
            supported_extensions: std::env::var("V4W_VIDEO_EXTENSIONS")
                .ok()
                .map(|s| parse_extensions(&s))
                .filter(|exts| !exts.is_empty())
                .unwrap_or_else(|| {
                    DEFAULT_VIDEO_EXTENSIONS
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
            status_event_capacity: std::env::var("V4W_STATUS_EVENT_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(DEFAULT_STATUS_EVENT_CAPACITY),
            metrics_addr: std::env::var("V4W_METRICS_ADDR")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        warn!("Ignoring V4W_METRICS_ADDR '{}': {}", s, e);
                        None
                    }
                }),
        }
    }

    /// Returns a config with the given concurrency limit (at least 1).
    pub fn with_max_concurrent_jobs(mut self, limit: usize) -> Self {
        self.max_concurrent_jobs = limit.max(1);
        self
    }

    /// Returns a config that uses `path` as the transcoder.
    pub fn with_transcoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcoder_path = Some(path.into());
        self
    }

    /// Locator honouring the configured paths.
    pub fn transcoder_locator(&self) -> TranscoderLocator {
        let mut locator = TranscoderLocator::new();
        if let Some(path) = &self.transcoder_path {
            locator = locator.with_explicit_path(path);
        }
        if let Some(dir) = &self.resource_dir {
            locator = locator.with_resource_dir(dir);
        }
        locator
    }
}

/// Half the available hardware threads, at least one.
pub fn default_concurrency() -> usize {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (threads / 2).max(1)
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|s| parse_bool(&s))
        .unwrap_or(default)
}

/// Load the preference set from environment variables.
pub fn video_settings_from_env() -> VideoSettings {
    let defaults = VideoSettings::default();
    VideoSettings {
        compression_level: std::env::var("V4W_COMPRESSION")
            .ok()
            .and_then(|s| match s.parse::<CompressionLevel>() {
                Ok(level) => Some(level),
                Err(e) => {
                    warn!("Ignoring V4W_COMPRESSION: {}", e);
                    None
                }
            })
            .unwrap_or(defaults.compression_level),
        remove_audio: env_bool("V4W_REMOVE_AUDIO", defaults.remove_audio),
        mp4_output: env_bool("V4W_OUTPUT_MP4", defaults.mp4_output),
        webm_output: env_bool("V4W_OUTPUT_WEBM", defaults.webm_output),
        scale_width: std::env::var("V4W_SCALE_WIDTH")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|w| *w > 0)
            .inspect(|w| {
                if !SCALE_WIDTHS.contains(w) {
                    warn!("V4W_SCALE_WIDTH {} is not a preset width", w);
                }
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert!(config.max_concurrent_jobs >= 1);
        assert_eq!(config.supported_extensions.len(), 6);
        assert!(config.supported_extensions.contains(&"webm".to_string()));
        assert_eq!(config.status_event_capacity, 256);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let config = WorkerConfig::default().with_max_concurrent_jobs(0);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(default_concurrency() >= 1);
    }

    #[test]
    fn test_parse_extensions() {
        assert_eq!(
            parse_extensions(" MP4, .mkv,,webm "),
            vec!["mp4".to_string(), "mkv".to_string(), "webm".to_string()]
        );
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_locator_uses_explicit_path() {
        let config = WorkerConfig::default().with_transcoder_path("/definitely/missing/ffmpeg");
        assert!(config.transcoder_locator().resolve().is_err());
    }
}
