//! Engine configuration.
//!
//! One `EngineConfig` is loaded (or defaulted) at startup and passed by
//! value into the resource pool constructor. Nothing reads it through a
//! global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the on-disk working tree (browser profile, preprocessor
    /// cache, chunk intermediates, fonts).
    pub workdir: PathBuf,

    /// Browser pool bounds.
    pub pool: PoolConfig,

    /// Capture timeouts.
    pub timeouts: TimeoutConfig,

    /// Whether the GPU is enabled for the browser (ANGLE).
    pub gpu: bool,

    /// Compatible rendering mode: `Page.captureScreenshot` instead of
    /// `HeadlessExperimental.beginFrame`. For platforms where
    /// beginFrame is unreliable.
    pub compatible_render_mode: bool,

    /// Explicit browser executable; discovered on PATH when unset.
    pub browser_path: Option<PathBuf>,

    /// Frames buffered host-side before one batched pipe write.
    pub parallel_write_frames: usize,

    /// Preprocessor download/transcode concurrency.
    pub num_downloads: usize,
    pub num_processes: usize,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Two-tier pool bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    pub num_browser_min: usize,
    pub num_browser_max: usize,
    pub num_page_min: usize,
    pub num_page_max: usize,
}

/// Timeouts, all in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Ceiling on one `beginFrame` round trip.
    pub frame_ms: u64,

    /// Ceiling on browser process launch.
    pub launch_ms: u64,

    /// Ceiling on a preprocessor demux/transcode pass.
    pub demux_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "webreel=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            pool: PoolConfig::default(),
            timeouts: TimeoutConfig::default(),
            gpu: true,
            compatible_render_mode: false,
            browser_path: None,
            parallel_write_frames: 10,
            num_downloads: 10,
            num_processes: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_browser_min: 1,
            num_browser_max: 5,
            num_page_min: 1,
            num_page_max: 5,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            frame_ms: 5_000,
            launch_ms: 30_000,
            demux_ms: 60_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("webreel").join("config.json")
}

/// Default working tree root, overridable with `WEBREEL_WORKDIR`.
fn default_workdir() -> PathBuf {
    std::env::var("WEBREEL_WORKDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("webreel"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.pool.num_browser_max >= config.pool.num_browser_min);
        assert!(config.pool.num_page_max >= config.pool.num_page_min);
        assert_eq!(config.timeouts.frame_ms, 5_000);
        assert_eq!(config.parallel_write_frames, 10);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_downloads, config.num_downloads);
        assert_eq!(back.timeouts.demux_ms, config.timeouts.demux_ms);
    }
}
