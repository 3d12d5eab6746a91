//! Browser launch flags and executable discovery.
//!
//! The flag set trades sandboxing and scheduling niceties for
//! determinism: compositor stages run to completion before draw,
//! threaded animation/scrolling are off, and frame production is put
//! under `beginFrame` control unless the compatible render mode is on.

use std::path::{Path, PathBuf};

use webreel_common::EngineConfig;

/// Flags independent of render mode.
const BASE_FLAGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-threaded-animation",
    "--disable-threaded-scrolling",
    "--deterministic-mode",
    "--run-all-compositor-stages-before-draw",
    "--disable-checker-imaging",
    "--disable-image-animation-resync",
    "--disable-new-content-rendering-timeout",
    "--disable-features=RendererCodeIntegrity",
    "--disable-frame-rate-limit",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-breakpad",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-sync",
    "--no-first-run",
    "--mute-audio",
    "--hide-scrollbars",
    "--autoplay-policy=no-user-gesture-required",
];

/// Flags enabling on-demand frame production; dropped in compatible
/// render mode where `beginFrame` is unreliable.
const BEGIN_FRAME_FLAGS: &[&str] = &["--enable-begin-frame-control"];

/// The launch argument list for a capture browser.
pub fn launch_args(config: &EngineConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = BASE_FLAGS.iter().map(|f| f.to_string()).collect();

    if !config.compatible_render_mode {
        args.extend(BEGIN_FRAME_FLAGS.iter().map(|f| f.to_string()));
    }

    if config.gpu {
        args.push("--use-angle".to_string());
        args.push("--enable-gpu-rasterization".to_string());
    } else {
        args.push("--disable-gpu".to_string());
    }

    // Renderer process model: one process on Linux for determinism,
    // one per tab on Windows where single-process is unstable.
    if cfg!(target_os = "linux") {
        args.push("--single-process".to_string());
    } else if cfg!(target_os = "windows") {
        args.push("--process-per-tab".to_string());
    }

    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args
}

/// Well-known Chromium/Chrome executable locations per platform.
const LINUX_CANDIDATES: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
];
const MAC_CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];
const WINDOWS_CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

/// Find a browser executable: explicit config, `WEBREEL_BROWSER_PATH`,
/// then well-known locations.
pub fn find_browser(config: &EngineConfig) -> Option<PathBuf> {
    if let Some(path) = &config.browser_path {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var("WEBREEL_BROWSER_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        MAC_CANDIDATES
    } else if cfg!(target_os = "windows") {
        WINDOWS_CANDIDATES
    } else {
        LINUX_CANDIDATES
    };
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_mode_carries_begin_frame_control() {
        let config = EngineConfig::default();
        let args = launch_args(&config, Path::new("/tmp/webreel/browser"));
        assert!(args.contains(&"--enable-begin-frame-control".to_string()));
        assert!(args.contains(&"--deterministic-mode".to_string()));
        assert!(args.contains(&"--run-all-compositor-stages-before-draw".to_string()));
        assert!(args.contains(&"--use-angle".to_string()));
        assert!(args
            .iter()
            .any(|a| a == "--user-data-dir=/tmp/webreel/browser"));
    }

    #[test]
    fn compatible_mode_drops_begin_frame_flags() {
        let config = EngineConfig {
            compatible_render_mode: true,
            ..Default::default()
        };
        let args = launch_args(&config, Path::new("/tmp/b"));
        assert!(!args.iter().any(|a| a.contains("begin-frame")));
        // Determinism flags stay regardless of render mode.
        assert!(args.contains(&"--disable-threaded-animation".to_string()));
    }

    #[test]
    fn gpu_toggle_switches_angle_for_disable_gpu() {
        let config = EngineConfig {
            gpu: false,
            ..Default::default()
        };
        let args = launch_args(&config, Path::new("/tmp/b"));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(!args.contains(&"--use-angle".to_string()));
    }

    #[test]
    fn explicit_browser_path_wins_discovery() {
        let config = EngineConfig {
            browser_path: Some(PathBuf::from("/opt/custom/chrome")),
            ..Default::default()
        };
        assert_eq!(
            find_browser(&config),
            Some(PathBuf::from("/opt/custom/chrome"))
        );
    }
}
