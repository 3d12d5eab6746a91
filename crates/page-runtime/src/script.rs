//! Injected script assembly.
//!
//! The page-side runtime is one script evaluated at document start: the
//! capture config, the generated selector and proxy tables, the clock
//! shim, optional vendored libraries renamed off the global namespace,
//! the media adapter, and the capture loop — in that order, since each
//! segment depends on its predecessors.

use serde::{Deserialize, Serialize};
use webreel_model::{HardwareAcceleration, RenderJob};

use crate::{proxy, selectors};

const TIME_SHIM_JS: &str = include_str!("../js/time_shim.js");
const MEDIA_ADAPTER_JS: &str = include_str!("../js/media_adapter.js");
const CAPTURE_LOOP_JS: &str = include_str!("../js/capture_loop.js");

/// Capture configuration spliced into the page as
/// `window.____captureConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureScriptConfig {
    pub fps: u32,

    /// Virtual time at which frame emission starts, milliseconds.
    pub start_time: f64,

    /// Scene duration, milliseconds.
    pub duration: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,

    pub autostart: bool,

    /// `prefer-hardware` / `prefer-software` / `no-preference`.
    pub video_decoder_hardware_acceleration: String,

    pub date_now_epsilon: bool,

    /// Wall-clock epoch anchoring the virtual Date, ms since Unix epoch.
    pub start_time_wall: f64,
}

impl CaptureScriptConfig {
    pub fn from_job(job: &RenderJob, start_time_wall: f64) -> Self {
        let accel = match job.video_decoder_hardware_acceleration {
            HardwareAcceleration::NoPreference => "no-preference",
            HardwareAcceleration::PreferHardware => "prefer-hardware",
            HardwareAcceleration::PreferSoftware => "prefer-software",
        };
        Self {
            fps: job.fps,
            start_time: job.start_time_ms,
            duration: job.duration_ms,
            frame_count: Some(job.frame_count()),
            autostart: job.autostart,
            video_decoder_hardware_acceleration: accel.to_string(),
            date_now_epsilon: job.date_now_epsilon,
            start_time_wall,
        }
    }
}

/// A vendored page library, renamed off the public global namespace so
/// page code cannot observe it.
#[derive(Debug, Clone)]
pub struct VendorLibrary {
    /// Global the library installs itself under (e.g. `MP4Box`).
    pub public_global: String,
    /// Reserved name it is moved to (e.g. `____MP4Box`).
    pub reserved_global: String,
    pub source: String,
}

impl VendorLibrary {
    pub fn new(public_global: &str, source: String) -> Self {
        Self {
            public_global: public_global.to_string(),
            reserved_global: format!("____{public_global}"),
            source,
        }
    }
}

/// Assembles the complete injected bundle.
#[derive(Debug, Clone)]
pub struct ScriptBundle {
    config: CaptureScriptConfig,
    libraries: Vec<VendorLibrary>,
}

impl ScriptBundle {
    pub fn new(config: CaptureScriptConfig) -> Self {
        Self {
            config,
            libraries: Vec::new(),
        }
    }

    pub fn with_library(mut self, library: VendorLibrary) -> Self {
        self.libraries.push(library);
        self
    }

    /// The full script, in dependency order.
    pub fn build(&self) -> String {
        let config_json = serde_json::to_string(&self.config)
            .expect("capture config has no non-serializable fields");

        let mut out = String::new();
        out.push_str(&format!("window.____captureConfig = {config_json};\n"));
        out.push_str(&selectors::to_js());
        out.push_str(&proxy::to_js());
        out.push_str(TIME_SHIM_JS);
        for lib in &self.libraries {
            out.push_str(&wrap_library(lib));
        }
        out.push_str(MEDIA_ADAPTER_JS);
        out.push_str(CAPTURE_LOOP_JS);
        out
    }
}

/// Run the library source, then move its global under the reserved name
/// and remove the public one.
fn wrap_library(lib: &VendorLibrary) -> String {
    format!(
        "(() => {{\n{src}\n}})();\n\
         window.{reserved} = window.{public};\n\
         try {{ delete window.{public}; }} catch (e) {{ window.{public} = undefined; }}\n",
        src = lib.source,
        reserved = lib.reserved_global,
        public = lib.public_global,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use webreel_model::{OutputFormat, PageSource, ScreenshotFormat};

    fn config() -> CaptureScriptConfig {
        CaptureScriptConfig {
            fps: 30,
            start_time: 0.0,
            duration: 10_000.0,
            frame_count: Some(300),
            autostart: true,
            video_decoder_hardware_acceleration: "prefer-hardware".into(),
            date_now_epsilon: true,
            start_time_wall: 1_700_000_000_000.0,
        }
    }

    #[test]
    fn bundle_orders_config_tables_then_segments() {
        let script = ScriptBundle::new(config()).build();
        let config_at = script.find("window.____captureConfig").unwrap();
        let selectors_at = script.find("window.____mediaSelectors").unwrap();
        let proxy_at = script.find("window.____proxyProperties").unwrap();
        let shim_at = script.find("____timeShimInstalled").unwrap();
        let adapter_at = script.find("____mediaAdapterInstalled").unwrap();
        let loop_at = script.find("window.____captureCtx").unwrap();
        assert!(config_at < selectors_at);
        assert!(selectors_at < proxy_at);
        assert!(proxy_at < shim_at);
        assert!(shim_at < adapter_at);
        assert!(adapter_at < loop_at);
    }

    #[test]
    fn config_splices_as_camel_case_json() {
        let script = ScriptBundle::new(config()).build();
        assert!(script.contains("\"frameCount\":300"));
        assert!(script.contains("\"dateNowEpsilon\":true"));
        assert!(script.contains("\"videoDecoderHardwareAcceleration\":\"prefer-hardware\""));
    }

    #[test]
    fn libraries_are_renamed_off_the_global_namespace() {
        let script = ScriptBundle::new(config())
            .with_library(VendorLibrary::new("MP4Box", "/* lib */".into()))
            .build();
        assert!(script.contains("window.____MP4Box = window.MP4Box;"));
        assert!(script.contains("delete window.MP4Box"));
        // Libraries land after the shim and before the adapter.
        let shim_at = script.find("____timeShimInstalled").unwrap();
        let lib_at = script.find("window.____MP4Box = ").unwrap();
        let adapter_at = script.find("____mediaAdapterInstalled").unwrap();
        assert!(shim_at < lib_at && lib_at < adapter_at);
    }

    #[test]
    fn from_job_derives_frame_count_from_duration() {
        let job = RenderJob {
            source: PageSource::Url("https://example.com".into()),
            output_path: PathBuf::from("/tmp/out.mp4"),
            width: 1280,
            height: 720,
            fps: 30,
            duration_ms: 10_000.0,
            frame_count: None,
            start_time_ms: 500.0,
            format: OutputFormat::Mp4,
            video_encoder: None,
            audio_encoder: None,
            quality: 80,
            video_bitrate_kbps: None,
            pixel_format: None,
            background_opacity: 1.0,
            video_volume: 100.0,
            attach_cover_path: None,
            screenshot_format: ScreenshotFormat::Jpeg,
            screenshot_quality: 80,
            video_decoder_hardware_acceleration:
                webreel_model::HardwareAcceleration::PreferHardware,
            autostart: true,
            allow_unsafe_context: false,
            date_now_epsilon: true,
        };
        let cfg = CaptureScriptConfig::from_job(&job, 0.0);
        assert_eq!(cfg.frame_count, Some(300));
        assert_eq!(cfg.start_time, 500.0);
    }
}
