//! Per-scene render configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use webreel_common::{timebase, WebreelError, WebreelResult};

use crate::{AudioEncoder, OutputFormat, PixelFormat, VideoEncoder};

/// What the page is loaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    /// Navigate to a URL.
    Url(String),
    /// Set raw HTML content on a blank tab.
    Html(String),
}

/// Screenshot format requested from the renderer per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Jpeg,
    Png,
}

/// Hardware-acceleration preference forwarded to the in-page
/// VideoDecoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

/// Configuration for rendering one page into one video (or one chunk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub source: PageSource,
    pub output_path: PathBuf,

    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Scene length, milliseconds.
    pub duration_ms: f64,

    /// Frames to emit; derived from the duration when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,

    /// Virtual time at which frame emission begins. Ticks before this
    /// advance rendering but are skipped by the encoder.
    #[serde(default)]
    pub start_time_ms: f64,

    pub format: OutputFormat,

    /// Defaults to the container's CPU encoder when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_encoder: Option<VideoEncoder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_encoder: Option<AudioEncoder>,

    /// Encoder quality 0..=100, used for the default bitrate formula.
    #[serde(default = "default_quality")]
    pub quality: u32,

    /// Explicit video bitrate in kbps; derived from quality when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<PixelFormat>,

    /// Page background opacity, 0..=1. Anything below 1 forces PNG
    /// screenshots so alpha survives capture.
    #[serde(default = "default_opacity")]
    pub background_opacity: f64,

    /// Master volume applied over every audio track, 0..=100.
    #[serde(default = "default_volume")]
    pub video_volume: f64,

    /// Image overlaid on the final output, scaled to WxH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach_cover_path: Option<PathBuf>,

    #[serde(default = "default_screenshot_format")]
    pub screenshot_format: ScreenshotFormat,

    /// JPEG quality for screenshots, 0..=100.
    #[serde(default = "default_screenshot_quality")]
    pub screenshot_quality: u32,

    #[serde(default = "default_hw_accel")]
    pub video_decoder_hardware_acceleration: HardwareAcceleration,

    /// Start the capture loop without waiting for a page-side
    /// `captureCtx.start()`.
    #[serde(default = "default_true")]
    pub autostart: bool,

    /// Permit non-HTTPS, non-loopback navigation targets.
    #[serde(default)]
    pub allow_unsafe_context: bool,

    /// Keep the `Date.now` strictly-increasing epsilon shim enabled.
    #[serde(default = "default_true")]
    pub date_now_epsilon: bool,
}

fn default_quality() -> u32 {
    80
}
fn default_opacity() -> f64 {
    1.0
}
fn default_volume() -> f64 {
    100.0
}
fn default_screenshot_format() -> ScreenshotFormat {
    ScreenshotFormat::Jpeg
}
fn default_screenshot_quality() -> u32 {
    80
}
fn default_hw_accel() -> HardwareAcceleration {
    HardwareAcceleration::PreferHardware
}
fn default_true() -> bool {
    true
}

impl RenderJob {
    /// Effective video encoder.
    pub fn video_encoder(&self) -> VideoEncoder {
        self.video_encoder
            .unwrap_or_else(|| self.format.default_video_encoder())
    }

    /// Effective audio encoder.
    pub fn audio_encoder(&self) -> AudioEncoder {
        self.audio_encoder
            .unwrap_or_else(|| self.format.default_audio_encoder())
    }

    /// Effective pixel format: yuva420p only for WebM with a
    /// translucent background.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format.unwrap_or({
            if self.format == OutputFormat::Webm && self.background_opacity < 1.0 {
                PixelFormat::Yuva420p
            } else {
                PixelFormat::Yuv420p
            }
        })
    }

    /// Frames to emit: explicit count, else `floor(duration*fps/1000)`.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
            .unwrap_or_else(|| timebase::frame_count(self.duration_ms, self.fps))
    }

    /// A translucent background needs PNG frames regardless of the
    /// configured screenshot format.
    pub fn effective_screenshot_format(&self) -> ScreenshotFormat {
        if self.background_opacity < 1.0 {
            ScreenshotFormat::Png
        } else {
            self.screenshot_format
        }
    }

    pub fn validate(&self) -> WebreelResult<()> {
        if self.fps == 0 || self.fps > 240 {
            return Err(WebreelError::config(format!(
                "fps {} outside 1..=240",
                self.fps
            )));
        }
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(WebreelError::config(format!(
                "duration {}ms is not a positive finite number",
                self.duration_ms
            )));
        }
        if let Some(count) = self.frame_count {
            if count == 0 {
                return Err(WebreelError::config("frameCount must be at least 1"));
            }
        }
        if self.width == 0 || self.height == 0 {
            return Err(WebreelError::config("width/height must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            // yuv420p subsamples chroma 2x2.
            return Err(WebreelError::config(format!(
                "dimensions {}x{} must be even for {} output",
                self.width,
                self.height,
                self.pixel_format().ffmpeg_name()
            )));
        }
        if !self.video_encoder().supports_format(self.format) {
            return Err(WebreelError::config(format!(
                "encoder {} does not produce {} output",
                self.video_encoder().ffmpeg_name(),
                self.format.extension()
            )));
        }
        if self.pixel_format().has_alpha() && self.format != OutputFormat::Webm {
            return Err(WebreelError::config(
                "alpha output requires the webm container",
            ));
        }
        if !(0.0..=1.0).contains(&self.background_opacity) {
            return Err(WebreelError::config(format!(
                "background opacity {} outside 0..=1",
                self.background_opacity
            )));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(WebreelError::config(format!(
                "quality {} outside 1..=100",
                self.quality
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RenderJob {
        RenderJob {
            source: PageSource::Url("https://example.com".into()),
            output_path: PathBuf::from("/tmp/out.mp4"),
            width: 1280,
            height: 720,
            fps: 30,
            duration_ms: 10_000.0,
            frame_count: None,
            start_time_ms: 0.0,
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
            video_decoder_hardware_acceleration: HardwareAcceleration::PreferHardware,
            autostart: true,
            allow_unsafe_context: false,
            date_now_epsilon: true,
        }
    }

    #[test]
    fn frame_count_derives_from_duration() {
        assert_eq!(job().frame_count(), 300);
        let mut j = job();
        j.frame_count = Some(42);
        assert_eq!(j.frame_count(), 42);
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let mut j = job();
        j.width = 1279;
        assert!(j.validate().is_err());
    }

    #[test]
    fn non_finite_duration_is_rejected() {
        let mut j = job();
        j.duration_ms = f64::NAN;
        assert!(j.validate().is_err());
        j.duration_ms = f64::INFINITY;
        assert!(j.validate().is_err());
    }

    #[test]
    fn encoder_container_mismatch_is_rejected() {
        let mut j = job();
        j.video_encoder = Some(VideoEncoder::LibvpxVp9);
        assert!(j.validate().is_err());
    }

    #[test]
    fn translucent_background_forces_png() {
        let mut j = job();
        j.background_opacity = 0.5;
        j.format = OutputFormat::Webm;
        j.video_encoder = None;
        assert_eq!(j.effective_screenshot_format(), ScreenshotFormat::Png);
        assert_eq!(j.pixel_format(), PixelFormat::Yuva420p);
    }

    #[test]
    fn opaque_mp4_defaults_are_plain() {
        let j = job();
        assert_eq!(j.effective_screenshot_format(), ScreenshotFormat::Jpeg);
        assert_eq!(j.pixel_format(), PixelFormat::Yuv420p);
        assert_eq!(j.video_encoder(), VideoEncoder::Libx264);
        assert_eq!(j.audio_encoder(), AudioEncoder::Aac);
        j.validate().unwrap();
    }
}
