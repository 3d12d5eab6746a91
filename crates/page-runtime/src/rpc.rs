//! The page ↔ host RPC surface.
//!
//! Host functions are exposed through one `Runtime.addBinding` channel:
//! the page serializes `{seq, name, payload}` into the binding, the
//! host dispatches on `name` and resolves the page-side promise by
//! evaluating `____resolveHost(seq, result)`. Bindings that return
//! nothing are still acknowledged so the page can await ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webreel_common::{WebreelError, WebreelResult};
use webreel_model::AudioDescriptor;

/// Name of the single CDP binding every host call goes through.
pub const BINDING_NAME: &str = "____webreelBinding";

/// Intercepted preprocess endpoint.
pub const PREPROCESS_PATH: &str = "/api/video_preprocess";

/// Intercepted local-font path prefix.
pub const LOCAL_FONT_PREFIX: &str = "/local_font/";

/// The host functions callable from page code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFunction {
    CaptureFrame,
    SkipFrame,
    ScreencastCompleted,
    AddAudio,
    UpdateAudioEndTime,
    SeekCssAnimations,
    SeekTimeActions,
    ThrowError,
}

impl HostFunction {
    pub fn name(self) -> &'static str {
        match self {
            HostFunction::CaptureFrame => "captureFrame",
            HostFunction::SkipFrame => "skipFrame",
            HostFunction::ScreencastCompleted => "screencastCompleted",
            HostFunction::AddAudio => "addAudio",
            HostFunction::UpdateAudioEndTime => "updateAudioEndTime",
            HostFunction::SeekCssAnimations => "seekCSSAnimations",
            HostFunction::SeekTimeActions => "seekTimeActions",
            HostFunction::ThrowError => "throwError",
        }
    }

    pub fn parse(name: &str) -> WebreelResult<Self> {
        Ok(match name {
            "captureFrame" => HostFunction::CaptureFrame,
            "skipFrame" => HostFunction::SkipFrame,
            "screencastCompleted" => HostFunction::ScreencastCompleted,
            "addAudio" => HostFunction::AddAudio,
            "updateAudioEndTime" => HostFunction::UpdateAudioEndTime,
            "seekCSSAnimations" => HostFunction::SeekCssAnimations,
            "seekTimeActions" => HostFunction::SeekTimeActions,
            "throwError" => HostFunction::ThrowError,
            other => {
                return Err(WebreelError::page(format!(
                    "page invoked unknown host function '{other}'"
                )))
            }
        })
    }
}

/// Envelope the page serializes into the CDP binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingMessage {
    pub seq: u64,
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of `updateAudioEndTime`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAudioEndTime {
    pub id: u64,
    pub end_time: f64,
}

/// Payload of `throwError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageThrownError {
    pub code: i64,
    pub message: String,
}

/// Element configuration POSTed by a VideoCanvas to
/// `/api/video_preprocess`. Field names mirror the element attribute
/// vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    pub url: String,

    /// Alpha track source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_url: Option<String>,

    /// Timeline placement, milliseconds.
    #[serde(default)]
    pub start_time: f64,
    #[serde(default = "default_end_time")]
    pub end_time: f64,

    /// Source clip, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_end: Option<f64>,

    #[serde(default, rename = "loop")]
    pub loop_: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out_duration: Option<f64>,

    /// Download retry count.
    #[serde(default = "default_retry_fetchs")]
    pub retry_fetchs: u32,

    /// Skip the preprocessor cache for this source.
    #[serde(default)]
    pub ignore_cache: bool,
}

fn default_end_time() -> f64 {
    f64::INFINITY
}
fn default_volume() -> f64 {
    100.0
}
fn default_retry_fetchs() -> u32 {
    2
}

impl VideoConfig {
    pub fn validate(&self) -> WebreelResult<()> {
        if self.url.is_empty() {
            return Err(WebreelError::preprocess("video config has an empty url"));
        }
        if let (Some(s), Some(e)) = (self.seek_start, self.seek_end) {
            if s > e {
                return Err(WebreelError::preprocess(format!(
                    "seekStart {s} exceeds seekEnd {e} for {}",
                    self.url
                )));
            }
        }
        if self.start_time > self.end_time {
            return Err(WebreelError::preprocess(format!(
                "startTime {} exceeds endTime {} for {}",
                self.start_time, self.end_time, self.url
            )));
        }
        Ok(())
    }

    /// Audio descriptor for this element's demuxed track, if audio
    /// survives preprocessing.
    pub fn audio_descriptor(&self, id: u64, audio_path: String) -> AudioDescriptor {
        AudioDescriptor {
            id,
            source: audio_path,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: None,
            loop_: self.loop_,
            volume: self.volume,
            seek_start: self.seek_start,
            seek_end: self.seek_end,
            fade_in_duration: self.fade_in_duration,
            fade_out_duration: self.fade_out_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_message_parses_minimal_envelope() {
        let msg: BindingMessage =
            serde_json::from_str(r#"{"seq":7,"name":"skipFrame"}"#).unwrap();
        assert_eq!(msg.seq, 7);
        assert_eq!(
            HostFunction::parse(&msg.name).unwrap(),
            HostFunction::SkipFrame
        );
        assert!(msg.payload.is_null());
    }

    #[test]
    fn host_function_names_round_trip() {
        for f in [
            HostFunction::CaptureFrame,
            HostFunction::SeekCssAnimations,
            HostFunction::UpdateAudioEndTime,
            HostFunction::ThrowError,
        ] {
            assert_eq!(HostFunction::parse(f.name()).unwrap(), f);
        }
        assert!(HostFunction::parse("nope").is_err());
    }

    #[test]
    fn video_config_defaults_fill_in() {
        let cfg: VideoConfig =
            serde_json::from_str(r#"{"url":"https://a.test/v.mp4"}"#).unwrap();
        assert_eq!(cfg.end_time, f64::INFINITY);
        assert_eq!(cfg.volume, 100.0);
        assert_eq!(cfg.retry_fetchs, 2);
        assert!(!cfg.loop_);
        cfg.validate().unwrap();
    }

    #[test]
    fn video_config_rejects_inverted_seek_range() {
        let cfg: VideoConfig = serde_json::from_str(
            r#"{"url":"https://a.test/v.mp4","seekStart":5000,"seekEnd":1000}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn audio_descriptor_inherits_element_placement() {
        let cfg: VideoConfig = serde_json::from_str(
            r#"{"url":"https://a.test/v.mp4","startTime":1000,"endTime":6000,"volume":50}"#,
        )
        .unwrap();
        let audio = cfg.audio_descriptor(3, "/tmp/1234.mp3".into());
        assert_eq!(audio.start_time, 1000.0);
        assert_eq!(audio.end_time, 6000.0);
        assert_eq!(audio.volume, 50.0);
    }
}
