//! Output containers and the encoder vocabulary.

use serde::{Deserialize, Serialize};
use webreel_common::{WebreelError, WebreelResult};

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// MP4 carrying H.264/H.265.
    Mp4,
    /// WebM carrying VP8/VP9, optionally with alpha.
    Webm,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    /// Default video encoder for the container.
    pub fn default_video_encoder(self) -> VideoEncoder {
        match self {
            OutputFormat::Mp4 => VideoEncoder::Libx264,
            OutputFormat::Webm => VideoEncoder::LibvpxVp9,
        }
    }

    /// Default audio encoder for the container.
    pub fn default_audio_encoder(self) -> AudioEncoder {
        match self {
            OutputFormat::Mp4 => AudioEncoder::Aac,
            OutputFormat::Webm => AudioEncoder::LibOpus,
        }
    }

    pub fn parse(s: &str) -> WebreelResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            other => Err(WebreelError::config(format!(
                "unknown output format '{other}' (expected mp4 or webm)"
            ))),
        }
    }
}

/// Codec family an encoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    H264,
    H265,
    Vp8,
    Vp9,
}

/// Pixel format of the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    /// WebM with alpha.
    Yuva420p,
}

impl PixelFormat {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuva420p => "yuva420p",
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Yuva420p)
    }
}

/// The complete video encoder vocabulary.
///
/// CPU encoders plus every supported hardware family (Intel QSV, AMD
/// AMF, NVIDIA NVENC, OpenMAX, V4L2 M2M, VAAPI, Apple VideoToolbox).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoEncoder {
    #[serde(rename = "libx264")]
    Libx264,
    #[serde(rename = "libx265")]
    Libx265,
    #[serde(rename = "libvpx")]
    Libvpx,
    #[serde(rename = "libvpx-vp9")]
    LibvpxVp9,
    #[serde(rename = "h264_qsv")]
    H264Qsv,
    #[serde(rename = "hevc_qsv")]
    HevcQsv,
    #[serde(rename = "vp8_qsv")]
    Vp8Qsv,
    #[serde(rename = "vp9_qsv")]
    Vp9Qsv,
    #[serde(rename = "h264_amf")]
    H264Amf,
    #[serde(rename = "h265_amf")]
    H265Amf,
    #[serde(rename = "h264_nvenc")]
    H264Nvenc,
    #[serde(rename = "hevc_nvenc")]
    HevcNvenc,
    #[serde(rename = "h264_omx")]
    H264Omx,
    #[serde(rename = "h264_v4l2m2m")]
    H264V4l2m2m,
    #[serde(rename = "h264_vaapi")]
    H264Vaapi,
    #[serde(rename = "hevc_vaapi")]
    HevcVaapi,
    #[serde(rename = "vp8_vaapi")]
    Vp8Vaapi,
    #[serde(rename = "vp9_vaapi")]
    Vp9Vaapi,
    #[serde(rename = "h264_videotoolbox")]
    H264VideoToolbox,
    #[serde(rename = "hevc_videotoolbox")]
    HevcVideoToolbox,
}

impl VideoEncoder {
    /// The ffmpeg `-c:v` token.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            VideoEncoder::Libx264 => "libx264",
            VideoEncoder::Libx265 => "libx265",
            VideoEncoder::Libvpx => "libvpx",
            VideoEncoder::LibvpxVp9 => "libvpx-vp9",
            VideoEncoder::H264Qsv => "h264_qsv",
            VideoEncoder::HevcQsv => "hevc_qsv",
            VideoEncoder::Vp8Qsv => "vp8_qsv",
            VideoEncoder::Vp9Qsv => "vp9_qsv",
            VideoEncoder::H264Amf => "h264_amf",
            VideoEncoder::H265Amf => "h265_amf",
            VideoEncoder::H264Nvenc => "h264_nvenc",
            VideoEncoder::HevcNvenc => "hevc_nvenc",
            VideoEncoder::H264Omx => "h264_omx",
            VideoEncoder::H264V4l2m2m => "h264_v4l2m2m",
            VideoEncoder::H264Vaapi => "h264_vaapi",
            VideoEncoder::HevcVaapi => "hevc_vaapi",
            VideoEncoder::Vp8Vaapi => "vp8_vaapi",
            VideoEncoder::Vp9Vaapi => "vp9_vaapi",
            VideoEncoder::H264VideoToolbox => "h264_videotoolbox",
            VideoEncoder::HevcVideoToolbox => "hevc_videotoolbox",
        }
    }

    pub fn family(self) -> CodecFamily {
        match self {
            VideoEncoder::Libx264
            | VideoEncoder::H264Qsv
            | VideoEncoder::H264Amf
            | VideoEncoder::H264Nvenc
            | VideoEncoder::H264Omx
            | VideoEncoder::H264V4l2m2m
            | VideoEncoder::H264Vaapi
            | VideoEncoder::H264VideoToolbox => CodecFamily::H264,
            VideoEncoder::Libx265
            | VideoEncoder::HevcQsv
            | VideoEncoder::H265Amf
            | VideoEncoder::HevcNvenc
            | VideoEncoder::HevcVaapi
            | VideoEncoder::HevcVideoToolbox => CodecFamily::H265,
            VideoEncoder::Libvpx | VideoEncoder::Vp8Qsv | VideoEncoder::Vp8Vaapi => {
                CodecFamily::Vp8
            }
            VideoEncoder::LibvpxVp9 | VideoEncoder::Vp9Qsv | VideoEncoder::Vp9Vaapi => {
                CodecFamily::Vp9
            }
        }
    }

    /// Bitstream filter applied when writing a chunk intermediate to
    /// MPEG-TS. VP8 chunks are not supported.
    pub fn chunk_bitstream_filter(self) -> Option<&'static str> {
        match self.family() {
            CodecFamily::H264 => Some("h264_mp4toannexb"),
            CodecFamily::H265 => Some("hevc_mp4toannexb"),
            CodecFamily::Vp9 => Some("vp9_superframe"),
            CodecFamily::Vp8 => None,
        }
    }

    /// Whether the encoder may be used for chunked multi-scene renders.
    pub fn chunk_eligible(self) -> bool {
        self.chunk_bitstream_filter().is_some()
    }

    /// Whether the encoder matches the container (H.264/H.265 in MP4,
    /// VP8/VP9 in WebM).
    pub fn supports_format(self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Mp4 => matches!(self.family(), CodecFamily::H264 | CodecFamily::H265),
            OutputFormat::Webm => matches!(self.family(), CodecFamily::Vp8 | CodecFamily::Vp9),
        }
    }

    /// H.264/H.265 take a profile and preset; hardware and VPx encoders
    /// do not accept the x264-style options uniformly.
    pub fn takes_profile_preset(self) -> bool {
        matches!(self, VideoEncoder::Libx264 | VideoEncoder::Libx265)
    }
}

/// Audio encoder vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioEncoder {
    #[serde(rename = "aac")]
    Aac,
    #[serde(rename = "libopus")]
    LibOpus,
}

impl AudioEncoder {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            AudioEncoder::Aac => "aac",
            AudioEncoder::LibOpus => "libopus",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_tokens_round_trip_through_serde() {
        for enc in [
            VideoEncoder::Libx264,
            VideoEncoder::LibvpxVp9,
            VideoEncoder::HevcNvenc,
            VideoEncoder::H264V4l2m2m,
            VideoEncoder::HevcVideoToolbox,
        ] {
            let json = serde_json::to_string(&enc).unwrap();
            assert_eq!(json, format!("\"{}\"", enc.ffmpeg_name()));
            let back: VideoEncoder = serde_json::from_str(&json).unwrap();
            assert_eq!(back, enc);
        }
    }

    #[test]
    fn chunk_filters_follow_codec_family() {
        assert_eq!(
            VideoEncoder::H264Nvenc.chunk_bitstream_filter(),
            Some("h264_mp4toannexb")
        );
        assert_eq!(
            VideoEncoder::HevcQsv.chunk_bitstream_filter(),
            Some("hevc_mp4toannexb")
        );
        assert_eq!(
            VideoEncoder::LibvpxVp9.chunk_bitstream_filter(),
            Some("vp9_superframe")
        );
        assert_eq!(VideoEncoder::Libvpx.chunk_bitstream_filter(), None);
        assert!(!VideoEncoder::Vp8Vaapi.chunk_eligible());
    }

    #[test]
    fn format_defaults_pair_container_and_codec() {
        assert!(OutputFormat::Mp4
            .default_video_encoder()
            .supports_format(OutputFormat::Mp4));
        assert!(OutputFormat::Webm
            .default_video_encoder()
            .supports_format(OutputFormat::Webm));
        assert!(!VideoEncoder::Libx264.supports_format(OutputFormat::Webm));
        assert_eq!(
            OutputFormat::Webm.default_audio_encoder(),
            AudioEncoder::LibOpus
        );
    }
}
