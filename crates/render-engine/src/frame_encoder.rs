//! The frame encoder: an image pipe into ffmpeg.
//!
//! One encoder instance consumes the frame stream of one scene. Frames
//! arrive as encoded images (JPEG/PNG screenshots) and are written to
//! the subprocess stdin; up to `parallel_write_frames` frames are
//! buffered host-side and flushed as one write to keep pipe syscalls
//! down. Output is either a final container file or an MPEG-TS chunk
//! intermediate with the codec's bitstream filter applied.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use webreel_common::{WebreelError, WebreelResult};
use webreel_model::{OutputFormat, PixelFormat, VideoEncoder};

/// Windows access-violation exit code ffmpeg dies with when a hardware
/// encoder is unavailable.
const HW_CRASH_EXIT_CODE: i32 = -1073741819; // 3221225477 as i32

/// Where the encoded stream lands.
#[derive(Debug, Clone)]
pub enum EncoderOutput {
    /// Final container file.
    File {
        path: PathBuf,
        format: OutputFormat,
        /// Cover image overlaid on the video, scaled to WxH.
        cover: Option<PathBuf>,
    },
    /// MPEG-TS chunk intermediate for later splicing.
    ChunkTs { path: PathBuf },
}

/// Encoder configuration for one scene.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoder: VideoEncoder,
    pub pixel_format: PixelFormat,
    /// Explicit bitrate; derived from quality when unset.
    pub bitrate_kbps: Option<u64>,
    pub quality: u32,
    pub output: EncoderOutput,
}

impl EncoderSettings {
    /// Default bitrate: `(2560 * pixels / 921600) * (quality / 100)` kbps,
    /// i.e. 2560 kbps for a 720p frame at quality 100.
    pub fn effective_bitrate_kbps(&self) -> u64 {
        self.bitrate_kbps.unwrap_or_else(|| {
            let pixels = (self.width as f64) * (self.height as f64);
            ((2560.0 * pixels / 921_600.0) * (self.quality as f64 / 100.0)).round() as u64
        })
    }
}

/// The ffmpeg argument list for one encoder run.
pub fn encoder_args(settings: &EncoderSettings) -> WebreelResult<Vec<String>> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-r".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ];

    if let EncoderOutput::File {
        cover: Some(cover), ..
    } = &settings.output
    {
        args.push("-i".to_string());
        args.push(cover.display().to_string());
        args.push("-filter_complex".to_string());
        args.push(format!(
            "[1:v]scale={w}:{h}[cover];[0:v][cover]overlay=0:0:repeatlast=0[vout]",
            w = settings.width,
            h = settings.height
        ));
        args.push("-map".to_string());
        args.push("[vout]".to_string());
    }

    args.push("-c:v".to_string());
    args.push(settings.encoder.ffmpeg_name().to_string());

    if settings.encoder.takes_profile_preset() {
        args.push("-profile:v".to_string());
        args.push("main".to_string());
        args.push("-preset".to_string());
        args.push("medium".to_string());
    }

    args.push("-b:v".to_string());
    args.push(format!("{}k", settings.effective_bitrate_kbps()));
    args.push("-pix_fmt".to_string());
    args.push(settings.pixel_format.ffmpeg_name().to_string());

    match &settings.output {
        EncoderOutput::File { path, format, .. } => {
            if *format == OutputFormat::Mp4 {
                args.push("-movflags".to_string());
                args.push("+faststart".to_string());
            }
            args.push(path.display().to_string());
        }
        EncoderOutput::ChunkTs { path } => {
            let filter = settings.encoder.chunk_bitstream_filter().ok_or_else(|| {
                WebreelError::config(format!(
                    "encoder {} cannot emit chunk intermediates",
                    settings.encoder.ffmpeg_name()
                ))
            })?;
            args.push("-bsf:v".to_string());
            args.push(filter.to_string());
            args.push("-f".to_string());
            args.push("mpegts".to_string());
            args.push(path.display().to_string());
        }
    }

    Ok(args)
}

/// A running encoder consuming one frame stream.
pub struct FrameEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    pending: Vec<u8>,
    pending_frames: usize,
    parallel_write_frames: usize,
    frames_written: u64,
}

impl FrameEncoder {
    /// Spawn ffmpeg for the given settings.
    pub fn spawn(settings: &EncoderSettings, parallel_write_frames: usize) -> WebreelResult<Self> {
        let args = encoder_args(settings)?;
        tracing::debug!(?args, "spawning frame encoder");

        let mut child = tokio::process::Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WebreelError::encode(format!("failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WebreelError::encode("failed to open ffmpeg stdin"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            pending: Vec::new(),
            pending_frames: 0,
            parallel_write_frames: parallel_write_frames.max(1),
            frames_written: 0,
        })
    }

    /// Queue one encoded image; flushes when the batch is full.
    pub async fn write_frame(&mut self, frame: &[u8]) -> WebreelResult<()> {
        self.pending.extend_from_slice(frame);
        self.pending_frames += 1;
        self.frames_written += 1;
        if self.pending_frames >= self.parallel_write_frames {
            self.flush().await?;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    async fn flush(&mut self) -> WebreelResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WebreelError::encode("encoder stdin already closed"))?;
        stdin
            .write_all(&self.pending)
            .await
            .map_err(|e| WebreelError::encode(format!("pipe write failed: {e}")))?;
        self.pending.clear();
        self.pending_frames = 0;
        Ok(())
    }

    /// Flush, close the pipe, and wait for the encoder to finish.
    pub async fn finish(mut self) -> WebreelResult<u64> {
        self.flush().await?;
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| WebreelError::encode(format!("pipe close failed: {e}")))?;
        }

        let output = self
            .child
            .wait_with_output()
            .await
            .map_err(|e| WebreelError::encode(format!("ffmpeg wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(rewrite_encoder_error(
                output.status.code(),
                stderr.trim(),
            ));
        }
        Ok(self.frames_written)
    }

    /// Abort the encode: ask ffmpeg to quit and stop feeding it.
    pub async fn abort(mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }
        let _ = self.child.kill().await;
    }
}

/// Rewrite encoder-open failures into a hardware-support hint; other
/// failures keep the original text.
fn rewrite_encoder_error(code: Option<i32>, stderr: &str) -> WebreelError {
    let opener_failed = stderr.contains("Error while opening encoder for output stream");
    let hw_crash = code == Some(HW_CRASH_EXIT_CODE);
    if opener_failed || hw_crash {
        WebreelError::encode(format!(
            "the selected video encoder could not be opened; the codec may be \
             unsupported by this hardware or the device's parallel encode \
             sessions are exhausted (NVENC limits concurrent sessions). \
             Original error: {stderr}"
        ))
    } else {
        WebreelError::encode(format!(
            "ffmpeg exited with status {:?}: {stderr}",
            code
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(output: EncoderOutput) -> EncoderSettings {
        EncoderSettings {
            width: 1280,
            height: 720,
            fps: 30,
            encoder: VideoEncoder::Libx264,
            pixel_format: PixelFormat::Yuv420p,
            bitrate_kbps: None,
            quality: 100,
            output,
        }
    }

    #[test]
    fn default_bitrate_formula_scales_with_pixels_and_quality() {
        let s = settings(EncoderOutput::ChunkTs {
            path: PathBuf::from("/tmp/c.ts"),
        });
        // 1280*720 = 921600 pixels at quality 100 → exactly 2560 kbps.
        assert_eq!(s.effective_bitrate_kbps(), 2560);

        let mut half = s.clone();
        half.quality = 50;
        assert_eq!(half.effective_bitrate_kbps(), 1280);

        let mut explicit = s;
        explicit.bitrate_kbps = Some(8000);
        assert_eq!(explicit.effective_bitrate_kbps(), 8000);
    }

    #[test]
    fn file_args_are_an_image_pipe_with_faststart() {
        let args = encoder_args(&settings(EncoderOutput::File {
            path: PathBuf::from("/tmp/out.mp4"),
            format: OutputFormat::Mp4,
            cover: None,
        }))
        .unwrap();
        let line = args.join(" ");
        assert!(line.contains("-f image2pipe -r 30 -i pipe:0"));
        assert!(line.contains("-c:v libx264"));
        assert!(line.contains("-profile:v main -preset medium"));
        assert!(line.contains("-b:v 2560k"));
        assert!(line.contains("-pix_fmt yuv420p"));
        assert!(line.contains("-movflags +faststart"));
        assert!(line.ends_with("/tmp/out.mp4"));
    }

    #[test]
    fn webm_file_output_carries_no_mov_flags() {
        let mut s = settings(EncoderOutput::File {
            path: PathBuf::from("/tmp/out.webm"),
            format: OutputFormat::Webm,
            cover: None,
        });
        s.encoder = VideoEncoder::LibvpxVp9;
        s.pixel_format = PixelFormat::Yuva420p;
        let line = encoder_args(&s).unwrap().join(" ");
        assert!(!line.contains("faststart"));
        assert!(line.contains("-c:v libvpx-vp9"));
        assert!(line.contains("-pix_fmt yuva420p"));
    }

    #[test]
    fn chunk_args_apply_bitstream_filter_into_mpegts() {
        let args = encoder_args(&settings(EncoderOutput::ChunkTs {
            path: PathBuf::from("/tmp/chunk_0.ts"),
        }))
        .unwrap();
        let line = args.join(" ");
        assert!(line.contains("-bsf:v h264_mp4toannexb"));
        assert!(line.contains("-f mpegts"));
        assert!(!line.contains("faststart"));
    }

    #[test]
    fn vp8_chunk_settings_are_rejected() {
        let mut s = settings(EncoderOutput::ChunkTs {
            path: PathBuf::from("/tmp/chunk_0.ts"),
        });
        s.encoder = VideoEncoder::Libvpx;
        assert!(encoder_args(&s).is_err());
    }

    #[test]
    fn cover_overlay_scales_to_output_geometry() {
        let args = encoder_args(&settings(EncoderOutput::File {
            path: PathBuf::from("/tmp/out.mp4"),
            format: OutputFormat::Mp4,
            cover: Some(PathBuf::from("/tmp/cover.png")),
        }))
        .unwrap();
        let line = args.join(" ");
        assert!(line.contains("scale=1280:720"));
        assert!(line.contains("overlay=0:0:repeatlast=0"));
        assert!(line.contains("-map [vout]"));
    }

    #[test]
    fn hardware_failures_are_rewritten_with_a_hint() {
        let err = rewrite_encoder_error(
            Some(1),
            "Error while opening encoder for output stream #0:0",
        );
        assert!(err.to_string().contains("NVENC"));

        let err = rewrite_encoder_error(Some(3221225477u32 as i32), "crash");
        assert!(err.to_string().contains("parallel encode"));

        let err = rewrite_encoder_error(Some(1), "No such file or directory");
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn hevc_and_vp9_chunk_filters_differ() {
        let mut s = settings(EncoderOutput::ChunkTs {
            path: PathBuf::from("/tmp/c.ts"),
        });
        s.encoder = VideoEncoder::Libx265;
        assert!(encoder_args(&s).unwrap().join(" ").contains("hevc_mp4toannexb"));
        s.encoder = VideoEncoder::LibvpxVp9;
        assert!(encoder_args(&s).unwrap().join(" ").contains("vp9_superframe"));
    }
}
