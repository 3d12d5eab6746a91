//! ffmpeg passes of the preprocessor.
//!
//! Every pass is a bounded subprocess; args are built as plain vectors
//! so the exact command lines stay unit-testable.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use webreel_common::{WebreelError, WebreelResult};

/// Args: transcode a (WebM) main track to an MP4-compatible H.264 file.
pub fn h264_transcode_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.display().to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        "18".into(),
        "-an".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.display().to_string(),
    ]
}

/// Args: extract the alpha plane of a transparent source into a mask
/// MP4 (luminance = alpha).
pub fn alpha_mask_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.display().to_string(),
        "-vf".into(),
        "alphaextract".into(),
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        "18".into(),
        "-an".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.display().to_string(),
    ]
}

/// Args: demux the audio track to MP3.
pub fn audio_demux_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.display().to_string(),
        "-vn".into(),
        "-c:a".into(),
        "libmp3lame".into(),
        output.display().to_string(),
    ]
}

/// Args: re-clip an MP4 into a fragmented in-memory stream so the
/// in-page decoder starts at frame 0 of the clip.
pub fn clip_args(input: &Path, seek_start_ms: f64, seek_end_ms: Option<f64>) -> Vec<String> {
    let mut args = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{:.3}", seek_start_ms / 1000.0),
    ];
    if let Some(end) = seek_end_ms {
        args.push("-to".into());
        args.push(format!("{:.3}", end / 1000.0));
    }
    args.extend([
        "-i".into(),
        input.display().to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-an".into(),
        "-movflags".into(),
        "frag_keyframe+empty_moov".into(),
        "-f".into(),
        "mp4".into(),
        "pipe:1".into(),
    ]);
    args
}

/// Run an ffmpeg pass writing to a file, bounded by `timeout`.
pub async fn run_ffmpeg(args: &[String], timeout: Duration) -> WebreelResult<()> {
    tracing::debug!(?args, "running ffmpeg");
    let child = tokio::process::Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WebreelError::preprocess(format!("failed to start ffmpeg: {e}")))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            WebreelError::timeout("ffmpeg preprocess pass", timeout.as_millis() as u64)
        })?
        .map_err(|e| WebreelError::preprocess(format!("ffmpeg wait failed: {e}")))?;

    if !output.status.success() {
        return Err(WebreelError::preprocess(format!(
            "ffmpeg pass failed (status {}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Run an ffmpeg pass that writes to stdout, returning the bytes.
pub async fn run_ffmpeg_to_memory(args: &[String], timeout: Duration) -> WebreelResult<Vec<u8>> {
    tracing::debug!(?args, "running ffmpeg (to memory)");
    let child = tokio::process::Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WebreelError::preprocess(format!("failed to start ffmpeg: {e}")))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            WebreelError::timeout("ffmpeg clip pass", timeout.as_millis() as u64)
        })?
        .map_err(|e| WebreelError::preprocess(format!("ffmpeg wait failed: {e}")))?;

    if !output.status.success() {
        return Err(WebreelError::preprocess(format!(
            "ffmpeg clip failed (status {}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// Whether a binary is reachable on PATH.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_args_force_faststart_crf18() {
        let args = h264_transcode_args(Path::new("/tmp/1.webm"), Path::new("/tmp/1_t.mp4"));
        let line = args.join(" ");
        assert!(line.contains("-c:v libx264"));
        assert!(line.contains("-crf 18"));
        assert!(line.contains("-movflags +faststart"));
        assert!(line.ends_with("/tmp/1_t.mp4"));
    }

    #[test]
    fn mask_args_use_alphaextract() {
        let args = alpha_mask_args(Path::new("/tmp/1.webm"), Path::new("/tmp/1_mask.mp4"));
        let line = args.join(" ");
        assert!(line.contains("-vf alphaextract"));
        assert!(line.contains("-an"));
    }

    #[test]
    fn clip_args_produce_fragmented_stream_on_stdout() {
        let args = clip_args(Path::new("/tmp/1.mp4"), 2000.0, Some(4500.0));
        let line = args.join(" ");
        assert!(line.contains("-ss 2.000"));
        assert!(line.contains("-to 4.500"));
        assert!(line.contains("-movflags frag_keyframe+empty_moov"));
        assert!(line.ends_with("-f mp4 pipe:1"));
    }

    #[test]
    fn clip_args_without_end_omit_to() {
        let args = clip_args(Path::new("/tmp/1.mp4"), 1000.0, None);
        assert!(!args.contains(&"-to".to_string()));
    }

    #[test]
    fn demux_args_strip_video() {
        let args = audio_demux_args(Path::new("/tmp/1.mp4"), Path::new("/tmp/1.mp3"));
        let line = args.join(" ");
        assert!(line.contains("-vn"));
        assert!(line.contains("-c:a libmp3lame"));
    }
}
