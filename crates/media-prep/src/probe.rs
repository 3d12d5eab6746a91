//! ffprobe helpers shared by the preprocessor and the synthesizer.

use std::path::Path;

use webreel_common::{WebreelError, WebreelResult};

/// Container/stream facts the transcode decisions depend on.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    pub format_name: String,
    pub duration_ms: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
    /// Set when the video stream carries an `ALPHA_MODE` tag > 0.
    pub has_alpha: bool,
}

impl MediaProbe {
    pub fn is_webm(&self) -> bool {
        self.format_name.contains("webm") || self.format_name.contains("matroska")
    }
}

/// Probe a media file.
pub async fn probe(path: &Path) -> WebreelResult<MediaProbe> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=format_name,duration:stream=codec_type,width,height:stream_tags=alpha_mode",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| WebreelError::preprocess(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(WebreelError::preprocess(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let mut result = MediaProbe {
        format_name: json["format"]["format_name"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        duration_ms: json["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|secs| secs * 1000.0),
        ..Default::default()
    };

    for stream in json["streams"].as_array().into_iter().flatten() {
        match stream["codec_type"].as_str() {
            Some("video") => {
                result.width = stream["width"].as_u64().map(|w| w as u32);
                result.height = stream["height"].as_u64().map(|h| h as u32);
                let alpha = stream["tags"]["alpha_mode"]
                    .as_str()
                    .and_then(|s| s.parse::<i64>().ok())
                    .unwrap_or(0);
                if alpha > 0 {
                    result.has_alpha = true;
                }
            }
            Some("audio") => result.has_audio = true,
            _ => {}
        }
    }

    Ok(result)
}

/// Duration of a media file in milliseconds, `None` when unreadable.
pub async fn duration_ms(path: &Path) -> Option<f64> {
    probe(path).await.ok().and_then(|p| p.duration_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webm_detection_matches_both_demuxer_names() {
        let mut p = MediaProbe {
            format_name: "matroska,webm".into(),
            ..Default::default()
        };
        assert!(p.is_webm());
        p.format_name = "mov,mp4,m4a,3gp,3g2,mj2".into();
        assert!(!p.is_webm());
    }
}
