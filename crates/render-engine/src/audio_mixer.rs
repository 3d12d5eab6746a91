//! The audio mixer: a second ffmpeg pass over the video-only
//! intermediate plus every collected audio descriptor.
//!
//! Per audio `i` (input index `i+1`, input 0 is the video):
//!
//! ```text
//! [i+1]atrim=0:(end-start)/1000
//!      [,aloop=loop=-1:size=2e9      when looping]
//!      ,adelay=start|start
//!      ,volume=(volume*videoVolume)/10000
//!      [,afade=t=in:st=start/1000:d=fadeIn/1000]
//!      [,afade=t=out:st=(end-fadeOut)/1000:d=fadeOut/1000]
//!      [a_i]
//! ```
//!
//! then `[a_0]..[a_N]amix=inputs=N:normalize=0[aout]`. The video stream
//! is copied; total duration is clamped to the video length.

use std::path::Path;
use std::process::Stdio;

use webreel_common::{WebreelError, WebreelResult};
use webreel_model::{AudioDescriptor, AudioEncoder};

/// One audio track's filter chain.
pub fn audio_filter(index: usize, audio: &AudioDescriptor, video_volume: f64) -> String {
    let mut filter = format!(
        "[{input}]atrim=0:{trim}",
        input = index + 1,
        trim = (audio.end_time - audio.start_time) / 1000.0
    );
    if audio.loop_ {
        filter.push_str(",aloop=loop=-1:size=2e9");
    }
    let delay = audio.start_time.round() as i64;
    filter.push_str(&format!(",adelay={delay}|{delay}"));
    filter.push_str(&format!(
        ",volume={}",
        (audio.volume * video_volume) / 10_000.0
    ));
    if let Some(fade_in) = audio.fade_in_duration {
        filter.push_str(&format!(
            ",afade=t=in:st={}:d={}",
            audio.start_time / 1000.0,
            fade_in / 1000.0
        ));
    }
    if let Some(fade_out) = audio.fade_out_duration {
        filter.push_str(&format!(
            ",afade=t=out:st={}:d={}",
            (audio.end_time - fade_out) / 1000.0,
            fade_out / 1000.0
        ));
    }
    filter.push_str(&format!("[a_{index}]"));
    filter
}

/// The complete filter graph for a set of audio tracks.
pub fn mix_filter_graph(audios: &[AudioDescriptor], video_volume: f64) -> String {
    let mut graph = String::new();
    for (index, audio) in audios.iter().enumerate() {
        if index > 0 {
            graph.push(';');
        }
        graph.push_str(&audio_filter(index, audio, video_volume));
    }
    graph.push(';');
    for index in 0..audios.len() {
        graph.push_str(&format!("[a_{index}]"));
    }
    graph.push_str(&format!(
        "amix=inputs={}:normalize=0[aout]",
        audios.len()
    ));
    graph
}

/// The ffmpeg argument list for the mix pass.
pub fn mix_args(
    video_input: &Path,
    audios: &[AudioDescriptor],
    audio_encoder: AudioEncoder,
    video_volume: f64,
    video_duration_ms: f64,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video_input.display().to_string(),
    ];
    for audio in audios {
        args.push("-i".to_string());
        args.push(audio.source.clone());
    }
    args.push("-filter_complex".to_string());
    args.push(mix_filter_graph(audios, video_volume));
    args.push("-map".to_string());
    args.push("0:v".to_string());
    args.push("-map".to_string());
    args.push("[aout]".to_string());
    args.push("-c:v".to_string());
    args.push("copy".to_string());
    args.push("-c:a".to_string());
    args.push(audio_encoder.ffmpeg_name().to_string());
    args.push("-t".to_string());
    args.push(format!("{:.6}", video_duration_ms / 1000.0));
    args.push(output.display().to_string());
    args
}

/// Remux the video with its mixed audio. With no audio tracks the
/// video is copied into the output container unchanged.
pub async fn mix(
    video_input: &Path,
    audios: &[AudioDescriptor],
    audio_encoder: AudioEncoder,
    video_volume: f64,
    video_duration_ms: f64,
    output: &Path,
) -> WebreelResult<()> {
    let args = if audios.is_empty() {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video_input.display().to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-an".to_string(),
            output.display().to_string(),
        ]
    } else {
        for audio in audios {
            audio.validate()?;
        }
        mix_args(
            video_input,
            audios,
            audio_encoder,
            video_volume,
            video_duration_ms,
            output,
        )
    };

    tracing::debug!(?args, "running audio mix");
    let result = tokio::process::Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WebreelError::encode(format!("failed to start ffmpeg: {e}")))?;

    if !result.status.success() {
        return Err(WebreelError::encode(format!(
            "audio mix failed (status {}): {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(id: u64) -> AudioDescriptor {
        AudioDescriptor {
            id,
            source: format!("/tmp/{id}.mp3"),
            start_time: 1000.0,
            end_time: 6000.0,
            duration: None,
            loop_: false,
            volume: 50.0,
            seek_start: None,
            seek_end: None,
            fade_in_duration: Some(500.0),
            fade_out_duration: Some(250.0),
        }
    }

    #[test]
    fn filter_orders_trim_delay_volume_fades() {
        let f = audio_filter(0, &audio(1), 100.0);
        assert_eq!(
            f,
            "[1]atrim=0:5,adelay=1000|1000,volume=0.5,\
             afade=t=in:st=1:d=0.5,afade=t=out:st=5.75:d=0.25[a_0]"
        );
    }

    #[test]
    fn looping_audio_gets_aloop_before_delay() {
        let mut a = audio(1);
        a.loop_ = true;
        a.fade_in_duration = None;
        a.fade_out_duration = None;
        let f = audio_filter(0, &a, 100.0);
        assert_eq!(f, "[1]atrim=0:5,aloop=loop=-1:size=2e9,adelay=1000|1000,volume=0.5[a_0]");
    }

    #[test]
    fn volume_combines_track_and_master() {
        let mut a = audio(1);
        a.fade_in_duration = None;
        a.fade_out_duration = None;
        // 50% track volume * 50% master = 0.25 gain.
        let f = audio_filter(0, &a, 50.0);
        assert!(f.contains("volume=0.25"));
    }

    #[test]
    fn graph_mixes_every_labeled_chain() {
        let graph = mix_filter_graph(&[audio(1), audio(2)], 100.0);
        assert!(graph.contains("[a_0]"));
        assert!(graph.contains("[a_1]"));
        assert!(graph.ends_with("[a_0][a_1]amix=inputs=2:normalize=0[aout]"));
    }

    #[test]
    fn mix_args_copy_video_and_clamp_duration() {
        let args = mix_args(
            Path::new("/tmp/video.mp4"),
            &[audio(1)],
            AudioEncoder::Aac,
            100.0,
            9000.0,
            Path::new("/tmp/out.mp4"),
        );
        let line = args.join(" ");
        assert!(line.contains("-c:v copy"));
        assert!(line.contains("-c:a aac"));
        assert!(line.contains("-t 9.000000"));
        assert!(line.contains("-map 0:v -map [aout]"));
        // video first, then one input per audio
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[test]
    fn mix_command_is_byte_stable_across_runs() {
        let inputs = [audio(1), audio(2)];
        let a = mix_args(
            Path::new("/tmp/v.mp4"),
            &inputs,
            AudioEncoder::LibOpus,
            80.0,
            5000.0,
            Path::new("/tmp/o.webm"),
        );
        let b = mix_args(
            Path::new("/tmp/v.mp4"),
            &inputs,
            AudioEncoder::LibOpus,
            80.0,
            5000.0,
            Path::new("/tmp/o.webm"),
        );
        assert_eq!(a, b);
    }
}
