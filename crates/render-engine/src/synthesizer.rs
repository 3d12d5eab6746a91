//! Multi-scene synthesis.
//!
//! Scenes are encoded one at a time into MPEG-TS chunk intermediates;
//! audio descriptors collected during a scene are re-tagged onto the
//! composite timeline with the cumulative effective offset. The final
//! splice merges transition-less neighbors through the `concat:`
//! protocol, cascades an xfade per transition boundary, optionally
//! overlays a cover, then hands the video-only result to the audio
//! mixer exactly once. A single-scene render bypasses the chunk
//! intermediate and encodes straight into the output container.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use webreel_common::{WebreelError, WebreelResult};
use webreel_model::{
    chunk, AudioDescriptor, AudioEncoder, OutputFormat, PixelFormat, Transition, VideoChunk,
    VideoEncoder,
};

use crate::frame_encoder::{EncoderOutput, EncoderSettings, FrameEncoder};
use crate::progress::{self, ProgressCallback, RenderProgress, RenderStage};
use crate::audio_mixer;

/// Fixed parameters of a composite render.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: OutputFormat,
    pub video_encoder: VideoEncoder,
    pub audio_encoder: AudioEncoder,
    pub pixel_format: PixelFormat,
    pub quality: u32,
    pub bitrate_kbps: Option<u64>,
    pub video_volume: f64,
    pub output_path: PathBuf,
    pub cover: Option<PathBuf>,
    pub parallel_write_frames: usize,
    /// Total frames expected across all scenes, for progress weighting.
    pub total_frames: u64,
    /// Number of scenes this render will encode. A lone scene skips
    /// the chunk intermediate entirely.
    pub scene_count: usize,
}

/// Coordinates ordered chunks into one output file.
pub struct ChunkSynthesizer {
    config: SynthesizerConfig,
    work_dir: PathBuf,
    chunks: Vec<VideoChunk>,
    audios: Vec<AudioDescriptor>,
    frames_rendered: u64,
    progress: Option<ProgressCallback>,
    /// Set when the single scene encoded straight into its container.
    direct_output: Option<PathBuf>,
}

/// A lone scene with no transition needs no MPEG-TS intermediate: it
/// encodes straight into the output container (cover applied by the
/// encoder) and goes to the mixer as-is.
fn direct_eligible(chunk_count: usize, scene_count: usize, transition: Option<&Transition>) -> bool {
    chunk_count == 0 && scene_count == 1 && transition.is_none()
}

impl ChunkSynthesizer {
    pub fn new(config: SynthesizerConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            chunks: Vec::new(),
            audios: Vec::new(),
            frames_rendered: 0,
            progress: None,
            direct_output: None,
        }
    }

    pub fn on_progress(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    fn report(&self, progress: f64, stage: RenderStage) {
        if let Some(cb) = &self.progress {
            cb(RenderProgress {
                progress,
                frames_rendered: self.frames_rendered,
                total_frames: self.config.total_frames,
                stage,
            });
        }
    }

    /// Encode one scene from its frame stream, returning the chunk
    /// index for [`attach_audios`](Self::attach_audios).
    pub async fn encode_chunk(
        &mut self,
        duration_ms: f64,
        transition: Option<Transition>,
        frames: &mut tokio::sync::mpsc::Receiver<Vec<u8>>,
    ) -> WebreelResult<usize> {
        let index = self.chunks.len();
        std::fs::create_dir_all(&self.work_dir)?;

        let direct = direct_eligible(index, self.config.scene_count, transition.as_ref());
        let (path, output) = if direct {
            let path = self
                .work_dir
                .join(format!("spliced.{}", self.config.format.extension()));
            let output = EncoderOutput::File {
                path: path.clone(),
                format: self.config.format,
                cover: self.config.cover.clone(),
            };
            (path, output)
        } else {
            let path = self.work_dir.join(format!("chunk_{index}.ts"));
            let output = EncoderOutput::ChunkTs { path: path.clone() };
            (path, output)
        };

        let settings = EncoderSettings {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            encoder: self.config.video_encoder,
            pixel_format: self.config.pixel_format,
            bitrate_kbps: self.config.bitrate_kbps,
            quality: self.config.quality,
            output,
        };
        let mut encoder = FrameEncoder::spawn(&settings, self.config.parallel_write_frames)?;

        tracing::info!(index, path = %path.display(), "encoding chunk");
        while let Some(frame) = frames.recv().await {
            encoder.write_frame(&frame).await?;
            self.frames_rendered += 1;
            self.report(
                progress::chunk_progress(self.frames_rendered, self.config.total_frames),
                RenderStage::Rendering,
            );
        }
        let written = encoder.finish().await?;
        tracing::info!(index, frames = written, direct, "chunk encoded");

        if direct {
            self.direct_output = Some(path.clone());
        }
        self.chunks.push(VideoChunk {
            output_path: path,
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            duration_ms,
            video_encoder: self.config.video_encoder,
            transition,
            audios: Vec::new(),
        });
        Ok(index)
    }

    /// Re-tag a chunk's audio descriptors (scene-local time) onto the
    /// composite timeline: clamp to the scene, then shift by the
    /// chunk's cumulative effective offset.
    pub fn attach_audios(&mut self, chunk_index: usize, audios: Vec<AudioDescriptor>) {
        let offsets = chunk::cumulative_offsets_ms(&self.chunks);
        let Some(chunk) = self.chunks.get(chunk_index) else {
            tracing::warn!(chunk_index, "attach_audios on unknown chunk");
            return;
        };
        let offset = offsets[chunk_index];
        let duration = chunk.duration_ms;
        for mut audio in audios {
            audio.clamp_end(duration);
            self.audios.push(audio.offset_by(offset));
        }
    }

    /// Splice every encoded chunk and run the audio mix.
    pub async fn finalize(mut self) -> WebreelResult<PathBuf> {
        self.report(progress::mix_progress(0.0), RenderStage::Splicing);
        let spliced = match self.direct_output.clone() {
            // A lone scene is already in its container, cover applied.
            Some(direct) => direct,
            None => {
                chunk::validate_sequence(&self.chunks)?;
                let spliced = self.work_dir.join(format!(
                    "spliced.{}",
                    self.config.format.extension()
                ));
                let args = splice_args(&self.chunks, &self.config, &spliced);
                run_ffmpeg(&args).await.map_err(|e| {
                    WebreelError::synthesis(format!("chunk splice failed: {e}"))
                })?;
                spliced
            }
        };

        self.report(progress::mix_progress(0.5), RenderStage::Mixing);
        let duration = chunk::total_duration_ms(&self.chunks);
        audio_mixer::mix(
            &spliced,
            &self.audios,
            self.config.audio_encoder,
            self.config.video_volume,
            duration,
            &self.config.output_path,
        )
        .await?;

        self.report(1.0, RenderStage::Complete);
        tracing::info!(
            output = %self.config.output_path.display(),
            chunks = self.chunks.len(),
            audios = self.audios.len(),
            duration_ms = duration,
            "synthesis complete"
        );
        Ok(self.config.output_path)
    }

    /// Audio descriptors re-tagged so far (composite timeline).
    pub fn audios(&self) -> &[AudioDescriptor] {
        &self.audios
    }

    pub fn chunks(&self) -> &[VideoChunk] {
        &self.chunks
    }
}

/// Consecutive chunks whose internal boundaries carry no transition,
/// expressed as inclusive index ranges. Groups are separated exactly at
/// transition boundaries.
pub fn transition_groups(chunks: &[VideoChunk]) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, c) in chunks.iter().enumerate() {
        if c.transition.is_some() || i == chunks.len() - 1 {
            groups.push((start, i));
            start = i + 1;
        }
    }
    groups
}

/// One ffmpeg input per group: a bare path, or the `concat:` protocol
/// for merged transition-less runs.
fn group_input(chunks: &[VideoChunk], group: (usize, usize)) -> String {
    if group.0 == group.1 {
        chunks[group.0].output_path.display().to_string()
    } else {
        let paths: Vec<String> = chunks[group.0..=group.1]
            .iter()
            .map(|c| c.output_path.display().to_string())
            .collect();
        format!("concat:{}", paths.join("|"))
    }
}

/// The ffmpeg argument list splicing the chunk sequence into one
/// video-only intermediate.
pub fn splice_args(
    chunks: &[VideoChunk],
    config: &SynthesizerConfig,
    output: &Path,
) -> Vec<String> {
    let groups = transition_groups(chunks);
    let offsets = chunk::cumulative_offsets_ms(chunks);

    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    for group in &groups {
        args.push("-i".to_string());
        args.push(group_input(chunks, *group));
    }

    let needs_xfade = groups.len() > 1;
    let needs_filter = needs_xfade || config.cover.is_some();

    if let Some(cover) = &config.cover {
        args.push("-i".to_string());
        args.push(cover.display().to_string());
    }

    if needs_filter {
        let mut graph = String::new();
        let mut current = "[0:v]".to_string();
        for (boundary, window) in groups.windows(2).enumerate() {
            let left_last = window[0].1;
            let transition = chunks[left_last]
                .transition
                .expect("groups are separated exactly at transition boundaries");
            // The xfade offset is where the left stream starts blending:
            // the cumulative effective duration up to the next chunk.
            let offset_s = offsets[left_last + 1] / 1000.0;
            let label = format!("[vx{}]", boundary + 1);
            graph.push_str(&format!(
                "{current}[{right}:v]xfade=transition={token}:duration={dur}:offset={offset}{label};",
                right = boundary + 1,
                token = transition.id.token(),
                dur = transition.duration_ms / 1000.0,
                offset = offset_s,
            ));
            current = label;
        }
        if let Some(_cover) = &config.cover {
            let cover_index = groups.len();
            graph.push_str(&format!(
                "[{cover_index}:v]scale={w}:{h}[cover];{current}[cover]overlay=0:0:repeatlast=0[vout];",
                w = config.width,
                h = config.height,
            ));
            current = "[vout]".to_string();
        }
        graph.pop(); // trailing ';'
        args.push("-filter_complex".to_string());
        args.push(graph);
        args.push("-map".to_string());
        args.push(current);

        args.push("-c:v".to_string());
        args.push(config.video_encoder.ffmpeg_name().to_string());
        if config.video_encoder.takes_profile_preset() {
            args.push("-profile:v".to_string());
            args.push("main".to_string());
            args.push("-preset".to_string());
            args.push("medium".to_string());
        }
        args.push("-pix_fmt".to_string());
        args.push(config.pixel_format.ffmpeg_name().to_string());
    } else {
        // One transition-less stream: remux without re-encoding.
        args.push("-c:v".to_string());
        args.push("copy".to_string());
    }

    args.push("-an".to_string());
    args.push(output.display().to_string());
    args
}

async fn run_ffmpeg(args: &[String]) -> WebreelResult<()> {
    tracing::debug!(?args, "running ffmpeg splice");
    let output = tokio::process::Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WebreelError::synthesis(format!("failed to start ffmpeg: {e}")))?;
    if !output.status.success() {
        return Err(WebreelError::synthesis(format!(
            "ffmpeg exited with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webreel_model::TransitionId;

    fn chunk(index: usize, duration_ms: f64, transition: Option<Transition>) -> VideoChunk {
        VideoChunk {
            output_path: PathBuf::from(format!("/tmp/syn/chunk_{index}.ts")),
            width: 1280,
            height: 720,
            fps: 30,
            duration_ms,
            video_encoder: VideoEncoder::Libx264,
            transition,
            audios: Vec::new(),
        }
    }

    fn config() -> SynthesizerConfig {
        SynthesizerConfig {
            width: 1280,
            height: 720,
            fps: 30,
            format: OutputFormat::Mp4,
            video_encoder: VideoEncoder::Libx264,
            audio_encoder: AudioEncoder::Aac,
            pixel_format: PixelFormat::Yuv420p,
            quality: 80,
            bitrate_kbps: None,
            video_volume: 100.0,
            output_path: PathBuf::from("/tmp/out.mp4"),
            cover: None,
            parallel_write_frames: 10,
            total_frames: 300,
            scene_count: 2,
        }
    }

    #[test]
    fn only_a_lone_transition_less_scene_encodes_directly() {
        assert!(direct_eligible(0, 1, None));
        // Any sibling scene forces the chunk intermediate...
        assert!(!direct_eligible(0, 2, None));
        assert!(!direct_eligible(1, 2, None));
        // ...as does a transition, which needs the splice pass.
        let fade = Transition::new(TransitionId::Fade, 500.0);
        assert!(!direct_eligible(0, 1, Some(&fade)));
    }

    #[test]
    fn transition_less_neighbors_merge_into_one_group() {
        let chunks = vec![
            chunk(0, 5000.0, None),
            chunk(1, 5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(2, 5000.0, None),
            chunk(3, 5000.0, None),
        ];
        assert_eq!(transition_groups(&chunks), vec![(0, 1), (2, 3)]);
        assert_eq!(
            group_input(&chunks, (2, 3)),
            "concat:/tmp/syn/chunk_2.ts|/tmp/syn/chunk_3.ts"
        );
    }

    #[test]
    fn no_transitions_yield_a_single_copy_remux() {
        let chunks = vec![chunk(0, 5000.0, None), chunk(1, 5000.0, None)];
        let args = splice_args(&chunks, &config(), Path::new("/tmp/spliced.mp4"));
        let line = args.join(" ");
        assert!(line.contains("-i concat:/tmp/syn/chunk_0.ts|/tmp/syn/chunk_1.ts"));
        assert!(line.contains("-c:v copy"));
        assert!(!line.contains("xfade"));
    }

    #[test]
    fn fade_boundary_gets_xfade_at_effective_offset() {
        // 5s -fade(1s)-> 5s: blend starts at 4s.
        let chunks = vec![
            chunk(0, 5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(1, 5000.0, None),
        ];
        let args = splice_args(&chunks, &config(), Path::new("/tmp/spliced.mp4"));
        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert_eq!(
            graph,
            "[0:v][1:v]xfade=transition=fade:duration=1:offset=4[vx1]"
        );
        let line = args.join(" ");
        assert!(line.contains("-map [vx1]"));
        assert!(line.contains("-c:v libx264"));
    }

    #[test]
    fn cascading_boundaries_accumulate_effective_offsets() {
        let chunks = vec![
            chunk(0, 5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(1, 5000.0, Some(Transition::new(TransitionId::WipeLeft, 2000.0))),
            chunk(2, 5000.0, None),
        ];
        let args = splice_args(&chunks, &config(), Path::new("/tmp/spliced.mp4"));
        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert!(graph.contains("xfade=transition=fade:duration=1:offset=4[vx1]"));
        assert!(graph.contains("[vx1][2:v]xfade=transition=wipeleft:duration=2:offset=7[vx2]"));
    }

    #[test]
    fn cover_is_overlaid_after_the_cascade() {
        let mut cfg = config();
        cfg.cover = Some(PathBuf::from("/tmp/cover.png"));
        let chunks = vec![
            chunk(0, 5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(1, 5000.0, None),
        ];
        let args = splice_args(&chunks, &cfg, Path::new("/tmp/spliced.mp4"));
        let graph_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        let graph = &args[graph_at + 1];
        assert!(graph.contains("[2:v]scale=1280:720[cover]"));
        assert!(graph.contains("[vx1][cover]overlay=0:0:repeatlast=0[vout]"));
        assert!(args.join(" ").contains("-map [vout]"));
    }

    #[test]
    fn attached_audios_shift_by_cumulative_effective_offset() {
        let mut synth = ChunkSynthesizer::new(config(), "/tmp/syn");
        synth.chunks = vec![
            chunk(0, 5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(1, 5000.0, None),
        ];

        let audio = AudioDescriptor {
            id: 1,
            source: "/tmp/a.mp3".into(),
            start_time: 500.0,
            end_time: f64::INFINITY,
            duration: None,
            loop_: false,
            volume: 100.0,
            seek_start: None,
            seek_end: None,
            fade_in_duration: None,
            fade_out_duration: None,
        };
        synth.attach_audios(1, vec![audio]);

        // Chunk 1 starts at 4000ms (5000 - 1000 transition); the local
        // 500ms start lands at 4500ms, and the open end clamps to the
        // scene before shifting.
        let attached = &synth.audios()[0];
        assert_eq!(attached.start_time, 4500.0);
        assert_eq!(attached.end_time, 9000.0);
    }

    #[test]
    fn splice_command_is_byte_stable_across_runs() {
        let chunks = vec![
            chunk(0, 5000.0, Some(Transition::new(TransitionId::Dissolve, 500.0))),
            chunk(1, 3000.0, None),
        ];
        let a = splice_args(&chunks, &config(), Path::new("/tmp/s.mp4"));
        let b = splice_args(&chunks, &config(), Path::new("/tmp/s.mp4"));
        assert_eq!(a, b);
    }
}
