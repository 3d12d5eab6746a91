//! The render command: drive the browser engine and the synthesizer
//! for one or more scenes.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use serde::Deserialize;
use tokio::sync::mpsc;
use webreel_browser::{BrowserEngine, TimeActionPolicy};
use webreel_common::{timebase, EngineConfig};
use webreel_model::{
    OutputFormat, PageSource, RenderJob, ScreenshotFormat, Transition, TransitionId, VideoEncoder,
};
use webreel_render::{ChunkSynthesizer, RenderStage, SynthesizerConfig};

pub struct RenderArgs {
    pub source: String,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_ms: f64,
    pub start_time_ms: f64,
    pub format: String,
    pub encoder: Option<String>,
    pub quality: u32,
    pub bitrate_kbps: Option<u64>,
    pub background_opacity: f64,
    pub cover: Option<PathBuf>,
    pub compatible: bool,
    pub allow_unsafe: bool,
}

/// One entry of a `.json` scene list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneSpec {
    source: String,
    duration_ms: f64,
    #[serde(default)]
    transition: Option<String>,
    #[serde(default)]
    transition_duration_ms: Option<f64>,
}

pub async fn run(args: RenderArgs) -> anyhow::Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let video_encoder = match &args.encoder {
        Some(name) => Some(
            serde_json::from_value::<VideoEncoder>(serde_json::Value::String(name.clone()))
                .with_context(|| format!("unknown video encoder '{name}'"))?,
        ),
        None => None,
    };

    let scenes = load_scenes(&args)?;

    let mut engine_config = EngineConfig::load();
    engine_config.compatible_render_mode = args.compatible;

    let base_job = RenderJob {
        source: PageSource::Url(String::new()), // replaced per scene
        output_path: args.output.clone(),
        width: args.width,
        height: args.height,
        fps: args.fps,
        duration_ms: args.duration_ms,
        frame_count: None,
        start_time_ms: args.start_time_ms,
        format,
        video_encoder,
        audio_encoder: None,
        quality: args.quality,
        video_bitrate_kbps: args.bitrate_kbps,
        pixel_format: None,
        background_opacity: args.background_opacity,
        video_volume: 100.0,
        attach_cover_path: args.cover.clone(),
        screenshot_format: ScreenshotFormat::Jpeg,
        screenshot_quality: 80,
        video_decoder_hardware_acceleration:
            webreel_model::HardwareAcceleration::PreferHardware,
        autostart: true,
        allow_unsafe_context: args.allow_unsafe,
        date_now_epsilon: true,
    };
    base_job.validate()?;

    let total_frames: u64 = scenes
        .iter()
        .map(|s| timebase::frame_count(s.duration_ms, args.fps))
        .sum();

    let engine = BrowserEngine::new(engine_config.clone())?;

    let synth_config = SynthesizerConfig {
        width: args.width,
        height: args.height,
        fps: args.fps,
        format,
        video_encoder: base_job.video_encoder(),
        audio_encoder: base_job.audio_encoder(),
        pixel_format: base_job.pixel_format(),
        quality: args.quality,
        bitrate_kbps: args.bitrate_kbps,
        video_volume: base_job.video_volume,
        output_path: args.output.clone(),
        cover: args.cover.clone(),
        parallel_write_frames: engine_config.parallel_write_frames,
        total_frames,
        scene_count: scenes.len(),
    };
    let mut synthesizer =
        ChunkSynthesizer::new(synth_config, engine.workspace().synthesizer_dir());
    synthesizer.on_progress(Box::new(|progress| {
        let stage = match progress.stage {
            RenderStage::Rendering => "rendering",
            RenderStage::Splicing => "splicing",
            RenderStage::Mixing => "mixing",
            RenderStage::Complete => "complete",
            RenderStage::Preparing => "preparing",
            RenderStage::Failed => "failed",
        };
        print!(
            "\r{stage:>10}  {:>5.1}%  ({}/{} frames)",
            progress.progress * 100.0,
            progress.frames_rendered,
            progress.total_frames
        );
        let _ = std::io::stdout().flush();
    }));

    for (index, scene) in scenes.iter().enumerate() {
        let mut job = base_job.clone();
        job.source = scene_source(&scene.source)?;
        job.duration_ms = scene.duration_ms;

        let transition = match (&scene.transition, scene.transition_duration_ms) {
            (Some(token), Some(duration)) => {
                Some(Transition::new(TransitionId::parse(token)?, duration))
            }
            (Some(token), None) => Some(Transition::new(TransitionId::parse(token)?, 500.0)),
            _ => None,
        };

        tracing::info!(scene = index, duration_ms = scene.duration_ms, "rendering scene");

        let lease = engine.acquire_page().await?;
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let page = lease.page.clone();
        let capture_job = job.clone();
        let capture = tokio::spawn(async move {
            page.capture(
                capture_job,
                BTreeMap::new(),
                TimeActionPolicy::default(),
                frame_tx,
            )
            .await
        });

        let chunk_index = synthesizer
            .encode_chunk(scene.duration_ms, transition, &mut frame_rx)
            .await;
        // A closed sink makes the page stop at its next frame request,
        // so a failed encode cannot strand the capture task.
        frame_rx.close();
        let outcome = capture.await.context("capture task panicked")?;
        engine.release_page(lease).await;

        let chunk_index = chunk_index?;
        let outcome = outcome?;
        tracing::info!(
            scene = index,
            frames = outcome.frames_emitted,
            audios = outcome.audios.len(),
            "scene captured"
        );
        synthesizer.attach_audios(chunk_index, outcome.audios);
    }

    let output = synthesizer.finalize().await?;
    println!();
    engine.shutdown().await;

    println!("wrote {}", output.display());
    Ok(())
}

/// Scenes: a `.json` list, or a single URL/HTML-file scene.
fn load_scenes(args: &RenderArgs) -> anyhow::Result<Vec<SceneSpec>> {
    if args.source.ends_with(".json") {
        let content = std::fs::read_to_string(&args.source)
            .with_context(|| format!("reading scene list {}", args.source))?;
        let scenes: Vec<SceneSpec> = serde_json::from_str(&content)?;
        anyhow::ensure!(!scenes.is_empty(), "scene list is empty");
        Ok(scenes)
    } else {
        Ok(vec![SceneSpec {
            source: args.source.clone(),
            duration_ms: args.duration_ms,
            transition: None,
            transition_duration_ms: None,
        }])
    }
}

fn scene_source(source: &str) -> anyhow::Result<PageSource> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(PageSource::Url(source.to_string()))
    } else {
        let html = std::fs::read_to_string(source)
            .with_context(|| format!("reading HTML file {source}"))?;
        Ok(PageSource::Html(html))
    }
}
