//! Webreel CLI — render web pages into deterministic offline videos.
//!
//! Usage:
//!   webreel render <SOURCE> [OPTIONS]   Render a page (or scene list) to a video
//!   webreel clean [OPTIONS]             Empty the on-disk caches
//!   webreel check                       Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "webreel",
    about = "Deterministic page-to-video rendering through headless Chromium",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit structured JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page (URL, HTML file, or scene list) to a video file
    Render {
        /// Page URL, a local .html file, or a .json scene list
        source: String,

        /// Output file path
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Output width in pixels
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Output height in pixels
        #[arg(long, default_value = "720")]
        height: u32,

        /// Frame rate
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Scene duration in milliseconds (ignored for scene lists)
        #[arg(long, default_value = "10000")]
        duration: f64,

        /// Virtual time at which frame emission starts (milliseconds)
        #[arg(long, default_value = "0")]
        start_time: f64,

        /// Output format: mp4 or webm
        #[arg(long, default_value = "mp4")]
        format: String,

        /// Video encoder (defaults to the format's CPU encoder)
        #[arg(long)]
        encoder: Option<String>,

        /// Encoder quality 1..=100 (drives the default bitrate)
        #[arg(long, default_value = "80")]
        quality: u32,

        /// Explicit video bitrate in kbps
        #[arg(long)]
        bitrate: Option<u64>,

        /// Page background opacity 0..=1 (below 1 forces PNG frames)
        #[arg(long, default_value = "1.0")]
        background_opacity: f64,

        /// Cover image overlaid on the output
        #[arg(long)]
        cover: Option<PathBuf>,

        /// Use Page.captureScreenshot instead of beginFrame
        #[arg(long)]
        compatible: bool,

        /// Allow non-HTTPS, non-loopback page URLs
        #[arg(long)]
        allow_unsafe: bool,
    },

    /// Empty the on-disk caches
    Clean {
        /// Browser user-data directory
        #[arg(long)]
        browser: bool,

        /// Preprocessor download/transcode cache
        #[arg(long)]
        preprocessor: bool,

        /// Chunk intermediates
        #[arg(long)]
        synthesizer: bool,

        /// Local font cache
        #[arg(long)]
        fonts: bool,

        /// Everything
        #[arg(long)]
        all: bool,
    },

    /// Check system capabilities (browser, ffmpeg, ffprobe)
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    webreel_common::logging::init_logging(&webreel_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: cli.log_json,
    });

    match cli.command {
        Commands::Render {
            source,
            output,
            width,
            height,
            fps,
            duration,
            start_time,
            format,
            encoder,
            quality,
            bitrate,
            background_opacity,
            cover,
            compatible,
            allow_unsafe,
        } => {
            commands::render::run(commands::render::RenderArgs {
                source,
                output,
                width,
                height,
                fps,
                duration_ms: duration,
                start_time_ms: start_time,
                format,
                encoder,
                quality,
                bitrate_kbps: bitrate,
                background_opacity,
                cover,
                compatible,
                allow_unsafe,
            })
            .await
        }
        Commands::Clean {
            browser,
            preprocessor,
            synthesizer,
            fonts,
            all,
        } => commands::clean::run(browser, preprocessor, synthesizer, fonts, all),
        Commands::Check => commands::check::run(),
    }
}
