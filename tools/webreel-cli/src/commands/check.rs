//! The check command: report system capabilities.

use webreel_common::EngineConfig;
use webreel_preprocessor::transcode::command_exists;

pub fn run() -> anyhow::Result<()> {
    let config = EngineConfig::load();

    let browser = webreel_browser::launch::find_browser(&config);
    match &browser {
        Some(path) => println!("browser:  {}", path.display()),
        None => println!("browser:  NOT FOUND (set WEBREEL_BROWSER_PATH)"),
    }

    println!(
        "ffmpeg:   {}",
        if command_exists("ffmpeg") { "ok" } else { "NOT FOUND" }
    );
    println!(
        "ffprobe:  {}",
        if command_exists("ffprobe") { "ok" } else { "NOT FOUND" }
    );
    println!("workdir:  {}", config.workdir.display());
    println!(
        "pool:     {}x{} browsers, {}x{} pages",
        config.pool.num_browser_min,
        config.pool.num_browser_max,
        config.pool.num_page_min,
        config.pool.num_page_max
    );
    println!(
        "render:   {}",
        if config.compatible_render_mode {
            "compatible (Page.captureScreenshot)"
        } else {
            "beginFrame"
        }
    );

    if browser.is_none() || !command_exists("ffmpeg") {
        anyhow::bail!("missing required binaries");
    }
    Ok(())
}
