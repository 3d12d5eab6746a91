//! The clean command: empty the on-disk caches.

use webreel_common::{EngineConfig, Workspace};

pub fn run(
    browser: bool,
    preprocessor: bool,
    synthesizer: bool,
    fonts: bool,
    all: bool,
) -> anyhow::Result<()> {
    let config = EngineConfig::load();
    let workspace = Workspace::new(&config.workdir);

    let nothing_selected = !(browser || preprocessor || synthesizer || fonts || all);
    if nothing_selected {
        println!("nothing selected; use --browser/--preprocessor/--synthesizer/--fonts or --all");
        return Ok(());
    }

    if all || browser {
        workspace.clean_browser()?;
        println!("cleaned {}", workspace.browser_dir().display());
    }
    if all || preprocessor {
        workspace.clean_preprocessor()?;
        println!("cleaned {}", workspace.preprocessor_dir().display());
    }
    if all || synthesizer {
        workspace.clean_synthesizer()?;
        println!("cleaned {}", workspace.synthesizer_dir().display());
    }
    if all || fonts {
        workspace.clean_local_fonts()?;
        println!("cleaned {}", workspace.local_font_dir().display());
    }
    Ok(())
}
