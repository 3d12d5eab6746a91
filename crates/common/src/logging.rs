//! Tracing initialization.
//!
//! One subscriber for the whole process. The filter directive comes
//! from `WEBREEL_LOG` when set, falling back to the configured level,
//! so a deployed CLI can be made verbose without a config edit.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) {
    let filter = std::env::var("WEBREEL_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    // A pre-installed subscriber (tests, embedders) wins.
    installed.ok();
}
