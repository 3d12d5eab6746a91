//! Webreel Render Model
//!
//! Defines the core data contracts for webreel renders:
//! - **Formats:** output containers, the video/audio encoder vocabulary
//! - **Transitions:** the Xfade vocabulary used between scenes
//! - **Audio:** audio track descriptors emitted by pages and mixed host-side
//! - **Chunks:** per-scene intermediate bitstreams and their splicing rules
//! - **Jobs:** the per-scene render configuration with up-front validation
//!
//! Times are milliseconds unless a field name says otherwise; volumes are
//! `0..=100` percentages.

pub mod audio;
pub mod chunk;
pub mod formats;
pub mod job;
pub mod transition;

pub use audio::*;
pub use chunk::*;
pub use formats::*;
pub use job::*;
pub use transition::*;
