//! Webreel Render Engine
//!
//! Offline encoding pipeline turning captured frame streams into final
//! video files:
//!
//! ```text
//! frames ──▶ FrameEncoder ──▶ chunk_0.ts ─┐
//! frames ──▶ FrameEncoder ──▶ chunk_1.ts ─┤
//!                                         ├─ splice (concat / xfade)
//!                                         ▼
//!                                  spliced (video only)
//!                                         │
//! audio descriptors ──────────────────────┤
//!                                         ▼
//!                                  AudioMixer (amix + fades)
//!                                         │
//!                                         ▼
//!                                     output file
//! ```

pub mod audio_mixer;
pub mod frame_encoder;
pub mod progress;
pub mod synthesizer;

pub use frame_encoder::{EncoderOutput, EncoderSettings, FrameEncoder};
pub use progress::{ProgressCallback, RenderProgress, RenderStage};
pub use synthesizer::{ChunkSynthesizer, SynthesizerConfig};
