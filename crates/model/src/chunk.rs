//! Per-scene chunk intermediates and splicing arithmetic.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use webreel_common::{timebase, WebreelError, WebreelResult};

use crate::{AudioDescriptor, Transition, VideoEncoder};

/// One scene of a multi-scene render, encoded as an MPEG-TS
/// intermediate and later spliced with its neighbors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoChunk {
    /// Where the chunk's MPEG-TS lands.
    pub output_path: PathBuf,

    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Scene duration, milliseconds.
    pub duration_ms: f64,

    /// Must be chunk-eligible (H.264/H.265/VP9).
    pub video_encoder: VideoEncoder,

    /// Transition into the next chunk, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,

    /// Audio tracks collected while the chunk rendered, in local
    /// (chunk-relative) time.
    #[serde(default)]
    pub audios: Vec<AudioDescriptor>,
}

impl VideoChunk {
    /// The chunk's contribution to the composite timeline: the
    /// transition overlaps the next chunk.
    pub fn effective_duration_ms(&self) -> f64 {
        match &self.transition {
            Some(t) => (self.duration_ms - t.duration_ms).max(0.0),
            None => self.duration_ms,
        }
    }

    pub fn frame_count(&self) -> u64 {
        timebase::frame_count(self.duration_ms, self.fps)
    }

    pub fn validate(&self) -> WebreelResult<()> {
        if !self.video_encoder.chunk_eligible() {
            return Err(WebreelError::config(format!(
                "encoder {} cannot produce chunk intermediates (H.264/H.265/VP9 only)",
                self.video_encoder.ffmpeg_name()
            )));
        }
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(WebreelError::config(format!(
                "chunk duration {} is not a positive finite number",
                self.duration_ms
            )));
        }
        for audio in &self.audios {
            audio.validate()?;
        }
        Ok(())
    }
}

/// Validate a chunk sequence: shared geometry and sane transitions.
///
/// A transition longer than either neighboring scene cannot overlap
/// correctly and is rejected up front.
pub fn validate_sequence(chunks: &[VideoChunk]) -> WebreelResult<()> {
    let Some(first) = chunks.first() else {
        return Err(WebreelError::config("chunk sequence is empty"));
    };
    for chunk in chunks {
        chunk.validate()?;
        if (chunk.width, chunk.height, chunk.fps) != (first.width, first.height, first.fps) {
            return Err(WebreelError::config(format!(
                "chunk geometry {}x{}@{} differs from sequence geometry {}x{}@{}",
                chunk.width, chunk.height, chunk.fps, first.width, first.height, first.fps
            )));
        }
    }
    for pair in chunks.windows(2) {
        if let Some(t) = &pair[0].transition {
            let shortest = pair[0].duration_ms.min(pair[1].duration_ms);
            if t.duration_ms > shortest {
                return Err(WebreelError::config(format!(
                    "transition {} of {}ms exceeds the shorter neighbor scene ({}ms)",
                    t.id.token(),
                    t.duration_ms,
                    shortest
                )));
            }
        }
    }
    if chunks
        .last()
        .and_then(|c| c.transition.as_ref())
        .is_some()
    {
        return Err(WebreelError::config(
            "last chunk carries a transition but has no successor",
        ));
    }
    Ok(())
}

/// Cumulative effective offset of each chunk on the composite timeline.
pub fn cumulative_offsets_ms(chunks: &[VideoChunk]) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut acc = 0.0;
    for chunk in chunks {
        offsets.push(acc);
        acc += chunk.effective_duration_ms();
    }
    offsets
}

/// Total composite duration after splicing.
pub fn total_duration_ms(chunks: &[VideoChunk]) -> f64 {
    chunks.iter().map(|c| c.effective_duration_ms()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransitionId;

    fn chunk(duration_ms: f64, transition: Option<Transition>) -> VideoChunk {
        VideoChunk {
            output_path: PathBuf::from("/tmp/chunk.ts"),
            width: 1280,
            height: 720,
            fps: 30,
            duration_ms,
            video_encoder: VideoEncoder::Libx264,
            transition,
            audios: Vec::new(),
        }
    }

    #[test]
    fn effective_duration_subtracts_transition() {
        let c = chunk(5000.0, Some(Transition::new(TransitionId::Fade, 1000.0)));
        assert_eq!(c.effective_duration_ms(), 4000.0);
        assert_eq!(chunk(5000.0, None).effective_duration_ms(), 5000.0);
    }

    #[test]
    fn spliced_duration_is_sum_minus_transitions() {
        // 5s -fade(1s)-> 5s composes to 9s.
        let chunks = vec![
            chunk(5000.0, Some(Transition::new(TransitionId::Fade, 1000.0))),
            chunk(5000.0, None),
        ];
        validate_sequence(&chunks).unwrap();
        assert_eq!(total_duration_ms(&chunks), 9000.0);
        assert_eq!(cumulative_offsets_ms(&chunks), vec![0.0, 4000.0]);
    }

    #[test]
    fn oversized_transition_fails_validation() {
        let chunks = vec![
            chunk(5000.0, Some(Transition::new(TransitionId::Fade, 3000.0))),
            chunk(2000.0, None),
        ];
        assert!(validate_sequence(&chunks).is_err());
    }

    #[test]
    fn trailing_transition_fails_validation() {
        let chunks = vec![chunk(5000.0, Some(Transition::new(TransitionId::Fade, 500.0)))];
        assert!(validate_sequence(&chunks).is_err());
    }

    #[test]
    fn vp8_chunks_are_rejected() {
        let mut c = chunk(1000.0, None);
        c.video_encoder = VideoEncoder::Libvpx;
        assert!(c.validate().is_err());
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let mut b = chunk(1000.0, None);
        b.width = 1920;
        let chunks = vec![chunk(1000.0, None), b];
        assert!(validate_sequence(&chunks).is_err());
    }
}
