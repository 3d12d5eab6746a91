//! Render progress reporting.

/// Progress callback for render jobs.
pub type ProgressCallback = Box<dyn Fn(RenderProgress) + Send + Sync>;

/// Progress report emitted by the synthesizer.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    /// Overall progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered so far across all chunks.
    pub frames_rendered: u64,

    /// Total frames across all chunks.
    pub total_frames: u64,

    /// Current stage.
    pub stage: RenderStage,
}

/// Stages of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Preparing,
    Rendering,
    Splicing,
    Mixing,
    Complete,
    Failed,
}

/// Weighting of the two phases: chunk rendering is 95% of overall
/// progress, the splice+mix pass the remaining 5%.
const CHUNK_WEIGHT: f64 = 0.95;

/// Overall ratio while chunks render.
pub fn chunk_progress(frames_rendered: u64, total_frames: u64) -> f64 {
    if total_frames == 0 {
        return 0.0;
    }
    CHUNK_WEIGHT * (frames_rendered as f64 / total_frames as f64).min(1.0)
}

/// Overall ratio while the final pass runs, `mix_ratio` in [0,1].
pub fn mix_progress(mix_ratio: f64) -> f64 {
    CHUNK_WEIGHT + (1.0 - CHUNK_WEIGHT) * mix_ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_stage_tops_out_at_95_percent() {
        assert_eq!(chunk_progress(0, 300), 0.0);
        assert!((chunk_progress(150, 300) - 0.475).abs() < 1e-9);
        assert!((chunk_progress(300, 300) - 0.95).abs() < 1e-9);
        assert!((chunk_progress(400, 300) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn mix_stage_fills_the_last_5_percent() {
        assert!((mix_progress(0.0) - 0.95).abs() < 1e-9);
        assert!((mix_progress(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_total_frames_reports_zero() {
        assert_eq!(chunk_progress(10, 0), 0.0);
    }
}
