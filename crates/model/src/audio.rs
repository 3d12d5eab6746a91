//! Audio track descriptors.
//!
//! Pages register audio through the `addAudio` binding; the preprocessor
//! registers demuxed video audio. Either way the descriptor ends up in
//! the mixer's filter graph. Field names are camelCase on the wire
//! because the in-page adapter emits them as plain JS objects.

use serde::{Deserialize, Serialize};
use webreel_common::{WebreelError, WebreelResult};

/// One audio track on the composite timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDescriptor {
    /// Registration id, unique within a run.
    pub id: u64,

    /// Local path or URL of the audio source.
    pub source: String,

    /// Timeline placement, milliseconds.
    pub start_time: f64,
    pub end_time: f64,

    /// Known source duration in milliseconds, when probed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Loop the source until `end_time`.
    #[serde(default, rename = "loop")]
    pub loop_: bool,

    /// Volume percentage, 0..=100.
    #[serde(default = "default_volume")]
    pub volume: f64,

    /// Clip of the source to play, milliseconds into the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_end: Option<f64>,

    /// Fade envelope, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_in_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_out_duration: Option<f64>,
}

fn default_volume() -> f64 {
    100.0
}

impl AudioDescriptor {
    pub fn validate(&self) -> WebreelResult<()> {
        if self.start_time > self.end_time {
            return Err(WebreelError::config(format!(
                "audio {}: startTime {} exceeds endTime {}",
                self.id, self.start_time, self.end_time
            )));
        }
        if let (Some(s), Some(e)) = (self.seek_start, self.seek_end) {
            if s > e {
                return Err(WebreelError::config(format!(
                    "audio {}: seekStart {s} exceeds seekEnd {e}",
                    self.id
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.volume) {
            return Err(WebreelError::config(format!(
                "audio {}: volume {} outside 0..=100",
                self.id, self.volume
            )));
        }
        Ok(())
    }

    /// Shift the timeline placement by `offset_ms` (chunk splicing).
    pub fn offset_by(&self, offset_ms: f64) -> AudioDescriptor {
        let mut shifted = self.clone();
        shifted.start_time += offset_ms;
        shifted.end_time += offset_ms;
        shifted
    }

    /// Clamp an unbounded end time to the scene duration.
    pub fn clamp_end(&mut self, duration_ms: f64) {
        if !self.end_time.is_finite() || self.end_time > duration_ms {
            self.end_time = duration_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> AudioDescriptor {
        AudioDescriptor {
            id: 1,
            source: "/tmp/a.mp3".into(),
            start_time: 1000.0,
            end_time: 6000.0,
            duration: None,
            loop_: false,
            volume: 50.0,
            seek_start: Some(2000.0),
            seek_end: Some(4000.0),
            fade_in_duration: Some(500.0),
            fade_out_duration: None,
        }
    }

    #[test]
    fn wire_names_are_camel_case() {
        let json = serde_json::to_value(descriptor()).unwrap();
        assert!(json.get("startTime").is_some());
        assert!(json.get("seekStart").is_some());
        assert!(json.get("fadeInDuration").is_some());
        assert!(json.get("loop").is_some());
    }

    #[test]
    fn validate_rejects_inverted_ranges() {
        let mut d = descriptor();
        d.seek_start = Some(5000.0);
        assert!(d.validate().is_err());

        let mut d = descriptor();
        d.start_time = 7000.0;
        assert!(d.validate().is_err());

        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn offset_shifts_both_endpoints() {
        let shifted = descriptor().offset_by(4000.0);
        assert_eq!(shifted.start_time, 5000.0);
        assert_eq!(shifted.end_time, 10000.0);
    }

    #[test]
    fn infinite_end_time_clamps_to_duration() {
        let mut d = descriptor();
        d.end_time = f64::INFINITY;
        d.clamp_end(8000.0);
        assert_eq!(d.end_time, 8000.0);
    }
}
