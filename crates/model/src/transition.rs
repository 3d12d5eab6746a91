//! Scene transitions, forwarded to ffmpeg's xfade filter.

use serde::{Deserialize, Serialize};
use webreel_common::{WebreelError, WebreelResult};

/// The xfade transition vocabulary.
///
/// Every variant serializes to the exact token xfade expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionId {
    Fade,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    CircleCrop,
    RectCrop,
    Distance,
    FadeBlack,
    FadeWhite,
    Radial,
    SmoothLeft,
    SmoothRight,
    SmoothUp,
    SmoothDown,
    CircleOpen,
    CircleClose,
    VertOpen,
    VertClose,
    HorzOpen,
    HorzClose,
    Dissolve,
    Pixelize,
    DiagTl,
    DiagTr,
    DiagBl,
    DiagBr,
    HlSlice,
    HrSlice,
    VuSlice,
    VdSlice,
    HBlur,
    FadeGrays,
    WipeTl,
    WipeTr,
    WipeBl,
    WipeBr,
    SqueezeH,
    SqueezeV,
    ZoomIn,
    HlWind,
    HrWind,
    VuWind,
    VdWind,
    CoverLeft,
    CoverRight,
    CoverUp,
    CoverDown,
    RevealLeft,
    RevealRight,
    RevealUp,
    RevealDown,
}

impl TransitionId {
    /// The token passed as `xfade=transition=<token>`.
    pub fn token(self) -> &'static str {
        match self {
            TransitionId::Fade => "fade",
            TransitionId::WipeLeft => "wipeleft",
            TransitionId::WipeRight => "wiperight",
            TransitionId::WipeUp => "wipeup",
            TransitionId::WipeDown => "wipedown",
            TransitionId::SlideLeft => "slideleft",
            TransitionId::SlideRight => "slideright",
            TransitionId::SlideUp => "slideup",
            TransitionId::SlideDown => "slidedown",
            TransitionId::CircleCrop => "circlecrop",
            TransitionId::RectCrop => "rectcrop",
            TransitionId::Distance => "distance",
            TransitionId::FadeBlack => "fadeblack",
            TransitionId::FadeWhite => "fadewhite",
            TransitionId::Radial => "radial",
            TransitionId::SmoothLeft => "smoothleft",
            TransitionId::SmoothRight => "smoothright",
            TransitionId::SmoothUp => "smoothup",
            TransitionId::SmoothDown => "smoothdown",
            TransitionId::CircleOpen => "circleopen",
            TransitionId::CircleClose => "circleclose",
            TransitionId::VertOpen => "vertopen",
            TransitionId::VertClose => "vertclose",
            TransitionId::HorzOpen => "horzopen",
            TransitionId::HorzClose => "horzclose",
            TransitionId::Dissolve => "dissolve",
            TransitionId::Pixelize => "pixelize",
            TransitionId::DiagTl => "diagtl",
            TransitionId::DiagTr => "diagtr",
            TransitionId::DiagBl => "diagbl",
            TransitionId::DiagBr => "diagbr",
            TransitionId::HlSlice => "hlslice",
            TransitionId::HrSlice => "hrslice",
            TransitionId::VuSlice => "vuslice",
            TransitionId::VdSlice => "vdslice",
            TransitionId::HBlur => "hblur",
            TransitionId::FadeGrays => "fadegrays",
            TransitionId::WipeTl => "wipetl",
            TransitionId::WipeTr => "wipetr",
            TransitionId::WipeBl => "wipebl",
            TransitionId::WipeBr => "wipebr",
            TransitionId::SqueezeH => "squeezeh",
            TransitionId::SqueezeV => "squeezev",
            TransitionId::ZoomIn => "zoomin",
            TransitionId::HlWind => "hlwind",
            TransitionId::HrWind => "hrwind",
            TransitionId::VuWind => "vuwind",
            TransitionId::VdWind => "vdwind",
            TransitionId::CoverLeft => "coverleft",
            TransitionId::CoverRight => "coverright",
            TransitionId::CoverUp => "coverup",
            TransitionId::CoverDown => "coverdown",
            TransitionId::RevealLeft => "revealleft",
            TransitionId::RevealRight => "revealright",
            TransitionId::RevealUp => "revealup",
            TransitionId::RevealDown => "revealdown",
        }
    }

    pub fn parse(s: &str) -> WebreelResult<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
            .map_err(|_| WebreelError::config(format!("unknown transition '{s}'")))
    }
}

/// A transition between one chunk and its successor. The transition
/// overlaps the next chunk, so the chunk's contribution to the composite
/// timeline is `duration - transition.duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub duration_ms: f64,
}

impl Transition {
    pub fn new(id: TransitionId, duration_ms: f64) -> Self {
        Self { id, duration_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_serde_names() {
        for id in [
            TransitionId::Fade,
            TransitionId::WipeTl,
            TransitionId::SmoothDown,
            TransitionId::HlSlice,
            TransitionId::SqueezeV,
            TransitionId::RevealDown,
            TransitionId::CircleCrop,
        ] {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.token()));
        }
    }

    #[test]
    fn parse_accepts_xfade_tokens() {
        assert_eq!(
            TransitionId::parse("circleopen").unwrap(),
            TransitionId::CircleOpen
        );
        assert_eq!(TransitionId::parse("FADE").unwrap(), TransitionId::Fade);
        assert!(TransitionId::parse("spiral").is_err());
    }
}
