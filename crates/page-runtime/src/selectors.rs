//! The media element selector table.
//!
//! The adapter converts every element matching one of these selectors
//! into its dispatch-media variant. Generated into the injected script
//! from here so discovery and the MutationObserver use one table.

/// Dispatch media variants, wire-named for the JS side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    SvgAnimation,
    InnerAudio,
    VideoCanvas,
    DynamicImage,
    LottieCanvas,
}

impl MediaKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            MediaKind::SvgAnimation => "svg-animation",
            MediaKind::InnerAudio => "inner-audio",
            MediaKind::VideoCanvas => "video-canvas",
            MediaKind::DynamicImage => "dynamic-image",
            MediaKind::LottieCanvas => "lottie-canvas",
        }
    }
}

/// One selector → variant rule.
#[derive(Debug, Clone)]
pub struct SelectorRule {
    pub selector: String,
    pub kind: MediaKind,
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "aac"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv"];
const IMAGE_EXTENSIONS: &[&str] = &["gif", "webp", "apng"];

/// The full rule table, in match-priority order.
pub fn selector_rules() -> Vec<SelectorRule> {
    let mut rules = Vec::new();

    // SVGs qualify only when they contain SMIL animation elements; the
    // adapter applies that child filter after the selector match.
    rules.push(SelectorRule {
        selector: "svg".into(),
        kind: MediaKind::SvgAnimation,
    });

    push_source_rules(&mut rules, "audio", AUDIO_EXTENSIONS, MediaKind::InnerAudio);
    rules.push(SelectorRule {
        selector: "audio[capture]".into(),
        kind: MediaKind::InnerAudio,
    });

    push_source_rules(&mut rules, "video", VIDEO_EXTENSIONS, MediaKind::VideoCanvas);
    rules.push(SelectorRule {
        selector: "video[capture]".into(),
        kind: MediaKind::VideoCanvas,
    });
    rules.push(SelectorRule {
        selector: "canvas[video-capture]".into(),
        kind: MediaKind::VideoCanvas,
    });

    push_source_rules(&mut rules, "img", IMAGE_EXTENSIONS, MediaKind::DynamicImage);
    rules.push(SelectorRule {
        selector: "img[capture]".into(),
        kind: MediaKind::DynamicImage,
    });
    rules.push(SelectorRule {
        selector: "canvas[dyimage-capture]".into(),
        kind: MediaKind::DynamicImage,
    });

    rules.push(SelectorRule {
        selector: "lottie".into(),
        kind: MediaKind::LottieCanvas,
    });
    rules.push(SelectorRule {
        selector: "canvas[lottie-capture]".into(),
        kind: MediaKind::LottieCanvas,
    });

    rules
}

/// `tag[src$=".ext"]` plus the query-string variant `tag[src*=".ext?"]`.
fn push_source_rules(rules: &mut Vec<SelectorRule>, tag: &str, exts: &[&str], kind: MediaKind) {
    for ext in exts {
        rules.push(SelectorRule {
            selector: format!("{tag}[src$=\".{ext}\"]"),
            kind,
        });
        rules.push(SelectorRule {
            selector: format!("{tag}[src*=\".{ext}?\"]"),
            kind,
        });
    }
}

/// Render the table as a JS prelude consumed by the media adapter.
pub fn to_js() -> String {
    let entries: Vec<String> = selector_rules()
        .iter()
        .map(|rule| {
            format!(
                "{{selector:{},kind:\"{}\"}}",
                serde_json::to_string(&rule.selector).expect("selector strings serialize"),
                rule.kind.wire_name()
            )
        })
        .collect();
    format!("window.____mediaSelectors = [{}];\n", entries.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_variant() {
        let rules = selector_rules();
        for kind in [
            MediaKind::SvgAnimation,
            MediaKind::InnerAudio,
            MediaKind::VideoCanvas,
            MediaKind::DynamicImage,
            MediaKind::LottieCanvas,
        ] {
            assert!(rules.iter().any(|r| r.kind == kind));
        }
    }

    #[test]
    fn source_rules_include_query_variants() {
        let rules = selector_rules();
        assert!(rules
            .iter()
            .any(|r| r.selector == "video[src$=\".webm\"]" && r.kind == MediaKind::VideoCanvas));
        assert!(rules
            .iter()
            .any(|r| r.selector == "video[src*=\".webm?\"]"));
        assert!(rules.iter().any(|r| r.selector == "img[src$=\".apng\"]"));
        assert!(rules.iter().any(|r| r.selector == "audio[src*=\".ogg?\"]"));
    }

    #[test]
    fn capture_attribute_overrides_are_present() {
        let rules = selector_rules();
        for sel in [
            "audio[capture]",
            "video[capture]",
            "img[capture]",
            "canvas[video-capture]",
            "canvas[dyimage-capture]",
            "canvas[lottie-capture]",
        ] {
            assert!(rules.iter().any(|r| r.selector == sel), "missing {sel}");
        }
    }

    #[test]
    fn generated_js_is_one_table_literal() {
        let js = to_js();
        assert!(js.starts_with("window.____mediaSelectors = ["));
        assert!(js.contains("\"video-canvas\""));
        assert!(js.contains("lottie"));
    }
}
