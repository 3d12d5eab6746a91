//! On-disk working tree layout and clean operations.
//!
//! Everything webreel persists between runs lives under one workdir:
//!
//! ```text
//! <workdir>/
//!   browser/                      shared Chromium user-data directory
//!   preprocessor/<crc32>.mp4      downloaded media, CRC32(url)-keyed
//!   preprocessor/<crc32>.mp3      demuxed audio
//!   preprocessor/<crc32>_mask.mp4 extracted alpha plane
//!   synthesizer/chunk_*.ts        per-scene MPEG-TS intermediates
//!   local_font/<host>/<path>      fetched font files
//! ```
//!
//! Each subtree has a dedicated clean operation; all are idempotent.

use std::path::{Path, PathBuf};

use crate::error::WebreelResult;

/// Resolved layout of the working tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chromium user-data directory, shared across runs.
    pub fn browser_dir(&self) -> PathBuf {
        self.root.join("browser")
    }

    /// Download/transcode cache of the media preprocessor.
    pub fn preprocessor_dir(&self) -> PathBuf {
        self.root.join("preprocessor")
    }

    /// Per-scene chunk intermediates.
    pub fn synthesizer_dir(&self) -> PathBuf {
        self.root.join("synthesizer")
    }

    /// Local font cache, mirrored by origin host.
    pub fn local_font_dir(&self) -> PathBuf {
        self.root.join("local_font")
    }

    /// Path a cached font is served from for `GET /local_font/<host>/<path>`.
    pub fn font_path(&self, host: &str, path: &str) -> PathBuf {
        self.local_font_dir()
            .join(host)
            .join(path.trim_start_matches('/'))
    }

    /// Create every subtree that does not exist yet.
    pub fn ensure(&self) -> WebreelResult<()> {
        for dir in [
            self.browser_dir(),
            self.preprocessor_dir(),
            self.synthesizer_dir(),
            self.local_font_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn clean_browser(&self) -> WebreelResult<()> {
        remove_subtree(&self.browser_dir())
    }

    pub fn clean_preprocessor(&self) -> WebreelResult<()> {
        remove_subtree(&self.preprocessor_dir())
    }

    pub fn clean_synthesizer(&self) -> WebreelResult<()> {
        remove_subtree(&self.synthesizer_dir())
    }

    pub fn clean_local_fonts(&self) -> WebreelResult<()> {
        remove_subtree(&self.local_font_dir())
    }

    /// Clean every subtree.
    pub fn clean_all(&self) -> WebreelResult<()> {
        self.clean_browser()?;
        self.clean_preprocessor()?;
        self.clean_synthesizer()?;
        self.clean_local_fonts()
    }
}

fn remove_subtree(dir: &Path) -> WebreelResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_all_subtrees() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("work"));
        ws.ensure().unwrap();
        assert!(ws.browser_dir().is_dir());
        assert!(ws.preprocessor_dir().is_dir());
        assert!(ws.synthesizer_dir().is_dir());
        assert!(ws.local_font_dir().is_dir());
    }

    #[test]
    fn clean_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("work"));
        ws.ensure().unwrap();
        std::fs::write(ws.preprocessor_dir().join("12345.mp4"), b"x").unwrap();

        ws.clean_preprocessor().unwrap();
        assert!(!ws.preprocessor_dir().exists());
        // Second clean of a missing tree is a no-op, not an error.
        ws.clean_preprocessor().unwrap();
    }

    #[test]
    fn font_path_nests_host_then_path() {
        let ws = Workspace::new("/tmp/webreel");
        let p = ws.font_path("fonts.example.com", "/woff2/Inter.woff2");
        assert_eq!(
            p,
            PathBuf::from("/tmp/webreel/local_font/fonts.example.com/woff2/Inter.woff2")
        );
    }
}
