//! Webreel Media Preprocessor
//!
//! Host-side downloader and transcoder behind the page's
//! `POST /api/video_preprocess` RPC:
//!
//! ```text
//! VideoConfig ──▶ download (CRC32 cache, per-URL lock)
//!                    │
//!                    ├── WebM? ──▶ H.264 transcode
//!                    ├── alpha? ─▶ mask extraction
//!                    ├── audio? ─▶ MP3 demux ──▶ AudioDescriptor
//!                    └── clip?  ─▶ fragmented in-memory re-clip
//!                    ▼
//!              packed payload (len!JSON+blobs) back to the page
//! ```
//!
//! Downloads and transcodes are bounded by separate semaphores.

pub mod download;
pub mod probe;
pub mod service;
pub mod transcode;

pub use download::{cache_key, DownloadCache};
pub use service::{Preprocessor, ProcessedMedia};
