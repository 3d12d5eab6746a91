//! Webreel Browser Engine
//!
//! Drives headless Chromium for deterministic capture:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 BrowserEngine                   │
//! │  ┌───────────── browser pool ───────────────┐  │
//! │  │  BrowserDriver        BrowserDriver       │  │
//! │  │  ┌─ page pool ─┐      ┌─ page pool ─┐     │  │
//! │  │  │ PageDriver  │      │ PageDriver  │     │  │
//! │  │  │ PageDriver  │      │ PageDriver  │     │  │
//! │  │  └─────────────┘      └─────────────┘     │  │
//! │  └───────────────────────────────────────────┘  │
//! │   script injection · beginFrame · interception  │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Pages run the injected capture runtime; every frame request, media
//! preprocess call, and audio registration comes back through the
//! drivers in this crate.

pub mod browser;
pub mod launch;
pub mod page;
pub mod pool;

pub use browser::{BrowserDriver, BrowserEngine, BrowserState, EnginePageLease};
pub use page::{
    AnimationTracker, CaptureOutcome, PageDriver, PageState, TimeAction, TimeActionPolicy,
};
pub use pool::{PageLease, ResourcePool, TwoTierPool};
