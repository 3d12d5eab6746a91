//! Webreel Page Runtime
//!
//! The in-page half of the capture system and its host-side bindings:
//! - **Script:** assembly of the injected bundle (clock shim, media
//!   adapter, capture loop) with the capture config and generated
//!   tables spliced in
//! - **Selectors/Proxy:** the media discovery and element-forwarding
//!   tables, kept in Rust so the JS can never drift from them
//! - **RPC:** the page ↔ host function surface and its wire types
//! - **Payload:** the length-prefixed JSON+binary envelope of the
//!   preprocessor RPC

pub mod payload;
pub mod proxy;
pub mod rpc;
pub mod script;
pub mod selectors;

pub use payload::{unpack, PayloadBuilder, UnpackedPayload};
pub use rpc::*;
pub use script::{CaptureScriptConfig, ScriptBundle, VendorLibrary};
