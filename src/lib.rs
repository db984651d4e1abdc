//! Workspace umbrella crate.
//!
//! Re-exports the prefetch cache subsystem so host applications can depend on
//! `media-prefetch-workspace` and pick a feature set (`desktop-shims` for the
//! reqwest/desktop bridges, `headless` to inject their own) without wiring
//! each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_playback::*;
