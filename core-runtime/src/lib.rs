//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the prefetch core:
//! - Logging and tracing infrastructure
//! - Event bus carrying preload and cache events
//! - Shared runtime error type
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions (including redaction of signed
//! media URLs) and the event broadcasting mechanism used throughout the
//! system.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
