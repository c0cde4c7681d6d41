//! Fraktal Common Utilities
//!
//! Shared infrastructure for all Fraktal crates:
//! - Error types and result aliases
//! - Clock, timestamp, and ETA utilities for render sessions
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
