//! Fraktal Project Model
//!
//! Defines the core data contracts shared by the render and export crates:
//! - **Export:** Immutable per-session export configuration, codec and container selection
//! - **Quality:** Adaptive sampling policy for tiled renders
//! - **Region:** Pixel and normalized rectangles used for tiles and active-region uniforms
//! - **Scene:** Restore snapshots and the scene description embedded in still images
//! - **Uniform:** Typed shader uniform values
//!
//! Pixel rectangles use the device convention: origin at the bottom-left,
//! rows counted upward.

pub mod export;
pub mod quality;
pub mod region;
pub mod scene;
pub mod uniform;

pub use export::*;
pub use quality::*;
pub use region::*;
pub use scene::*;
pub use uniform::*;
