//! Fraktal Export Engine
//!
//! Renders a timeline range frame by frame through the accumulation
//! renderer and streams the frames into an encoder and container.
//!
//! ```text
//! SceneHost::scrub(frame) ── modulation offsets ── derived uniforms
//!                                                        │
//!                                 AccumulationRenderer (N samples)
//!                                                        │
//!                             downsample → tone map → flip rows
//!                                                        │
//!                        FrameEncoder ── MuxQueue ── MP4 / WebM sink
//! ```

pub mod context;
pub mod modulation;
pub mod progress;
pub mod session;

pub use context::{ExportContext, ModulationSource, NoModulation, SceneHost};
pub use modulation::{apply_modulation, derive_uniforms, rotation_matrix};
pub use progress::{ExportProgress, ExportStage, NullObserver, ProgressObserver};
pub use session::{ExportReport, ExportSession, SessionControl, SessionOutcome, SessionState, Tick};
