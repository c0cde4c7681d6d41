//! Export progress reporting.

use serde::Serialize;

/// Stages of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Rendering,
    Paused,
    Finalizing,
    Complete,
    Cancelled,
    Failed,
}

/// Export progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Whether frames are still being produced.
    pub is_rendering: bool,

    /// Overall progress in percent, `0..=100`, counting samples.
    pub progress: f64,

    /// Output frame currently being accumulated.
    pub frame_index: u64,

    /// Frames handed to the encoder so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds, once a frame has completed.
    pub eta_secs: Option<f64>,

    /// Current stage.
    pub stage: ExportStage,
}

/// Receives progress updates from a running export.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, progress: &ExportProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ExportProgress) + Send,
{
    fn on_progress(&mut self, progress: &ExportProgress) {
        self(progress)
    }
}

/// Observer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&mut self, _progress: &ExportProgress) {}
}

/// Percent complete after `frames` whole frames plus `samples` samples of
/// the next one.
pub fn percent_complete(
    frames: u64,
    samples: u32,
    samples_per_frame: u32,
    total_frames: u64,
) -> f64 {
    let per_frame = samples_per_frame.max(1) as f64;
    let total = total_frames as f64 * per_frame;
    if total <= 0.0 {
        return 100.0;
    }
    ((frames as f64 * per_frame + samples as f64) / total * 100.0).clamp(0.0, 100.0)
}
