//! Collaborators an export session works through.
//!
//! The session never reaches for global state; the scene, the render
//! device, the modulation source and the progress observer are handed to
//! it in one [`ExportContext`].

use std::collections::BTreeMap;

use fraktal_project_model::scene::{SceneDescription, SceneSnapshot};
use fraktal_project_model::uniform::UniformValue;
use fraktal_render_engine::RenderDevice;

use crate::progress::{NullObserver, ProgressObserver};

/// The live scene being exported.
pub trait SceneHost: Send {
    /// Move the timeline to `frame` and evaluate every animated value.
    fn scrub(&mut self, frame: i64);

    /// Uniform values at the current timeline position.
    fn uniforms(&self) -> BTreeMap<String, UniformValue>;

    /// Capture the user-visible state (timeline frame, camera, playback).
    fn snapshot(&self) -> SceneSnapshot;

    /// Put back state captured by [`SceneHost::snapshot`].
    fn restore(&mut self, snapshot: &SceneSnapshot);

    /// Serializable description of the current scene.
    fn describe(&self) -> SceneDescription;
}

/// Per-frame offsets layered over the scrubbed uniform values (audio
/// reactivity, LFOs and the like).
///
/// Keys are a uniform name, optionally followed by a component suffix:
/// `uZoom`, `uCenter.x`, `uColor.b`.
pub trait ModulationSource: Send {
    fn offsets(&self, frame: i64) -> BTreeMap<String, f64>;
}

/// A modulation source that never offsets anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoModulation;

impl ModulationSource for NoModulation {
    fn offsets(&self, _frame: i64) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Everything an [`crate::ExportSession`] needs from its surroundings.
pub struct ExportContext {
    pub scene: Box<dyn SceneHost>,
    pub device: Box<dyn RenderDevice>,
    pub modulation: Box<dyn ModulationSource>,
    pub observer: Box<dyn ProgressObserver>,
    /// Present each accumulated sample on the display surface.
    pub mirror_to_display: bool,
}

impl ExportContext {
    /// Context with no modulation, no observer and no display mirroring.
    pub fn new(scene: Box<dyn SceneHost>, device: Box<dyn RenderDevice>) -> Self {
        Self {
            scene,
            device,
            modulation: Box::new(NoModulation),
            observer: Box::new(NullObserver),
            mirror_to_display: false,
        }
    }

    pub fn with_modulation(mut self, modulation: Box<dyn ModulationSource>) -> Self {
        self.modulation = modulation;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_display_mirror(mut self, enabled: bool) -> Self {
        self.mirror_to_display = enabled;
        self
    }
}

impl std::fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportContext")
            .field("device", &self.device.name())
            .field("mirror_to_display", &self.mirror_to_display)
            .finish_non_exhaustive()
    }
}
