//! Frame-accurate export session.
//!
//! A session renders output frames strictly one after another. Each frame
//! scrubs the scene to its timeline position, accumulates a fixed number of
//! samples, and is handed to the encoder with a timestamp derived from its
//! index. Control requests (pause, resume, cancel, stitch) are recorded
//! immediately and take effect at the start of the next tick.
//!
//! The scene state captured at start is put back exactly once, whichever
//! way the session ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fraktal_bitstream::FormatStrategy;
use fraktal_common::clock::{frame_duration_us, frame_timestamp_us, EtaEstimator};
use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_encode_engine::{
    ContainerWriter, EncoderConfig, ExportArtifact, FrameEncoder, MuxQueue, MuxSummary,
    OutputSink, OutputTarget, SinkMode, TrackParams, VideoFrame,
};
use fraktal_project_model::export::{BitrateMode, ExportConfig};
use fraktal_project_model::scene::SceneSnapshot;
use fraktal_render_engine::postprocess::to_rgba8_top_down;
use fraktal_render_engine::AccumulationRenderer;

use crate::context::ExportContext;
use crate::modulation::{apply_modulation, derive_uniforms};
use crate::progress::{percent_complete, ExportProgress, ExportStage};

/// Lifecycle of an export session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No export running.
    Idle,
    /// Producing frames.
    Rendering,
    /// Frames paused; encoder and muxer stay open.
    Paused,
    /// Tearing down and discarding output.
    StoppingCancel,
    /// Draining the encoder and finalizing the container.
    StoppingStitch,
    /// Terminal; resources released and scene restored.
    Finished,
}

/// A completed export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub artifact: ExportArtifact,
    pub sink_mode: SinkMode,
    pub summary: MuxSummary,
    /// Frames handed to the encoder.
    pub frames: u64,
    /// Rate control the encoder actually used.
    pub bitrate_mode: BitrateMode,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(ExportReport),
    Cancelled,
}

/// What a single [`ExportSession::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// One sample was accumulated into the current frame.
    Sampled { frame: u64, sample: u32 },
    /// The current frame reached its sample count and went to the encoder.
    FrameEncoded { frame: u64, timestamp_us: i64 },
    /// Nothing to do while paused.
    Paused,
    /// The session reached [`SessionState::Finished`].
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Pause,
    Resume,
    Cancel,
    Stitch,
}

/// Handle for steering a session from elsewhere (a signal handler, a UI
/// thread) while [`ExportSession::run`] owns it.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    request: Arc<Mutex<Option<Request>>>,
    cancel_flag: Arc<AtomicBool>,
}

impl SessionControl {
    fn set(&self, request: Request) {
        if let Ok(mut slot) = self.request.lock() {
            // A cancel is never overridden by a later request.
            if *slot != Some(Request::Cancel) {
                *slot = Some(request);
            }
        }
    }

    fn pending(&self) -> Option<Request> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Some(Request::Cancel);
        }
        self.request.lock().ok().and_then(|slot| *slot)
    }

    fn take(&self) -> Option<Request> {
        if self.cancel_flag.swap(false, Ordering::SeqCst) {
            if let Ok(mut slot) = self.request.lock() {
                slot.take();
            }
            return Some(Request::Cancel);
        }
        self.request.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn pause(&self) {
        self.set(Request::Pause);
    }

    pub fn resume(&self) {
        self.set(Request::Resume);
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn finish_and_stitch(&self) {
        self.set(Request::Stitch);
    }
}

/// Per-export resources, present from `start` until the session finishes.
struct ActiveExport {
    config: ExportConfig,
    encoder: Box<dyn FrameEncoder>,
    mux: Option<MuxQueue>,
    accumulator: AccumulationRenderer,
    restore: Option<SceneSnapshot>,
    eta: EtaEstimator,
    bitrate_mode: BitrateMode,
    total_frames: u64,
    frame_index: u64,
    sample_index: u32,
    frames_submitted: u64,
}

/// Drives one export at a time through an [`ExportContext`].
pub struct ExportSession {
    context: ExportContext,
    state: SessionState,
    control: SessionControl,
    active: Option<ActiveExport>,
}

impl ExportSession {
    pub fn new(context: ExportContext) -> Self {
        Self {
            context,
            state: SessionState::Idle,
            control: SessionControl::default(),
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_rendering(&self) -> bool {
        matches!(
            self.state,
            SessionState::Rendering | SessionState::StoppingStitch
        )
    }

    /// Control handle shared with this session.
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn context(&self) -> &ExportContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExportContext {
        &mut self.context
    }

    /// Begin exporting `config` into `output`.
    ///
    /// Captures the scene snapshot, allocates the accumulation target at
    /// the supersampled render size, opens the sink, spawns the mux queue
    /// and configures the encoder.
    pub async fn start(
        &mut self,
        config: ExportConfig,
        output: OutputTarget,
        mut encoder: Box<dyn FrameEncoder>,
    ) -> FraktalResult<()> {
        if !matches!(self.state, SessionState::Idle | SessionState::Finished) {
            return Err(FraktalError::invalid_state(format!(
                "cannot start an export while {:?}",
                self.state
            )));
        }
        config
            .validate()
            .map_err(|e| FraktalError::config(e.to_string()))?;
        let strategy = FormatStrategy::for_format(config.container, config.codec)?;

        let mut accumulator =
            AccumulationRenderer::new(config.render_width(), config.render_height());
        accumulator.resize(
            self.context.device.as_mut(),
            config.render_width(),
            config.render_height(),
        )?;

        let sink = OutputSink::open(&output);
        let sink_mode = sink.mode();
        let params = TrackParams::from_export(&config);
        let writer = match ContainerWriter::new(config.container, sink, params) {
            Ok(writer) => writer,
            Err(e) => {
                accumulator.release(self.context.device.as_mut());
                return Err(e);
            }
        };
        let (mux, packets) = MuxQueue::spawn(
            strategy,
            writer,
            sink_mode.clone(),
            config.missing_config_policy,
            config.mux_queue_depth,
        );

        let bitrate_mode = match encoder
            .configure(&EncoderConfig::from_export(&config), packets)
            .await
        {
            Ok(mode) => mode,
            Err(e) => {
                encoder.close().await;
                mux.cancel().await;
                accumulator.release(self.context.device.as_mut());
                return Err(e);
            }
        };

        let restore = self.context.scene.snapshot();
        let total_frames = config.total_frames();
        tracing::info!(
            width = config.width,
            height = config.height,
            render_width = config.render_width(),
            render_height = config.render_height(),
            fps = config.fps,
            codec = %config.codec,
            container = config.container.extension(),
            frames = total_frames,
            samples_per_frame = config.samples_per_frame,
            encoder = encoder.name(),
            sink = ?sink_mode,
            bitrate_mode = ?bitrate_mode,
            "Export started"
        );

        // Drop stale requests from a previous export.
        let _ = self.control.take();
        self.active = Some(ActiveExport {
            config,
            encoder,
            mux: Some(mux),
            accumulator,
            restore: Some(restore),
            eta: EtaEstimator::new(total_frames),
            bitrate_mode,
            total_frames,
            frame_index: 0,
            sample_index: 0,
            frames_submitted: 0,
        });
        self.state = SessionState::Rendering;
        self.emit(ExportStage::Rendering);
        Ok(())
    }

    /// Request a pause at the next tick.
    pub fn pause(&mut self) -> FraktalResult<()> {
        if self.state != SessionState::Rendering {
            return Err(FraktalError::invalid_state("export is not rendering"));
        }
        self.control.pause();
        Ok(())
    }

    /// Request that a paused export continue. A pause that has not taken
    /// effect yet is withdrawn.
    pub fn resume(&mut self) -> FraktalResult<()> {
        let pause_pending = self.state == SessionState::Rendering
            && self.control.pending() == Some(Request::Pause);
        if self.state != SessionState::Paused && !pause_pending {
            return Err(FraktalError::invalid_state("export is not paused"));
        }
        self.control.resume();
        Ok(())
    }

    /// Request cancellation: output is discarded.
    pub fn cancel(&mut self) -> FraktalResult<()> {
        if !matches!(self.state, SessionState::Rendering | SessionState::Paused) {
            return Err(FraktalError::invalid_state("no export to cancel"));
        }
        self.control.cancel();
        Ok(())
    }

    /// Request an early finish: frames rendered so far are kept.
    pub fn finish_and_stitch(&mut self) -> FraktalResult<()> {
        if !matches!(self.state, SessionState::Rendering | SessionState::Paused) {
            return Err(FraktalError::invalid_state("no export to finish"));
        }
        self.control.finish_and_stitch();
        Ok(())
    }

    /// Advance the session by one unit of work.
    pub async fn tick(&mut self) -> FraktalResult<Tick> {
        if matches!(self.state, SessionState::Idle | SessionState::Finished) {
            return Err(FraktalError::invalid_state(format!(
                "no export running ({:?})",
                self.state
            )));
        }

        if let Some(request) = self.control.take() {
            self.apply_request(request);
        }

        match self.state {
            SessionState::Paused => {
                self.check_mux().await?;
                Ok(Tick::Paused)
            }
            SessionState::StoppingCancel => Ok(Tick::Finished(self.shutdown_cancel().await)),
            SessionState::StoppingStitch => self.stitch().await.map(Tick::Finished),
            SessionState::Rendering => {
                self.check_mux().await?;
                match self.render_step().await {
                    Ok(tick) => Ok(tick),
                    Err(err) => Err(self.fail(err).await),
                }
            }
            SessionState::Idle | SessionState::Finished => {
                Err(FraktalError::invalid_state("no export running"))
            }
        }
    }

    /// Tick until the session finishes, yielding to the runtime in between.
    /// While paused the loop idles until resumed or cancelled through a
    /// [`SessionControl`].
    pub async fn run(&mut self) -> FraktalResult<SessionOutcome> {
        loop {
            match self.tick().await? {
                Tick::Finished(outcome) => return Ok(outcome),
                Tick::Paused => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
                Tick::Sampled { .. } | Tick::FrameEncoded { .. } => tokio::task::yield_now().await,
            }
        }
    }

    fn apply_request(&mut self, request: Request) {
        let next = match (request, self.state) {
            (Request::Pause, SessionState::Rendering) => SessionState::Paused,
            (Request::Resume, SessionState::Paused) => SessionState::Rendering,
            (Request::Cancel, SessionState::Rendering | SessionState::Paused) => {
                SessionState::StoppingCancel
            }
            (Request::Stitch, SessionState::Rendering | SessionState::Paused) => {
                SessionState::StoppingStitch
            }
            (request, state) => {
                tracing::debug!(?request, ?state, "Ignoring export request");
                return;
            }
        };
        tracing::info!(from = ?self.state, to = ?next, "Export state change");
        self.state = next;

        match next {
            SessionState::Paused => {
                if let Some(active) = self.active.as_mut() {
                    active.eta.suspend();
                }
                self.emit(ExportStage::Paused);
            }
            SessionState::Rendering => {
                if let Some(active) = self.active.as_mut() {
                    if active.sample_index > 0 {
                        active.eta.begin_unit();
                    }
                }
                self.emit(ExportStage::Rendering);
            }
            _ => {}
        }
    }

    async fn render_step(&mut self) -> FraktalResult<Tick> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| FraktalError::invalid_state("export resources missing"))?;

        if active.frame_index >= active.total_frames {
            self.state = SessionState::StoppingStitch;
            return self.stitch().await.map(Tick::Finished);
        }

        let device = self.context.device.as_mut();
        let frame = active.frame_index;

        if active.sample_index == 0 {
            let timeline_frame = active.config.timeline_frame(frame);
            self.context.scene.scrub(timeline_frame);
            let offsets = self.context.modulation.offsets(timeline_frame);
            let mut uniforms = apply_modulation(&self.context.scene.uniforms(), &offsets);
            derive_uniforms(&mut uniforms);
            for (name, value) in &uniforms {
                device.set_uniform(name, *value);
            }
            active.accumulator.reset();
            active.eta.begin_unit();
            tracing::debug!(frame, timeline_frame, "Frame started");
        }

        let sample = active.sample_index;
        active.accumulator.accumulate_sample(device, sample)?;
        if self.context.mirror_to_display {
            if let Err(e) = device.present(active.accumulator.image()) {
                tracing::debug!(error = %e, "Display mirror failed");
            }
        }
        active.sample_index += 1;

        if active.sample_index < active.config.samples_per_frame {
            let tick = Tick::Sampled { frame, sample };
            self.emit(ExportStage::Rendering);
            return Ok(tick);
        }

        let config = &active.config;
        let data = to_rgba8_top_down(active.accumulator.image(), config.width, config.height);
        let timestamp_us = frame_timestamp_us(frame, config.fps);
        let video_frame = VideoFrame {
            data,
            width: config.width,
            height: config.height,
            timestamp_us,
            duration_us: frame_duration_us(config.fps),
        };
        active.encoder.encode(video_frame, frame == 0).await?;

        active.frames_submitted += 1;
        active.frame_index += 1;
        active.sample_index = 0;
        active.eta.end_unit();
        tracing::debug!(frame, timestamp_us, "Frame submitted");
        self.emit(ExportStage::Rendering);
        Ok(Tick::FrameEncoded {
            frame,
            timestamp_us,
        })
    }

    /// Flush the encoder, drain the mux queue and finalize the container.
    async fn stitch(&mut self) -> FraktalResult<SessionOutcome> {
        self.emit(ExportStage::Finalizing);
        match self.stitch_inner().await {
            Ok(report) => {
                self.release_and_restore();
                self.state = SessionState::Finished;
                tracing::info!(
                    frames = report.frames,
                    bytes = report.artifact.len(),
                    duration_secs = report.summary.duration_secs,
                    sink = ?report.sink_mode,
                    "Export complete"
                );
                self.emit_terminal(ExportStage::Complete, report.frames);
                Ok(SessionOutcome::Completed(report))
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn stitch_inner(&mut self) -> FraktalResult<ExportReport> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| FraktalError::invalid_state("export resources missing"))?;
        if active.frames_submitted == 0 {
            return Err(FraktalError::export("no frames were rendered; nothing to stitch"));
        }

        active.encoder.flush().await?;
        // Every sender is gone once the encoder is closed.
        active.encoder.close().await;
        let mux = active
            .mux
            .take()
            .ok_or_else(|| FraktalError::invalid_state("mux queue already consumed"))?;
        let outcome = mux.finish().await?;

        Ok(ExportReport {
            artifact: outcome.artifact,
            sink_mode: outcome.sink_mode,
            summary: outcome.summary,
            frames: active.frames_submitted,
            bitrate_mode: active.bitrate_mode,
        })
    }

    async fn shutdown_cancel(&mut self) -> SessionOutcome {
        self.teardown().await;
        self.release_and_restore();
        self.state = SessionState::Finished;
        tracing::info!("Export cancelled");
        self.emit_terminal(ExportStage::Cancelled, 0);
        SessionOutcome::Cancelled
    }

    /// Terminal error path: discard output, release everything, restore.
    async fn fail(&mut self, err: FraktalError) -> FraktalError {
        tracing::error!(error = %err, "Export failed");
        self.teardown().await;
        self.release_and_restore();
        self.state = SessionState::Finished;
        self.emit_terminal(ExportStage::Failed, 0);
        err
    }

    /// Stop the muxer first so a blocked encoder output thread is released,
    /// then close the encoder.
    async fn teardown(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if let Some(mux) = active.mux.take() {
                mux.cancel().await;
            }
            active.encoder.close().await;
        }
    }

    /// The mux task only stops early on an encoder or write error, which
    /// ends the export whether or not frames are being produced.
    async fn check_mux(&mut self) -> FraktalResult<()> {
        if self.mux_stopped() {
            let err = self.take_mux_error().await;
            return Err(self.fail(err).await);
        }
        Ok(())
    }

    fn mux_stopped(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|a| a.mux.as_ref())
            .is_some_and(MuxQueue::is_finished)
    }

    async fn take_mux_error(&mut self) -> FraktalError {
        let mux = self.active.as_mut().and_then(|a| a.mux.take());
        match mux {
            Some(mux) => match mux.finish().await {
                Err(err) => err,
                Ok(_) => FraktalError::mux("mux queue stopped before the encoder finished"),
            },
            None => FraktalError::invalid_state("mux queue already consumed"),
        }
    }

    /// Release the device target and put the scene back. Runs at most once
    /// per export: the snapshot is taken out of the active export.
    fn release_and_restore(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.accumulator.release(self.context.device.as_mut());
            if let Some(snapshot) = active.restore.take() {
                self.context.scene.restore(&snapshot);
                tracing::debug!(timeline_frame = snapshot.timeline_frame, "Scene restored");
            }
        }
    }

    /// Synchronous cleanup for a session dropped mid-export.
    fn abandon(&mut self) {
        if let Some(active) = self.active.as_mut() {
            tracing::warn!(state = ?self.state, "Export session dropped while active");
            if let Some(mux) = active.mux.take() {
                mux.abort();
            }
            self.release_and_restore();
            self.state = SessionState::Finished;
        }
    }

    fn emit(&mut self, stage: ExportStage) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let progress = ExportProgress {
            is_rendering: self.is_rendering(),
            progress: percent_complete(
                active.frames_submitted,
                active.sample_index,
                active.config.samples_per_frame,
                active.total_frames,
            ),
            frame_index: active.frame_index,
            frames_rendered: active.frames_submitted,
            total_frames: active.total_frames,
            eta_secs: active.eta.eta_secs(),
            stage,
        };
        self.context.observer.on_progress(&progress);
    }

    fn emit_terminal(&mut self, stage: ExportStage, frames: u64) {
        let progress = ExportProgress {
            is_rendering: false,
            progress: if stage == ExportStage::Complete {
                100.0
            } else {
                0.0
            },
            frame_index: frames,
            frames_rendered: frames,
            total_frames: frames,
            eta_secs: None,
            stage,
        };
        self.context.observer.on_progress(&progress);
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        self.abandon();
    }
}
