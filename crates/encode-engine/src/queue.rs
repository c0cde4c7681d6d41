//! Bounded, strictly ordered mux queue.
//!
//! A single tokio task owns the bitstream converter and the container
//! writer. Encoder output arrives on a bounded channel whose capacity
//! limits how many packets may be pending; a full channel blocks the
//! encoder's output thread.

use fraktal_bitstream::{BitstreamConverter, EncodedPacket, FormatStrategy};
use fraktal_common::{FraktalError, FraktalResult};
use fraktal_project_model::MissingConfigPolicy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::container::{ContainerWriter, MuxSummary};
use crate::encoder::EncoderOutput;
use crate::sink::{ExportArtifact, OutputSink, SinkMode};

/// Result of a successfully drained queue.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxOutcome {
    pub artifact: ExportArtifact,
    pub summary: MuxSummary,
    pub sink_mode: SinkMode,
}

type TaskResult = (Option<OutputSink>, FraktalResult<MuxSummary>);

pub struct MuxQueue {
    handle: JoinHandle<TaskResult>,
    sink_mode: SinkMode,
}

impl MuxQueue {
    /// Spawn the consumer task. The returned sender is handed to the encoder.
    pub fn spawn(
        strategy: FormatStrategy,
        writer: ContainerWriter<OutputSink>,
        sink_mode: SinkMode,
        policy: MissingConfigPolicy,
        depth: usize,
    ) -> (Self, mpsc::Sender<EncoderOutput>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let state = MuxState {
            converter: BitstreamConverter::new(strategy),
            writer: Some(writer),
            policy,
            pending: Vec::new(),
            written: 0,
        };
        let handle = tokio::spawn(state.run(rx));
        tracing::debug!(?strategy, depth, ?policy, "Mux queue started");
        (Self { handle, sink_mode }, tx)
    }

    pub fn sink_mode(&self) -> &SinkMode {
        &self.sink_mode
    }

    /// Whether the consumer has stopped. Before the encoder's sender is
    /// dropped this only happens on failure.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the consumer to drain, finalize the container and close
    /// the sink. Call after every encoder sender has been dropped.
    pub async fn finish(self) -> FraktalResult<MuxOutcome> {
        let (sink, result) = self
            .handle
            .await
            .map_err(|e| FraktalError::mux(format!("mux task failed: {e}")))?;
        match (sink, result) {
            (Some(sink), Ok(summary)) => Ok(MuxOutcome {
                artifact: sink.finish()?,
                summary,
                sink_mode: self.sink_mode,
            }),
            (sink, Err(err)) => {
                if let Some(sink) = sink {
                    sink.discard();
                }
                Err(err)
            }
            (None, Ok(_)) => Err(FraktalError::mux("mux task returned no sink")),
        }
    }

    /// Synchronous variant of [`MuxQueue::cancel`] for drop paths: abort the
    /// consumer without waiting and remove any partial file.
    pub fn abort(self) {
        self.handle.abort();
        if let SinkMode::Disk(path) = &self.sink_mode {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial export");
                }
            }
        }
    }

    /// Stop the consumer and discard everything written so far.
    pub async fn cancel(self) {
        self.handle.abort();
        if let Ok((Some(sink), _)) = self.handle.await {
            sink.discard();
            return;
        }
        // An aborted task drops its writer; remove whatever reached disk.
        if let SinkMode::Disk(path) = &self.sink_mode {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial export");
                }
            }
        }
    }
}

struct MuxState {
    converter: BitstreamConverter,
    writer: Option<ContainerWriter<OutputSink>>,
    policy: MissingConfigPolicy,
    pending: Vec<EncodedPacket>,
    written: u64,
}

impl MuxState {
    async fn run(mut self, mut rx: mpsc::Receiver<EncoderOutput>) -> TaskResult {
        while let Some(output) = rx.recv().await {
            let step = match output {
                EncoderOutput::Packet { packet, metadata } => self.handle_packet(
                    packet,
                    metadata.and_then(|m| m.description).as_deref(),
                ),
                EncoderOutput::Error(message) => Err(FraktalError::encode(message)),
            };
            if let Err(err) = step {
                tracing::error!(error = %err, written = self.written, "Mux queue stopped");
                return (self.writer.take().map(ContainerWriter::into_inner), Err(err));
            }
        }
        self.finalize()
    }

    fn handle_packet(
        &mut self,
        mut packet: EncodedPacket,
        description: Option<&[u8]>,
    ) -> FraktalResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FraktalError::mux("container already closed"))?;
        self.converter.process(&mut packet, description)?;

        if !writer.has_track() {
            match self.converter.config() {
                Some(config) => {
                    writer.add_track(config)?;
                    for held in self.pending.drain(..) {
                        writer.write_packet(&held)?;
                        self.written += 1;
                    }
                }
                None => {
                    return match self.policy {
                        MissingConfigPolicy::Fail => Err(self.missing_config()),
                        MissingConfigPolicy::Defer => {
                            tracing::debug!(
                                timestamp_us = packet.timestamp_us,
                                held = self.pending.len() + 1,
                                "Holding packet until codec configuration is known"
                            );
                            self.pending.push(packet);
                            Ok(())
                        }
                    };
                }
            }
        }

        writer.write_packet(&packet)?;
        self.written += 1;
        Ok(())
    }

    fn finalize(mut self) -> TaskResult {
        let Some(writer) = self.writer.take() else {
            return (None, Err(FraktalError::mux("container already closed")));
        };
        if !writer.has_track() {
            return (Some(writer.into_inner()), Err(self.missing_config()));
        }
        match writer.finalize() {
            Ok((sink, summary)) => (Some(sink), Ok(summary)),
            Err(err) => (None, Err(err)),
        }
    }

    fn missing_config(&self) -> FraktalError {
        FraktalError::MissingCodecConfig {
            codec: self.converter.strategy().codec().to_string(),
        }
    }
}
