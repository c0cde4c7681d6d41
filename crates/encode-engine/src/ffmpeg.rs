//! ffmpeg-backed [`FrameEncoder`].
//!
//! Raw RGBA frames are piped to the system `ffmpeg` binary on stdin; the
//! encoded elementary stream is read back from stdout on a dedicated
//! thread and forwarded as [`EncoderOutput`]s:
//!
//! - AVC/HEVC: Annex-B with an access unit delimiter before every picture
//! - VP9/AV1: IVF
//!
//! B-frames and encoder lookahead reordering are disabled, so the n-th
//! packet read back belongs to the n-th frame submitted.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use fraktal_bitstream::access_unit::AccessUnitSplitter;
use fraktal_bitstream::ivf::IvfReader;
use fraktal_bitstream::{av1, hevc, nal, vp9, EncodedPacket, NalSyntax};
use fraktal_common::{frame_duration_us, frame_timestamp_us, FraktalError, FraktalResult};
use fraktal_project_model::{BitrateMode, VideoCodec};
use tokio::sync::mpsc;

use crate::encoder::{EncoderConfig, EncoderOutput, FrameEncoder, VideoFrame};

const READ_CHUNK: usize = 64 * 1024;

/// Check whether an `ffmpeg` binary can be executed.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Whether the ffmpeg encoder used for `codec` is driven in CBR mode.
pub fn supports_cbr(codec: VideoCodec) -> bool {
    matches!(codec, VideoCodec::Avc | VideoCodec::Vp9)
}

/// Frame timing shared between the submitting side and the reader thread.
type TimingQueue = Arc<Mutex<VecDeque<(i64, i64)>>>;

struct RunningEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
    timing: TimingQueue,
    frames_in: u64,
}

pub struct FfmpegEncoder {
    binary: String,
    config: Option<EncoderConfig>,
    running: Option<RunningEncoder>,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Use a specific ffmpeg executable.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            config: None,
            running: None,
        }
    }

    /// Full ffmpeg argument list for a configuration and granted mode.
    pub fn build_args(config: &EncoderConfig, mode: BitrateMode) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend([
            "-s".to_string(),
            format!("{}x{}", config.width, config.height),
            "-r".to_string(),
            config.fps.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-an".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-g".to_string(),
            config.keyframe_interval.to_string(),
        ]);

        let bitrate = config.bitrate_bps.to_string();
        let bitrate = bitrate.as_str();
        let push = |args: &mut Vec<String>, items: &[&str]| {
            args.extend(items.iter().map(|s| s.to_string()));
        };

        match config.codec {
            VideoCodec::Avc => {
                push(&mut args, &["-c:v", "libx264", "-preset", "medium", "-bf", "0"]);
                push(&mut args, &["-b:v", bitrate]);
                if mode == BitrateMode::Constant {
                    push(
                        &mut args,
                        &[
                            "-minrate", bitrate, "-maxrate", bitrate, "-bufsize", bitrate,
                            "-x264-params", "nal-hrd=cbr",
                        ],
                    );
                }
                push(
                    &mut args,
                    &["-bsf:v", "h264_metadata=aud=insert", "-f", "h264"],
                );
            }
            VideoCodec::Hevc => {
                push(
                    &mut args,
                    &[
                        "-c:v", "libx265", "-preset", "medium", "-b:v", bitrate,
                        "-x265-params", "bframes=0:log-level=error",
                        "-bsf:v", "hevc_metadata=aud=insert", "-f", "hevc",
                    ],
                );
            }
            VideoCodec::Vp9 => {
                push(
                    &mut args,
                    &["-c:v", "libvpx-vp9", "-lag-in-frames", "0", "-b:v", bitrate],
                );
                if mode == BitrateMode::Constant {
                    push(&mut args, &["-minrate", bitrate, "-maxrate", bitrate]);
                }
                push(&mut args, &["-f", "ivf"]);
            }
            VideoCodec::Av1 => {
                push(
                    &mut args,
                    &[
                        "-c:v", "libaom-av1", "-cpu-used", "6", "-lag-in-frames", "0",
                        "-b:v", bitrate, "-f", "ivf",
                    ],
                );
            }
        }
        push(&mut args, &["pipe:1"]);
        args
    }

    fn running_mut(&mut self) -> FraktalResult<&mut RunningEncoder> {
        self.running
            .as_mut()
            .ok_or_else(|| FraktalError::invalid_state("ffmpeg encoder is not configured"))
    }
}

#[async_trait::async_trait]
impl FrameEncoder for FfmpegEncoder {
    async fn configure(
        &mut self,
        config: &EncoderConfig,
        output: mpsc::Sender<EncoderOutput>,
    ) -> FraktalResult<BitrateMode> {
        if self.running.is_some() {
            return Err(FraktalError::invalid_state("ffmpeg encoder already configured"));
        }

        let mode = match config.bitrate_mode {
            BitrateMode::Constant if !supports_cbr(config.codec) => {
                tracing::warn!(
                    codec = %config.codec,
                    "Constant bitrate not supported by this encoder, using variable bitrate"
                );
                BitrateMode::Variable
            }
            requested => requested,
        };

        let args = Self::build_args(config, mode);
        tracing::debug!(binary = %self.binary, args = ?args, "Starting ffmpeg encoder");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FraktalError::encode(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FraktalError::encode("Failed to open ffmpeg stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FraktalError::encode("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FraktalError::encode("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut output = String::new();
            match std::io::BufReader::new(stderr).read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let timing: TimingQueue = Arc::new(Mutex::new(VecDeque::new()));
        let reader = {
            let timing = Arc::clone(&timing);
            let codec = config.codec;
            let fps = config.fps;
            std::thread::spawn(move || read_packets(stdout, codec, fps, timing, output))
        };

        tracing::info!(
            pid = child.id(),
            codec = %config.codec,
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate_bps = config.bitrate_bps,
            mode = ?mode,
            "ffmpeg encoder started"
        );

        self.config = Some(config.clone());
        self.running = Some(RunningEncoder {
            child,
            stdin: Some(stdin),
            reader: Some(reader),
            stderr: Some(stderr_task),
            timing,
            frames_in: 0,
        });
        Ok(mode)
    }

    async fn encode(&mut self, frame: VideoFrame, key_frame: bool) -> FraktalResult<()> {
        let (width, height) = match &self.config {
            Some(config) => (config.width, config.height),
            None => return Err(FraktalError::invalid_state("ffmpeg encoder is not configured")),
        };
        if frame.width != width || frame.height != height {
            return Err(FraktalError::encode(format!(
                "frame size mismatch: got {}x{}, expected {width}x{height}",
                frame.width, frame.height
            )));
        }
        if frame.data.len() != VideoFrame::expected_len(width, height) {
            return Err(FraktalError::encode("frame data size mismatch with width*height*4"));
        }

        let running = self.running_mut()?;
        if key_frame && running.frames_in > 0 {
            tracing::debug!(
                frame = running.frames_in,
                "Keyframe request ignored; keyframes follow the GOP interval"
            );
        }
        if let Ok(mut timing) = running.timing.lock() {
            timing.push_back((frame.timestamp_us, frame.duration_us));
        }

        let mut stdin = running
            .stdin
            .take()
            .ok_or_else(|| FraktalError::invalid_state("ffmpeg encoder is already flushed"))?;
        // The pipe write blocks while ffmpeg is busy; keep it off the runtime.
        let (stdin, result) = tokio::task::spawn_blocking(move || {
            let result = stdin.write_all(&frame.data);
            (stdin, result)
        })
        .await
        .map_err(|e| FraktalError::encode(format!("ffmpeg writer task failed: {e}")))?;
        running.stdin = Some(stdin);
        result.map_err(|e| FraktalError::encode(format!("Failed to write frame to ffmpeg: {e}")))?;
        running.frames_in += 1;
        Ok(())
    }

    async fn flush(&mut self) -> FraktalResult<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        drop(running.stdin.take());

        let reader = running.reader.take();
        let stderr = running.stderr.take();
        let frames_in = running.frames_in;
        let (status, stderr_output) = tokio::task::spawn_blocking(move || {
            if let Some(reader) = reader {
                let _ = reader.join();
            }
            let status = running.child.wait();
            let stderr_output = stderr
                .and_then(|h| h.join().ok())
                .unwrap_or_else(|| "<failed to join stderr reader>".to_string());
            (status, stderr_output)
        })
        .await
        .map_err(|e| FraktalError::encode(format!("ffmpeg flush task failed: {e}")))?;

        let status =
            status.map_err(|e| FraktalError::encode(format!("Failed to wait on ffmpeg: {e}")))?;
        if !status.success() {
            return Err(FraktalError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr_output.trim()
            )));
        }
        tracing::info!(frames = frames_in, "ffmpeg encoder flushed");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.stdin.take());
            if let Err(err) = running.child.kill() {
                tracing::debug!(error = %err, "ffmpeg already exited");
            }
            let _ = tokio::task::spawn_blocking(move || {
                let _ = running.child.wait();
                if let Some(reader) = running.reader.take() {
                    let _ = reader.join();
                }
                if let Some(stderr) = running.stderr.take() {
                    let _ = stderr.join();
                }
            })
            .await;
            tracing::debug!("ffmpeg encoder closed");
        }
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.stdin.take());
            let _ = running.child.kill();
            let _ = running.child.wait();
        }
    }
}

/// Reader thread: split stdout into packets and forward them.
fn read_packets(
    mut stdout: impl Read,
    codec: VideoCodec,
    fps: u32,
    timing: TimingQueue,
    output: mpsc::Sender<EncoderOutput>,
) {
    let mut framer = Framer::new(codec);
    let mut emitted = 0u64;
    let mut buf = vec![0u8; READ_CHUNK];

    let mut send = |data: Vec<u8>| -> bool {
        let (timestamp_us, duration_us) = timing
            .lock()
            .ok()
            .and_then(|mut t| t.pop_front())
            .unwrap_or_else(|| (frame_timestamp_us(emitted, fps), frame_duration_us(fps)));
        let key_frame = is_keyframe(codec, &data);
        emitted += 1;
        let packet = EncodedPacket::new(data, timestamp_us, duration_us, key_frame);
        output
            .blocking_send(EncoderOutput::Packet {
                packet,
                metadata: None,
            })
            .is_ok()
    };

    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = output.blocking_send(EncoderOutput::Error(format!(
                    "Failed reading ffmpeg output: {err}"
                )));
                return;
            }
        };
        match framer.push(&buf[..n]) {
            Ok(units) => {
                for unit in units {
                    if !send(unit) {
                        tracing::debug!("Mux queue closed, stopping ffmpeg reader");
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = output.blocking_send(EncoderOutput::Error(err.to_string()));
                return;
            }
        }
    }

    if let Some(last) = framer.finish() {
        send(last);
    }
}

/// Splits the encoder's output stream into one buffer per frame.
enum Framer {
    AnnexB(AccessUnitSplitter),
    Ivf(IvfReader),
}

impl Framer {
    fn new(codec: VideoCodec) -> Self {
        match codec {
            VideoCodec::Avc => Self::AnnexB(AccessUnitSplitter::new(NalSyntax::H264)),
            VideoCodec::Hevc => Self::AnnexB(AccessUnitSplitter::new(NalSyntax::H265)),
            VideoCodec::Vp9 | VideoCodec::Av1 => Self::Ivf(IvfReader::new()),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> FraktalResult<Vec<Vec<u8>>> {
        match self {
            Self::AnnexB(splitter) => Ok(splitter.push(bytes)),
            Self::Ivf(reader) => Ok(reader.push(bytes)?.into_iter().map(|f| f.data).collect()),
        }
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        match self {
            Self::AnnexB(splitter) => splitter.finish(),
            Self::Ivf(reader) => {
                if reader.pending() > 0 {
                    tracing::warn!(bytes = reader.pending(), "Truncated IVF frame at end of stream");
                }
                None
            }
        }
    }
}

/// Random-access detection per codec.
pub fn is_keyframe(codec: VideoCodec, data: &[u8]) -> bool {
    match codec {
        VideoCodec::Avc => nal::find_nalus(data).iter().any(|u| u.is_idr()),
        VideoCodec::Hevc => nal::find_nalus_with(data, NalSyntax::H265)
            .iter()
            .any(|u| hevc::nal_type::is_irap(u.nal_type)),
        VideoCodec::Vp9 => vp9::is_vp9_keyframe(data),
        VideoCodec::Av1 => av1::find_sequence_header(data).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(codec: VideoCodec) -> EncoderConfig {
        EncoderConfig {
            codec,
            width: 640,
            height: 360,
            fps: 30,
            bitrate_bps: 8_000_000,
            bitrate_mode: BitrateMode::Constant,
            keyframe_interval: 60,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_avc_cbr_args() {
        let args = FfmpegEncoder::build_args(&config(VideoCodec::Avc), BitrateMode::Constant);
        assert!(has_pair(&args, "-c:v", "libx264"));
        assert!(has_pair(&args, "-bf", "0"));
        assert!(has_pair(&args, "-x264-params", "nal-hrd=cbr"));
        assert!(has_pair(&args, "-f", "h264"));
        assert!(has_pair(&args, "-s", "640x360"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_avc_vbr_omits_hrd() {
        let args = FfmpegEncoder::build_args(&config(VideoCodec::Avc), BitrateMode::Variable);
        assert!(!args.iter().any(|a| a == "nal-hrd=cbr"));
        assert!(has_pair(&args, "-b:v", "8000000"));
    }

    #[test]
    fn test_ivf_for_vp9_and_av1() {
        for codec in [VideoCodec::Vp9, VideoCodec::Av1] {
            let args = FfmpegEncoder::build_args(&config(codec), BitrateMode::Variable);
            assert!(has_pair(&args, "-f", "ivf"));
        }
        assert!(supports_cbr(VideoCodec::Vp9));
        assert!(!supports_cbr(VideoCodec::Hevc));
    }

    #[test]
    fn test_keyframe_detection() {
        let idr = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x65, 0x88];
        let p = [0, 0, 0, 1, 0x09, 0xF0, 0, 0, 0, 1, 0x41, 0x9A];
        assert!(is_keyframe(VideoCodec::Avc, &idr));
        assert!(!is_keyframe(VideoCodec::Avc, &p));

        let cra = [0, 0, 1, 0x2A, 0x01, 0xAF];
        assert!(is_keyframe(VideoCodec::Hevc, &cra));
        assert!(is_keyframe(VideoCodec::Vp9, &[0x82, 0x49, 0x83]));
    }

    #[tokio::test]
    async fn test_encode_before_configure_fails() {
        let mut encoder = FfmpegEncoder::new();
        let frame = VideoFrame {
            data: vec![0; 16],
            width: 2,
            height: 2,
            timestamp_us: 0,
            duration_us: 33_333,
        };
        assert!(encoder.encode(frame, true).await.is_err());
        assert!(encoder.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_tiny_avc_encode_when_ffmpeg_available() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let (tx, mut rx) = mpsc::channel(16);
        let mut encoder = FfmpegEncoder::new();
        let mut cfg = config(VideoCodec::Avc);
        cfg.width = 64;
        cfg.height = 64;
        if encoder.configure(&cfg, tx).await.is_err() {
            return;
        }
        for i in 0..3u64 {
            let frame = VideoFrame {
                data: vec![(i * 40) as u8; VideoFrame::expected_len(64, 64)],
                width: 64,
                height: 64,
                timestamp_us: frame_timestamp_us(i, 30),
                duration_us: frame_duration_us(30),
            };
            encoder.encode(frame, i == 0).await.unwrap();
        }
        // ffmpeg builds without libx264 fail here; that is not this test's concern.
        let collector = tokio::spawn(async move {
            let mut packets = Vec::new();
            while let Some(out) = rx.recv().await {
                packets.push(out);
            }
            packets
        });
        if encoder.flush().await.is_err() {
            return;
        }
        let packets = collector.await.unwrap();
        assert_eq!(packets.len(), 3);
        match &packets[0] {
            EncoderOutput::Packet { packet, .. } => {
                assert!(packet.key_frame);
                assert_eq!(packet.timestamp_us, 0);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }
}
