//! Output sinks for muxed containers.

use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fraktal_common::FraktalResult;

/// Where a container should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Memory,
    Disk(PathBuf),
}

/// Mode a sink actually ended up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMode {
    Disk(PathBuf),
    /// In memory; `fallback` is set when a disk target could not be opened.
    Memory { fallback: bool },
}

/// Finished export output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportArtifact {
    /// Complete container bytes.
    Blob(Vec<u8>),
    /// Path of the closed file.
    File(PathBuf),
}

impl ExportArtifact {
    pub fn len(&self) -> u64 {
        match self {
            Self::Blob(bytes) => bytes.len() as u64,
            Self::File(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A seekable byte sink backed by memory or a file.
#[derive(Debug)]
pub enum OutputSink {
    Memory {
        buffer: Cursor<Vec<u8>>,
        fallback: bool,
    },
    Disk {
        path: PathBuf,
        writer: BufWriter<File>,
    },
}

impl OutputSink {
    /// Open a sink for `target`. A disk target that cannot be created
    /// degrades to memory; check [`OutputSink::mode`].
    pub fn open(target: &OutputTarget) -> Self {
        match target {
            OutputTarget::Memory => Self::Memory {
                buffer: Cursor::new(Vec::new()),
                fallback: false,
            },
            OutputTarget::Disk(path) => match create_file(path) {
                Ok(file) => {
                    tracing::info!(path = %path.display(), "Writing export to disk");
                    Self::Disk {
                        path: path.clone(),
                        writer: BufWriter::new(file),
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Cannot open output file, buffering export in memory"
                    );
                    Self::Memory {
                        buffer: Cursor::new(Vec::new()),
                        fallback: true,
                    }
                }
            },
        }
    }

    pub fn mode(&self) -> SinkMode {
        match self {
            Self::Memory { fallback, .. } => SinkMode::Memory {
                fallback: *fallback,
            },
            Self::Disk { path, .. } => SinkMode::Disk(path.clone()),
        }
    }

    /// Close the sink and hand back its contents.
    pub fn finish(self) -> FraktalResult<ExportArtifact> {
        match self {
            Self::Memory { buffer, .. } => Ok(ExportArtifact::Blob(buffer.into_inner())),
            Self::Disk { path, writer } => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
                Ok(ExportArtifact::File(path))
            }
        }
    }

    /// Drop any written output, removing a partial file.
    pub fn discard(self) {
        if let Self::Disk { path, writer } = self {
            drop(writer);
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "Failed to remove partial export");
            } else {
                tracing::debug!(path = %path.display(), "Removed partial export");
            }
        }
    }
}

fn create_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    File::create(path)
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Memory { buffer, .. } => buffer.write(buf),
            Self::Disk { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Memory { buffer, .. } => buffer.flush(),
            Self::Disk { writer, .. } => writer.flush(),
        }
    }
}

impl Seek for OutputSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory { buffer, .. } => buffer.seek(pos),
            Self::Disk { writer, .. } => writer.seek(pos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fraktal-sink-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_memory_sink_round_trip() {
        let mut sink = OutputSink::open(&OutputTarget::Memory);
        sink.write_all(b"abcdef").unwrap();
        sink.seek(SeekFrom::Start(1)).unwrap();
        sink.write_all(b"XY").unwrap();
        assert_eq!(sink.mode(), SinkMode::Memory { fallback: false });
        assert_eq!(
            sink.finish().unwrap(),
            ExportArtifact::Blob(b"aXYdef".to_vec())
        );
    }

    #[test]
    fn test_unwritable_disk_target_falls_back_to_memory() {
        let blocker = temp_path("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let target = OutputTarget::Disk(blocker.join("out.mp4"));

        let mut sink = OutputSink::open(&target);
        assert_eq!(sink.mode(), SinkMode::Memory { fallback: true });
        sink.write_all(b"data").unwrap();
        assert_eq!(sink.finish().unwrap(), ExportArtifact::Blob(b"data".to_vec()));

        std::fs::remove_file(blocker).unwrap();
    }

    #[test]
    fn test_disk_sink_finish_and_discard() {
        let path = temp_path("kept.bin");
        let mut sink = OutputSink::open(&OutputTarget::Disk(path.clone()));
        sink.write_all(b"hello").unwrap();
        let artifact = sink.finish().unwrap();
        assert_eq!(artifact, ExportArtifact::File(path.clone()));
        assert_eq!(artifact.len(), 5);
        std::fs::remove_file(&path).unwrap();

        let path = temp_path("discarded.bin");
        let mut sink = OutputSink::open(&OutputTarget::Disk(path.clone()));
        sink.write_all(b"partial").unwrap();
        sink.discard();
        assert!(!path.exists());
    }
}
