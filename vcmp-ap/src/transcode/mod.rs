//! Transcoding adapter
//!
//! Every decode spawns one independent external process writing raw PCM in
//! the transport's format (s16le, 48 kHz, stereo) to a pipe. No pooling, no
//! shared state between calls.

pub mod fade;
pub mod ffmpeg;

use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::Child;
use tracing::warn;
use vcmp_common::FilterPreset;

use crate::error::{Error, Result};

pub use fade::{FadeDirection, FadeSpec};
pub use ffmpeg::FfmpegTranscoder;

/// Output sample rate in Hz
pub const SAMPLE_RATE: u32 = 48_000;

/// Output channel count
pub const CHANNELS: u16 = 2;

/// Bytes per interleaved frame (two s16 samples)
pub const BYTES_PER_FRAME: usize = 4;

/// Raw PCM stream produced by one decode
///
/// Owns the decode process, if any. Dropping the stream kills the process.
pub struct DecodedStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    child: Option<Child>,
    label: String,
}

impl DecodedStream {
    /// Wrap a spawned decoder whose stdout is piped
    pub fn from_child(mut child: Child, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Pipeline(format!("decoder for {} has no stdout", label)))?;
        Ok(Self {
            reader: Box::pin(stdout),
            child: Some(child),
            label,
        })
    }

    /// Wrap an in-process PCM source
    pub fn from_reader<R>(reader: R, label: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            child: None,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reap the decoder after end-of-stream
    ///
    /// A non-zero exit means the stream ended early and is reported as a
    /// pipeline error.
    pub async fn finish(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Pipeline(format!(
                "decoder for {} exited with {}",
                self.label, status
            )))
        }
    }
}

impl AsyncRead for DecodedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

impl std::fmt::Debug for DecodedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedStream")
            .field("label", &self.label)
            .field("has_process", &self.child.is_some())
            .finish()
    }
}

/// External decode/filter/probe capability
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Decode a file, optionally through a filter preset
    async fn decode(
        &self,
        source: &Path,
        filter: Option<FilterPreset>,
        speed: f64,
    ) -> Result<DecodedStream>;

    /// Decode a file through a fade ramp
    async fn decode_faded(&self, source: &Path, fade: &FadeSpec) -> Result<DecodedStream>;

    /// Length of a file in seconds
    async fn probe_duration(&self, source: &Path) -> Result<f64>;

    /// Rough peak level in (0, 1] for gain normalization
    async fn estimate_peak(&self, source: &Path) -> Result<f32>;

    /// Probe, substituting `fallback` seconds when probing fails
    async fn duration_or(&self, source: &Path, fallback: f64) -> f64 {
        match self.probe_duration(source).await {
            Ok(secs) if secs.is_finite() && secs > 0.0 => secs,
            Ok(secs) => {
                warn!(
                    "Probe returned unusable duration {} for {}; assuming {}s",
                    secs,
                    source.display(),
                    fallback
                );
                fallback
            }
            Err(e) => {
                warn!("{}; assuming {}s for {}", e, fallback, source.display());
                fallback
            }
        }
    }
}
