//! ffmpeg/ffprobe backed [`Transcoder`]

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use vcmp_common::FilterPreset;

use super::{DecodedStream, FadeSpec, Transcoder, CHANNELS, SAMPLE_RATE};
use crate::error::{Error, Result};

/// Seconds of audio analysed for the peak estimate
const PEAK_ANALYSIS_SECS: u32 = 10;

/// Spawns one ffmpeg process per decode
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn spawn_decoder(&self, args: Vec<String>, label: &Path) -> Result<DecodedStream> {
        debug!("Spawning {} {}", self.ffmpeg, args.join(" "));
        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Pipeline(format!("failed to start {}: {}", self.ffmpeg, e)))?;
        DecodedStream::from_child(child, label.display().to_string())
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

/// Arguments for a decode, optionally filtered and seeked
pub fn decode_args(source: &Path, filter_graph: Option<&str>, seek_secs: f64) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
    ];
    if seek_secs > 0.0 {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", seek_secs));
    }
    args.push("-i".to_string());
    args.push(source.display().to_string());
    if let Some(graph) = filter_graph {
        args.push("-af".to_string());
        args.push(graph.to_string());
    }
    args.push("-vn".to_string());
    args.push("-f".to_string());
    args.push("s16le".to_string());
    args.push("-ar".to_string());
    args.push(SAMPLE_RATE.to_string());
    args.push("-ac".to_string());
    args.push(CHANNELS.to_string());
    args.push("pipe:1".to_string());
    args
}

/// Arguments for a duration probe
pub fn probe_args(source: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        source.display().to_string(),
    ]
}

/// Arguments for the volumedetect pass over the first seconds of a file
pub fn peak_args(source: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-t".to_string(),
        PEAK_ANALYSIS_SECS.to_string(),
        "-i".to_string(),
        source.display().to_string(),
        "-af".to_string(),
        "volumedetect".to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// Parse `max_volume: -3.2 dB` out of volumedetect output into a linear peak
pub fn parse_max_volume(output: &str) -> Option<f32> {
    let line = output.lines().find(|l| l.contains("max_volume:"))?;
    let value = line.split("max_volume:").nth(1)?.trim();
    let db: f32 = value.trim_end_matches("dB").trim().parse().ok()?;
    let peak = 10f32.powf(db / 20.0);
    (peak.is_finite() && peak > 0.0).then(|| peak.min(1.0))
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn decode(
        &self,
        source: &Path,
        filter: Option<FilterPreset>,
        speed: f64,
    ) -> Result<DecodedStream> {
        let graph = filter.map(|f| f.filter_graph(speed));
        self.spawn_decoder(decode_args(source, graph.as_deref(), 0.0), source)
    }

    async fn decode_faded(&self, source: &Path, fade: &FadeSpec) -> Result<DecodedStream> {
        let graph = fade.filter_graph();
        self.spawn_decoder(decode_args(source, Some(&graph), fade.seek_secs), source)
    }

    async fn probe_duration(&self, source: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args(probe_args(source))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("failed to start {}: {}", self.ffprobe, e)))?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "{} exited with {} for {}",
                self.ffprobe,
                output.status,
                source.display()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<f64>().map_err(|_| {
            Error::Probe(format!(
                "unparseable duration '{}' for {}",
                text.trim(),
                source.display()
            ))
        })
    }

    async fn estimate_peak(&self, source: &Path) -> Result<f32> {
        let output = Command::new(&self.ffmpeg)
            .args(peak_args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("failed to start {}: {}", self.ffmpeg, e)))?;

        // volumedetect reports on stderr
        let text = String::from_utf8_lossy(&output.stderr);
        parse_max_volume(&text)
            .ok_or_else(|| Error::Probe(format!("no peak level for {}", source.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plain_decode_args() {
        let args = decode_args(&PathBuf::from("/music/a.mp3"), None, 0.0);
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-af".to_string()));
        assert_eq!(
            &args[args.len() - 7..],
            &["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"]
        );
    }

    #[test]
    fn test_filtered_seeked_args() {
        let args = decode_args(&PathBuf::from("a.mp3"), Some("aecho=0.8:0.9:1000:0.3"), 12.5);
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[ss + 1], "12.500");
        // Seek before input for fast positioning
        assert!(ss < input);
        let af = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af + 1], "aecho=0.8:0.9:1000:0.3");
    }

    #[test]
    fn test_probe_args() {
        let args = probe_args(&PathBuf::from("x.ogg"));
        assert_eq!(
            args,
            vec!["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0", "x.ogg"]
        );
    }

    #[test]
    fn test_parse_max_volume() {
        let out = "[Parsed_volumedetect_0 @ 0x1] mean_volume: -20.1 dB\n\
                   [Parsed_volumedetect_0 @ 0x1] max_volume: -6.0 dB\n";
        let peak = parse_max_volume(out).unwrap();
        assert!((peak - 0.501).abs() < 0.01);

        assert_eq!(parse_max_volume("max_volume: 0.0 dB"), Some(1.0));
        assert_eq!(parse_max_volume("nothing here"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_pipeline_error() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = transcoder
            .decode(&PathBuf::from("a.mp3"), None, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));

        let secs = transcoder.duration_or(&PathBuf::from("a.mp3"), 30.0).await;
        assert_eq!(secs, 30.0);
    }
}
