use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{Processor, ProcessorOutput};

/// Built-in processor: validates and probes the WAV payload and emits a
/// transcript skeleton carrying the audio properties. A real inference
/// backend slots in behind the same trait.
pub struct TranscribeProcessor;

impl TranscribeProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TranscribeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

struct WavProbe {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    duration_seconds: f64,
}

fn probe_wav(path: &Path) -> Result<WavProbe> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    let duration_seconds = reader.duration() as f64 / spec.sample_rate as f64;
    Ok(WavProbe {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        duration_seconds,
    })
}

#[async_trait]
impl Processor for TranscribeProcessor {
    async fn process(&self, input: &Path) -> Result<ProcessorOutput> {
        info!("Processing audio file: {}", input.display());

        // hound is synchronous; keep the decode off the async pool.
        let path = PathBuf::from(input);
        let probe = tokio::task::spawn_blocking(move || probe_wav(&path)).await??;

        let source = input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let structured = json!({
            "source": source,
            "channels": probe.channels,
            "sample_rate": probe.sample_rate,
            "bits_per_sample": probe.bits_per_sample,
            "duration_seconds": probe.duration_seconds,
            "segments": [],
        });

        let rendered = format!(
            "# Transcript\n\n\
             Source: `{}`\n\n\
             | Property | Value |\n|---|---|\n\
             | Channels | {} |\n\
             | Sample rate | {} Hz |\n\
             | Bits per sample | {} |\n\
             | Duration | {:.2} s |\n\n\
             _No segments produced._\n",
            source, probe.channels, probe.sample_rate, probe.bits_per_sample, probe.duration_seconds
        );

        Ok(ProcessorOutput { structured, rendered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_test_wav(path: &Path, samples: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 128) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn probes_valid_wav() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 16_000);

        let output = TranscribeProcessor::new().process(&path).await.unwrap();
        assert_eq!(output.structured["sample_rate"], 16_000);
        assert_eq!(output.structured["duration_seconds"], 1.0);
        assert!(output.rendered.contains("# Transcript"));
    }

    #[tokio::test]
    async fn fails_on_missing_input() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.wav");
        let result = TranscribeProcessor::new().process(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fails_on_garbage_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"not a wav at all").unwrap();
        let result = TranscribeProcessor::new().process(&path).await;
        assert!(result.is_err());
    }
}
