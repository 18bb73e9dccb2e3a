//! Audio Test Fixture Generator
//!
//! Short WAV files whose content (and therefore content hash) differs per
//! generated file.

use std::path::{Path, PathBuf};

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub frequency_hz: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 0.25,
            sample_rate: 22050,
            channels: 1,
            frequency_hz: 440.0,
        }
    }
}

/// Generate a sine-tone WAV file
pub fn generate_sample_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let total_samples = (config.duration_seconds * config.sample_rate as f64) as usize;

    for i in 0..total_samples {
        let t = i as f32 / config.sample_rate as f32;
        let sample = (0.3 * (2.0 * std::f32::consts::PI * config.frequency_hz * t).sin() * i16::MAX as f32) as i16;
        for _ in 0..config.channels {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Generate `count` distinct WAV files named `<prefix>_NNN.wav` in `dir`
pub fn generate_sample_library(dir: &Path, prefix: &str, count: usize) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::with_capacity(count);

    for i in 0..count {
        let config = AudioConfig {
            frequency_hz: 220.0 + 10.0 * i as f32,
            ..AudioConfig::default()
        };
        let file_path = dir.join(format!("{}_{:03}.wav", prefix, i + 1));
        files.push(generate_sample_wav(&file_path, &config)?);
    }

    Ok(files)
}
