use crate::CliError;
use hound::{SampleFormat, WavSpec};
use std::fs::File;
use std::path::Path;

/// Mono audio as the core sees it.
pub struct Audio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Read a WAV file, keeping only the first channel.
pub fn read(path: &Path) -> Result<Audio, CliError> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    tracing::debug!(
        "read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8_388_608.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (_, bits) => return Err(CliError::UnsupportedFormat(bits)),
    };

    let channels = spec.channels.max(1) as usize;
    let samples = interleaved.into_iter().step_by(channels).collect();
    Ok(Audio {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Write mono 16-bit PCM.
pub fn write(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
