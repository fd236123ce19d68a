//! Audio file output

use anyhow::{Context, Result};
use std::path::Path;

/// WAV file writer.
pub struct AudioOutput;

impl AudioOutput {
    /// Save float samples to a 16-bit mono WAV file. Samples are
    /// expected in [-1, 1]; anything outside is clipped.
    pub fn save<P: AsRef<Path>>(samples: &[f32], sample_rate: u32, path: P) -> Result<()> {
        let path = path.as_ref();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating wav file {:?}", path))?;
        for &sample in samples {
            writer.write_sample(quantize(sample))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clips_out_of_range() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(2.5), i16::MAX);
        assert_eq!(quantize(-2.5), -i16::MAX);
    }
}
