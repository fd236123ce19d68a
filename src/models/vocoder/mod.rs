//! Vocoder seam: mel spectrogram to waveform
//!
//! The acoustic model is vocoder-agnostic; anything that can turn its
//! normalized log-mel output into samples plugs in behind [`Vocoder`].
//! A Griffin-Lim implementation ships here as the dependency-free
//! default; neural vocoders (WaveRNN-style autoregressive, GAN-based)
//! are external collaborators implementing the same trait.

mod griffin_lim;

use anyhow::Result;
use candle_core::Tensor;

pub use griffin_lim::GriffinLim;

/// Mel-to-waveform conversion strategy.
pub trait Vocoder {
    /// Convert a log-mel spectrogram, (n_mels, frames) or
    /// (1, n_mels, frames), into audio samples.
    fn synthesize(&self, mel: &Tensor) -> Result<Vec<f32>>;

    /// Sample rate of the produced audio.
    fn sample_rate(&self) -> u32;
}
