//! Mel spectrogram computation
//!
//! Produces the normalized log-magnitude mel representation the
//! acoustic model is trained against. The log floor is 1e-5 so that
//! silent frames land exactly on the model's mel padding value.

use anyhow::Result;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use crate::config::AudioConfig;

const LOG_FLOOR: f32 = 1e-5;

/// Mel spectrogram extractor.
pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    win_length: usize,
    n_mels: usize,
    mel_filters: Vec<Vec<f32>>,
    window: Vec<f32>,
}

impl MelSpectrogram {
    /// Build the extractor from the shared audio configuration.
    pub fn new(cfg: &AudioConfig) -> Self {
        let window = hann_window(cfg.win_length);
        let fmax = cfg.fmax.unwrap_or(cfg.sample_rate as f32 / 2.0);
        let mel_filters =
            mel_filterbank(cfg.n_fft, cfg.n_mels, cfg.sample_rate, cfg.fmin, fmax);
        Self {
            n_fft: cfg.n_fft,
            hop_length: cfg.hop_length,
            win_length: cfg.win_length,
            n_mels: cfg.n_mels,
            mel_filters,
            window,
        }
    }

    /// Number of mel bands per frame.
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Compute the log-mel spectrogram, frames outermost:
    /// `result[frame][mel_band]`.
    pub fn compute(&self, audio: &[f32]) -> Result<Vec<Vec<f32>>> {
        let stft = self.stft(audio);
        Ok(stft
            .iter()
            .map(|frame| {
                self.mel_filters
                    .iter()
                    .map(|filter| {
                        let energy: f32 = filter
                            .iter()
                            .zip(frame.iter())
                            .map(|(f, c)| f * c.norm())
                            .sum();
                        energy.max(LOG_FLOOR).ln()
                    })
                    .collect()
            })
            .collect())
    }

    fn stft(&self, audio: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(self.n_fft);

        let num_frames = audio.len() / self.hop_length + 1;
        let mut frames = Vec::with_capacity(num_frames);
        for i in 0..num_frames {
            let start = i * self.hop_length;
            let mut frame: Vec<Complex<f32>> = (0..self.n_fft)
                .map(|j| {
                    let sample = audio.get(start + j).copied().unwrap_or(0.0);
                    let w = if j < self.win_length { self.window[j] } else { 0.0 };
                    Complex::new(sample * w, 0.0)
                })
                .collect();
            fft.process(&mut frame);
            frames.push(frame[..self.n_fft / 2 + 1].to_vec());
        }
        frames
    }
}

/// Hann window of the given size.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank, `n_mels` filters over `n_fft / 2 + 1`
/// frequency bins.
pub fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;
    let freq_bins: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = vec![vec![0.0; n_freqs]; n_mels];
    for i in 0..n_mels {
        let left = mel_points[i];
        let center = mel_points[i + 1];
        let right = mel_points[i + 2];
        for (j, &freq) in freq_bins.iter().enumerate() {
            if freq >= left && freq <= center && center > left {
                filters[i][j] = (freq - left) / (center - left);
            } else if freq > center && freq <= right && right > center {
                filters[i][j] = (right - freq) / (right - center);
            }
        }
    }
    filters
}
