//! Griffin-Lim phase reconstruction
//!
//! Signal-processing vocoder: inverts the mel filterbank with its
//! transpose, then iteratively estimates phase by alternating STFT and
//! inverse STFT while holding the magnitude fixed.

use anyhow::Result;
use candle_core::Tensor;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::audio::mel::{hann_window, mel_filterbank};
use crate::config::AudioConfig;

use super::Vocoder;

/// Griffin-Lim vocoder over the shared audio configuration.
pub struct GriffinLim {
    n_fft: usize,
    hop_length: usize,
    win_length: usize,
    sample_rate: u32,
    iters: usize,
    power: f32,
    mel_filters: Vec<Vec<f32>>,
    window: Vec<f32>,
}

impl GriffinLim {
    /// Build the vocoder from the shared audio configuration.
    pub fn new(cfg: &AudioConfig) -> Self {
        let fmax = cfg.fmax.unwrap_or(cfg.sample_rate as f32 / 2.0);
        Self {
            n_fft: cfg.n_fft,
            hop_length: cfg.hop_length,
            win_length: cfg.win_length,
            sample_rate: cfg.sample_rate,
            iters: cfg.griffin_lim_iters,
            power: cfg.power,
            mel_filters: mel_filterbank(cfg.n_fft, cfg.n_mels, cfg.sample_rate, cfg.fmin, fmax),
            window: hann_window(cfg.win_length),
        }
    }

    /// Approximate mel-to-linear inversion via the filterbank
    /// transpose, normalized per frequency bin.
    fn mel_to_linear(&self, mel: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let n_freqs = self.n_fft / 2 + 1;
        let frames = mel.first().map(|row| row.len()).unwrap_or(0);
        let norms: Vec<f32> = (0..n_freqs)
            .map(|f| self.mel_filters.iter().map(|filter| filter[f]).sum())
            .collect();

        let mut linear = vec![vec![0.0f32; frames]; n_freqs];
        for (m, filter) in self.mel_filters.iter().enumerate() {
            for f in 0..n_freqs {
                let w = filter[f];
                if w == 0.0 {
                    continue;
                }
                for t in 0..frames {
                    linear[f][t] += w * mel[m][t];
                }
            }
        }
        for f in 0..n_freqs {
            if norms[f] > 1e-8 {
                for v in linear[f].iter_mut() {
                    *v = (*v / norms[f]).powf(self.power);
                }
            }
        }
        linear
    }

    fn stft(&self, audio: &[f32], frames: usize) -> Vec<Vec<Complex<f32>>> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(self.n_fft);
        let mut out = Vec::with_capacity(frames);
        for i in 0..frames {
            let start = i * self.hop_length;
            let mut frame: Vec<Complex<f32>> = (0..self.n_fft)
                .map(|j| {
                    let sample = audio.get(start + j).copied().unwrap_or(0.0);
                    let w = if j < self.win_length { self.window[j] } else { 0.0 };
                    Complex::new(sample * w, 0.0)
                })
                .collect();
            fft.process(&mut frame);
            out.push(frame[..self.n_fft / 2 + 1].to_vec());
        }
        out
    }

    fn istft(&self, spec: &[Vec<Complex<f32>>]) -> Vec<f32> {
        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(self.n_fft);
        let frames = spec.len();
        let out_len = (frames.saturating_sub(1)) * self.hop_length + self.n_fft;
        let mut audio = vec![0.0f32; out_len];
        let mut weight = vec![0.0f32; out_len];

        for (i, half) in spec.iter().enumerate() {
            // rebuild the full spectrum from conjugate symmetry
            let mut frame = vec![Complex::new(0.0f32, 0.0); self.n_fft];
            frame[..half.len()].copy_from_slice(half);
            for k in half.len()..self.n_fft {
                frame[k] = half[self.n_fft - k].conj();
            }
            ifft.process(&mut frame);

            let start = i * self.hop_length;
            for j in 0..self.n_fft {
                let w = if j < self.win_length { self.window[j] } else { 0.0 };
                audio[start + j] += frame[j].re / self.n_fft as f32 * w;
                weight[start + j] += w * w;
            }
        }
        for (a, &w) in audio.iter_mut().zip(weight.iter()) {
            if w > 1e-8 {
                *a /= w;
            }
        }
        audio
    }

    fn reconstruct(&self, magnitude: &[Vec<f32>]) -> Vec<f32> {
        let n_freqs = self.n_fft / 2 + 1;
        let frames = magnitude.first().map(|row| row.len()).unwrap_or(0);
        if frames == 0 {
            return Vec::new();
        }

        // column-major complex spectrogram, zero phase to start
        let mut spec: Vec<Vec<Complex<f32>>> = (0..frames)
            .map(|t| (0..n_freqs).map(|f| Complex::new(magnitude[f][t], 0.0)).collect())
            .collect();

        for _ in 0..self.iters {
            let audio = self.istft(&spec);
            let estimate = self.stft(&audio, frames);
            for t in 0..frames {
                for f in 0..n_freqs {
                    let norm = estimate[t][f].norm();
                    let phase = if norm > 1e-8 {
                        estimate[t][f] / norm
                    } else {
                        Complex::new(1.0, 0.0)
                    };
                    spec[t][f] = phase * magnitude[f][t];
                }
            }
        }
        self.istft(&spec)
    }
}

impl Vocoder for GriffinLim {
    fn synthesize(&self, mel: &Tensor) -> Result<Vec<f32>> {
        let mel = if mel.dims().len() == 3 {
            mel.squeeze(0)?
        } else {
            mel.clone()
        };
        let log_mel: Vec<Vec<f32>> = mel.to_vec2()?;
        let mel_mag: Vec<Vec<f32>> = log_mel
            .iter()
            .map(|row| row.iter().map(|v| v.exp()).collect())
            .collect();

        let linear = self.mel_to_linear(&mel_mag);
        let mut audio = self.reconstruct(&linear);

        let peak = audio.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        if peak > 1e-8 {
            let gain = 0.95 / peak;
            for v in audio.iter_mut() {
                *v *= gain;
            }
        }
        Ok(audio)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
