//! Length regulation
//!
//! Converts a token-resolution hidden sequence into a frame-resolution
//! one using per-token durations. Three strategies exist; which one a
//! model uses is fixed at construction time because the frame boundaries
//! they produce differ numerically and vocoders are sensitive to that.
//!
//! - [`HardIndexExpansion`]: cumulative-duration index building plus a
//!   gather. Inference adds a +0.5 rounding offset before truncation,
//!   training does not; the asymmetry is long-standing observed behavior
//!   and is pinned by a test rather than unified.
//! - [`RepeatInterleaveExpansion`]: nearest-integer repetition per
//!   token, zero-padded across the batch.
//! - [`GaussianUpsampling`]: soft attention over Gaussian windows
//!   centered on each token, with a predicted per-token bandwidth.

use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};

use crate::config::{RegulatorConfig, RegulatorKind};

/// Length regulation strategy, selected from config at construction.
pub enum LengthRegulator {
    /// Cumulative-duration index building plus gather.
    HardIndex(HardIndexExpansion),
    /// Nearest-integer repetition per token.
    RepeatInterleave(RepeatInterleaveExpansion),
    /// Soft Gaussian-window attention over token centers.
    Gaussian(GaussianUpsampling),
}

impl LengthRegulator {
    /// `in_dims` is the feature width of the hidden sequence; only the
    /// Gaussian variant carries weights (its bandwidth head).
    pub fn new(cfg: &RegulatorConfig, in_dims: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match cfg.kind {
            RegulatorKind::HardIndex => Self::HardIndex(HardIndexExpansion),
            RegulatorKind::RepeatInterleave => {
                Self::RepeatInterleave(RepeatInterleaveExpansion)
            }
            RegulatorKind::Gaussian => Self::Gaussian(GaussianUpsampling::new(cfg, in_dims, vb)?),
        })
    }

    /// Expand (batch, tokens, features) to (batch, frames, features)
    /// according to `durations` (batch, tokens). `lens` marks valid
    /// token counts in padded batches. The caller guarantees a positive
    /// total duration; see the degenerate-input guard in `generate`.
    pub fn expand(
        &self,
        x: &Tensor,
        durations: &Tensor,
        lens: Option<&[usize]>,
        train: bool,
    ) -> Result<Tensor> {
        match self {
            Self::HardIndex(r) => r.expand(x, durations, train),
            Self::RepeatInterleave(r) => r.expand(x, durations),
            Self::Gaussian(r) => r.expand(x, durations, lens),
        }
    }
}

/// Discrete expansion through an explicit frame-to-token index.
pub struct HardIndexExpansion;

impl HardIndexExpansion {
    /// Per row: clamp durations to >= 0, take the inclusive prefix sum,
    /// truncate to integer frame boundaries (+0.5 first at inference),
    /// and assign every frame the token whose cumulative range covers
    /// it. Frames past the last boundary repeat the final token index,
    /// which also right-pads shorter sequences up to the batch max.
    fn build_index(&self, durations: &Tensor, train: bool) -> Result<(Vec<Vec<usize>>, usize)> {
        let dur: Vec<Vec<f32>> = durations.to_vec2()?;
        let mut bounds: Vec<Vec<i64>> = Vec::with_capacity(dur.len());
        let mut max_frames = 1usize;
        for row in &dur {
            let mut running = 0f32;
            let mut row_bounds = Vec::with_capacity(row.len());
            for &d in row {
                running += d.max(0.0);
                let boundary = if train { running } else { running + 0.5 };
                row_bounds.push(boundary as i64);
            }
            if let Some(&last) = row_bounds.last() {
                max_frames = max_frames.max(last.max(0) as usize);
            }
            bounds.push(row_bounds);
        }

        let mut index = Vec::with_capacity(bounds.len());
        for row_bounds in &bounds {
            let mut row = vec![0usize; max_frames];
            let mut pos = 0usize;
            let mut token = 0usize;
            for (j, &b) in row_bounds.iter().enumerate() {
                token = j;
                let end = (b.max(0) as usize).min(max_frames);
                for frame in row.iter_mut().take(end).skip(pos) {
                    *frame = j;
                }
                pos = pos.max(end);
            }
            for frame in row.iter_mut().skip(pos) {
                *frame = token;
            }
            index.push(row);
        }
        Ok((index, max_frames))
    }

    /// Expand by gathering each frame's source token feature vector.
    pub fn expand(&self, x: &Tensor, durations: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _tokens, channels) = x.dims3()?;
        let (index, max_frames) = self.build_index(durations, train)?;
        let mut flat = Vec::with_capacity(batch * max_frames * channels);
        for row in &index {
            for &j in row {
                for _ in 0..channels {
                    flat.push(j as u32);
                }
            }
        }
        let idx = Tensor::from_vec(flat, (batch, max_frames, channels), x.device())?;
        x.contiguous()?.gather(&idx, 1).map_err(Into::into)
    }
}

/// Discrete expansion by repeating each token's feature vector.
pub struct RepeatInterleaveExpansion;

impl RepeatInterleaveExpansion {
    /// Each token repeats `trunc(d + 0.5)` times. Sequences shorter
    /// than the batch max are right-padded with zero vectors, unlike
    /// the index-based variant's last-token repeat.
    pub fn expand(&self, x: &Tensor, durations: &Tensor) -> Result<Tensor> {
        let (batch, tokens, channels) = x.dims3()?;
        let dur: Vec<Vec<f32>> = durations.to_vec2()?;
        let reps: Vec<Vec<usize>> = dur
            .iter()
            .map(|row| row.iter().map(|d| (d.max(0.0) + 0.5) as usize).collect())
            .collect();
        let max_frames = reps
            .iter()
            .map(|row| row.iter().sum::<usize>())
            .max()
            .unwrap_or(0)
            .max(1);

        let values: Vec<Vec<Vec<f32>>> = x.to_vec3()?;
        let mut flat = vec![0f32; batch * max_frames * channels];
        for b in 0..batch {
            let mut frame = 0usize;
            for j in 0..tokens {
                for _ in 0..reps[b][j] {
                    let dst = (b * max_frames + frame) * channels;
                    flat[dst..dst + channels].copy_from_slice(&values[b][j]);
                    frame += 1;
                }
            }
        }
        Tensor::from_vec(flat, (batch, max_frames, channels), x.device()).map_err(Into::into)
    }
}

/// Soft expansion: every frame is a softmax-weighted sum over all
/// tokens, with Gaussian logits around each token's temporal center.
pub struct GaussianUpsampling {
    range: Linear,
    sigma_min: f32,
    sigma_max: f32,
}

impl GaussianUpsampling {
    /// Build the bandwidth head over `in_dims`-wide features.
    pub fn new(cfg: &RegulatorConfig, in_dims: usize, vb: VarBuilder) -> Result<Self> {
        let range = candle_nn::linear(in_dims, 1, vb.pp("range"))?;
        Ok(Self {
            range,
            sigma_min: cfg.sigma_min,
            sigma_max: cfg.sigma_max,
        })
    }

    /// Expand through the normalized Gaussian attention matrix.
    pub fn expand(&self, x: &Tensor, durations: &Tensor, lens: Option<&[usize]>) -> Result<Tensor> {
        let (batch, tokens, _channels) = x.dims3()?;
        // Durations act as constants here: centers are computed on the
        // host, so the duration predictor receives no gradient through
        // the attention matrix.
        let dur: Vec<Vec<f32>> = durations.detach().to_vec2()?;

        let mut centers = Vec::with_capacity(batch * tokens);
        let mut max_frames = 1usize;
        for row in &dur {
            let mut running = 0f32;
            for &d in row {
                let d = d.max(0.0);
                running += d;
                centers.push(running - d / 2.0);
            }
            max_frames = max_frames.max(running.round() as usize);
        }
        let centers = Tensor::from_vec(centers, (batch, 1, tokens), x.device())?;

        let grid = Tensor::arange(0f32, max_frames as f32, x.device())?
            .reshape((1, max_frames, 1))?;

        // sigmoid-bounded bandwidth per token
        let sigma = candle_nn::ops::sigmoid(&self.range.forward(x)?)?;
        let sigma = sigma.affine((self.sigma_max - self.sigma_min) as f64, self.sigma_min as f64)?;
        let sigma = sigma.squeeze(2)?.unsqueeze(1)?; // (batch, 1, tokens)

        let diff = grid.broadcast_sub(&centers)?; // (batch, frames, tokens)
        let denom = (sigma.sqr()? * 2.0)?;
        let mut logits = diff.sqr()?.broadcast_div(&denom)?.neg()?;

        if let Some(lens) = lens {
            let mut mask = vec![0f32; batch * tokens];
            for (b, &len) in lens.iter().enumerate() {
                for j in len.min(tokens)..tokens {
                    mask[b * tokens + j] = f32::NEG_INFINITY;
                }
            }
            let mask = Tensor::from_vec(mask, (batch, 1, tokens), x.device())?;
            logits = logits.broadcast_add(&mask)?;
        }

        let weights = candle_nn::ops::softmax(&logits, D::Minus1)?;
        weights.matmul(&x.contiguous()?).map_err(Into::into)
    }
}
