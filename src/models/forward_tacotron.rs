//! Non-autoregressive acoustic model
//!
//! Phoneme IDs are encoded by a CBHG prenet, fused with pitch and
//! energy contours, expanded to frame resolution by the length
//! regulator, and decoded into mel-spectrogram frames by a BiLSTM
//! plus a CBHG postnet refinement.
//!
//! Two mutually exclusive entry points: [`ForwardTacotron::forward`]
//! (teacher-forced training pass over ground-truth durations and
//! contours) and [`ForwardTacotron::generate`] (inference from token
//! IDs alone).

use anyhow::Result;
use candle_core::{Device, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, Linear, Module, VarBuilder};

use crate::config::AcousticConfig;
use crate::models::cbhg::Cbhg;
use crate::models::length_regulator::LengthRegulator;
use crate::models::rnn::BiLstm;
use crate::models::series_predictor::SeriesPredictor;

/// Fill value for mel frames beyond a sequence's length: log-magnitude
/// silence, ln(1e-5).
pub const MEL_PAD_VALUE: f32 = -11.5129;

/// One teacher-forced training batch. Contours are per token; the
/// durations are ground-truth frame counts.
pub struct TrainingBatch<'a> {
    /// Token IDs, (batch, tokens) u32.
    pub tokens: &'a Tensor,
    /// Valid token count per sequence.
    pub token_lens: &'a [usize],
    /// Ground-truth durations, (batch, tokens) f32.
    pub durations: &'a Tensor,
    /// Ground-truth pitch contour, (batch, tokens) f32.
    pub pitch: &'a Tensor,
    /// Ground-truth energy contour, (batch, tokens) f32.
    pub energy: &'a Tensor,
    /// Frame count the mel outputs are padded/truncated to.
    pub mel_frames: usize,
}

/// Training-pass outputs, aligned with their loss targets.
pub struct TrainingOutput {
    /// Initial mel prediction, (batch, n_mels, mel_frames).
    pub mel: Tensor,
    /// Refined mel prediction, (batch, n_mels, mel_frames).
    pub mel_post: Tensor,
    /// Predicted durations, (batch, tokens).
    pub dur_hat: Tensor,
    /// Predicted pitch, (batch, 1, tokens).
    pub pitch_hat: Tensor,
    /// Predicted energy, (batch, 1, tokens).
    pub energy_hat: Tensor,
}

/// Inference outputs. Tensors are detached from any gradient context.
pub struct GenerateOutput {
    /// Initial mel prediction, (1, n_mels, frames).
    pub mel: Tensor,
    /// Refined mel prediction, (1, n_mels, frames).
    pub mel_post: Tensor,
    /// Durations actually used for expansion, one per token.
    pub durations: Vec<f32>,
    /// Pitch contour after any caller transform, one per token.
    pub pitch: Vec<f32>,
    /// Energy contour after any caller transform, one per token.
    pub energy: Vec<f32>,
}

/// ForwardTacotron acoustic model.
pub struct ForwardTacotron {
    embedding: Embedding,
    dur_pred: SeriesPredictor,
    pitch_pred: SeriesPredictor,
    energy_pred: SeriesPredictor,
    prenet: Cbhg,
    pitch_proj: Option<Conv1d>,
    energy_proj: Option<Conv1d>,
    lr: LengthRegulator,
    lstm: BiLstm,
    lin: Linear,
    postnet: Cbhg,
    post_proj: Linear,
    dropout: f32,
    step: u64,
    device: Device,
}

impl ForwardTacotron {
    /// Instantiate the architecture described by `cfg` over `vb`.
    /// Tensor names and shapes are the checkpoint contract; a mismatch
    /// against persisted weights fails here, before any computation.
    pub fn new(cfg: &AcousticConfig, num_symbols: usize, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(num_symbols, cfg.embed_dims, vb.pp("embedding"))?;
        let dur_pred = SeriesPredictor::new(
            num_symbols,
            cfg.series_embed_dims,
            &cfg.duration_predictor,
            vb.pp("dur_pred"),
        )?;
        let pitch_pred = SeriesPredictor::new(
            num_symbols,
            cfg.series_embed_dims,
            &cfg.pitch_predictor,
            vb.pp("pitch_pred"),
        )?;
        let energy_pred = SeriesPredictor::new(
            num_symbols,
            cfg.series_embed_dims,
            &cfg.energy_predictor,
            vb.pp("energy_pred"),
        )?;
        let prenet = Cbhg::new(
            &cfg.prenet,
            cfg.embed_dims,
            [cfg.prenet.dims, cfg.embed_dims],
            vb.pp("prenet"),
        )?;

        let proj_cfg = Conv1dConfig {
            padding: 1,
            ..Default::default()
        };
        let pitch_proj = if cfg.pitch_emb_dims > 0 {
            Some(candle_nn::conv1d(
                1,
                cfg.pitch_emb_dims,
                3,
                proj_cfg,
                vb.pp("pitch_proj"),
            )?)
        } else {
            None
        };
        let energy_proj = if cfg.energy_emb_dims > 0 {
            Some(candle_nn::conv1d(
                1,
                cfg.energy_emb_dims,
                3,
                proj_cfg,
                vb.pp("energy_proj"),
            )?)
        } else {
            None
        };

        // encoder output plus whichever contour embeddings are enabled
        let fused_dims = 2 * cfg.prenet.dims + cfg.pitch_emb_dims + cfg.energy_emb_dims;
        let lr = LengthRegulator::new(&cfg.regulator, fused_dims, vb.pp("lr"))?;
        let lstm = BiLstm::new(fused_dims, cfg.rnn_dims, vb.pp("lstm"))?;
        let lin = candle_nn::linear(2 * cfg.rnn_dims + fused_dims, cfg.n_mels, vb.pp("lin"))?;
        let postnet = Cbhg::new(
            &cfg.postnet,
            cfg.n_mels,
            [cfg.postnet.dims, cfg.n_mels],
            vb.pp("postnet"),
        )?;
        let post_proj = candle_nn::linear_no_bias(
            2 * cfg.postnet.dims + fused_dims,
            cfg.n_mels,
            vb.pp("post_proj"),
        )?;

        let step = vb
            .get_with_hints((1,), "step", candle_nn::init::ZERO)?
            .to_vec1::<f32>()?[0] as u64;

        Ok(Self {
            embedding,
            dur_pred,
            pitch_pred,
            energy_pred,
            prenet,
            pitch_proj,
            energy_proj,
            lr,
            lstm,
            lin,
            postnet,
            post_proj,
            dropout: cfg.dropout,
            step,
            device: vb.device().clone(),
        })
    }

    /// Training steps taken so far, as persisted with the weights.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Teacher-forced training pass. Increments the step counter
    /// exactly once and returns the predictions loss functions compare
    /// against ground truth.
    pub fn forward(&mut self, batch: &TrainingBatch) -> Result<TrainingOutput> {
        self.step += 1;
        let lens = Some(batch.token_lens);

        let dur_hat = self
            .dur_pred
            .forward(batch.tokens, lens, 1.0, true)?
            .squeeze(2)?;
        let pitch_hat = self
            .pitch_pred
            .forward(batch.tokens, lens, 1.0, true)?
            .transpose(1, 2)?;
        let energy_hat = self
            .energy_pred
            .forward(batch.tokens, lens, 1.0, true)?
            .transpose(1, 2)?;

        let x = self.embedding.forward(batch.tokens)?;
        let x = x.transpose(1, 2)?.contiguous()?;
        let x = self.prenet.forward(&x, true)?;
        // training fuses the ground-truth contours (teacher forcing)
        let x = self.fuse(&x, &batch.pitch.unsqueeze(1)?, &batch.energy.unsqueeze(1)?)?;
        let x = self.lr.expand(&x, batch.durations, lens, true)?;
        let (mel, mel_post) = self.decode(&x, true)?;

        Ok(TrainingOutput {
            mel: pad_mel(&mel, batch.mel_frames)?,
            mel_post: pad_mel(&mel_post, batch.mel_frames)?,
            dur_hat,
            pitch_hat,
            energy_hat,
        })
    }

    /// Inference with identity pitch/energy transforms.
    pub fn generate(&self, token_ids: &[u32], alpha: f64) -> Result<GenerateOutput> {
        self.generate_with(token_ids, alpha, |p| Ok(p.clone()), |e| Ok(e.clone()))
    }

    /// Inference. `alpha` uniformly scales speech rate; `pitch_fn` and
    /// `energy_fn` may reshape the predicted contours (e.g. transpose
    /// pitch) before fusion.
    pub fn generate_with<P, E>(
        &self,
        token_ids: &[u32],
        alpha: f64,
        pitch_fn: P,
        energy_fn: E,
    ) -> Result<GenerateOutput>
    where
        P: Fn(&Tensor) -> Result<Tensor>,
        E: Fn(&Tensor) -> Result<Tensor>,
    {
        // an empty sequence would break the convolution stack's shape
        // invariants; substitute a single padding token instead
        let ids: Vec<u32> = if token_ids.is_empty() {
            vec![crate::text::PAD_ID]
        } else {
            token_ids.to_vec()
        };
        let num_tokens = ids.len();
        let tokens = Tensor::from_vec(ids, (1, num_tokens), &self.device)?;

        let dur = self.dur_pred.forward(&tokens, None, alpha, false)?;
        let mut dur_v: Vec<f32> = dur.flatten_all()?.to_vec1()?;
        if dur_v.iter().map(|d| *d as i64).sum::<i64>() <= 0 {
            // degenerate prediction; force a small positive floor so
            // the regulator still emits usable frames
            dur_v = vec![2.0; num_tokens];
        }
        let dur = Tensor::from_vec(dur_v.clone(), (1, num_tokens), &self.device)?;

        let pitch_hat = self
            .pitch_pred
            .forward(&tokens, None, 1.0, false)?
            .transpose(1, 2)?;
        let pitch_hat = pitch_fn(&pitch_hat)?;
        let energy_hat = self
            .energy_pred
            .forward(&tokens, None, 1.0, false)?
            .transpose(1, 2)?;
        let energy_hat = energy_fn(&energy_hat)?;

        let x = self.embedding.forward(&tokens)?;
        let x = x.transpose(1, 2)?.contiguous()?;
        let x = self.prenet.forward(&x, false)?;
        let x = self.fuse(&x, &pitch_hat, &energy_hat)?;
        let x = self.lr.expand(&x, &dur, None, false)?;
        let (mel, mel_post) = self.decode(&x, false)?;

        Ok(GenerateOutput {
            mel: mel.detach(),
            mel_post: mel_post.detach(),
            durations: dur_v,
            pitch: pitch_hat.flatten_all()?.to_vec1()?,
            energy: energy_hat.flatten_all()?.to_vec1()?,
        })
    }

    /// Concatenate projected pitch/energy contours onto the encoder
    /// output. Disabled modalities (emb dims 0) cost nothing and leave
    /// the hidden state untouched.
    fn fuse(&self, x: &Tensor, pitch: &Tensor, energy: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        if let Some(proj) = &self.pitch_proj {
            let p = proj.forward(&pitch.contiguous()?)?.transpose(1, 2)?;
            x = Tensor::cat(&[&x, &p], D::Minus1)?;
        }
        if let Some(proj) = &self.energy_proj {
            let e = proj.forward(&energy.contiguous()?)?.transpose(1, 2)?;
            x = Tensor::cat(&[&x, &e], D::Minus1)?;
        }
        Ok(x)
    }

    /// Frame-level hidden states to (initial, refined) mels, both
    /// channel-first (batch, n_mels, frames).
    fn decode(&self, x: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let h = self.lstm.forward(x, None)?;
        let h = if train {
            candle_nn::ops::dropout(&h, self.dropout)?
        } else {
            h
        };
        let h = Tensor::cat(&[x, &h], D::Minus1)?;
        let mel = self.lin.forward(&h)?.transpose(1, 2)?.contiguous()?;

        let post = self.postnet.forward(&mel, train)?;
        let post = Tensor::cat(&[x, &post], D::Minus1)?;
        let mel_post = self.post_proj.forward(&post)?.transpose(1, 2)?.contiguous()?;
        Ok((mel, mel_post))
    }
}

/// Truncate or right-pad a (batch, n_mels, frames) mel to `frames`
/// using the silence fill value.
pub fn pad_mel(x: &Tensor, frames: usize) -> Result<Tensor> {
    let (batch, n_mels, have) = x.dims3()?;
    if have >= frames {
        return x.narrow(2, 0, frames).map_err(Into::into);
    }
    let pad = Tensor::full(MEL_PAD_VALUE, (batch, n_mels, frames - have), x.device())?;
    Tensor::cat(&[x, &pad], 2).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcousticConfig;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn small_config() -> AcousticConfig {
        let mut cfg = AcousticConfig::default();
        cfg.embed_dims = 16;
        cfg.series_embed_dims = 8;
        cfg.duration_predictor.conv_dims = 8;
        cfg.duration_predictor.rnn_dims = 4;
        cfg.pitch_predictor.conv_dims = 8;
        cfg.pitch_predictor.rnn_dims = 4;
        cfg.energy_predictor.conv_dims = 8;
        cfg.energy_predictor.rnn_dims = 4;
        cfg.pitch_emb_dims = 4;
        cfg.energy_emb_dims = 4;
        cfg.prenet.k = 3;
        cfg.prenet.dims = 8;
        cfg.prenet.num_highways = 2;
        cfg.postnet.k = 3;
        cfg.postnet.dims = 8;
        cfg.postnet.num_highways = 2;
        cfg.rnn_dims = 8;
        cfg.n_mels = 10;
        cfg
    }

    fn model(cfg: &AcousticConfig, device: &Device) -> (VarMap, ForwardTacotron) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = ForwardTacotron::new(cfg, 30, vb).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_generate_shapes() {
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, model) = model(&cfg, &device);

        let out = model.generate(&[1, 2, 3, 4], 1.0).unwrap();
        let (batch, n_mels, frames) = out.mel_post.dims3().unwrap();
        assert_eq!(batch, 1);
        assert_eq!(n_mels, 10);
        assert!(frames >= 1);
        assert_eq!(out.mel.dims3().unwrap(), (1, 10, frames));
        assert_eq!(out.durations.len(), 4);
        assert_eq!(out.pitch.len(), 4);
        assert_eq!(out.energy.len(), 4);
    }

    #[test]
    fn test_generate_empty_input_substitutes_token() {
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, model) = model(&cfg, &device);

        let out = model.generate(&[], 1.0).unwrap();
        assert_eq!(out.durations.len(), 1);
        assert!(out.mel_post.dim(2).unwrap() >= 1);
    }

    #[test]
    fn test_generate_degenerate_duration_floor() {
        // untrained weights predict near-zero durations; the guard must
        // deliver at least the 2-frames-per-token floor rather than a
        // zero-length mel
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, model) = model(&cfg, &device);

        let out = model.generate(&[5, 6, 7], 1.0).unwrap();
        let total: i64 = out.durations.iter().map(|d| *d as i64).sum();
        assert!(total > 0);
        assert!(out.mel_post.dim(2).unwrap() >= 1);
    }

    #[test]
    fn test_forward_increments_step_once() {
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, mut model) = model(&cfg, &device);
        assert_eq!(model.step(), 0);

        let tokens = Tensor::from_vec(vec![1u32, 2, 3], (1, 3), &device).unwrap();
        let durations = Tensor::from_vec(vec![2.0f32, 1.0, 2.0], (1, 3), &device).unwrap();
        let pitch = Tensor::from_vec(vec![0.1f32, 0.2, 0.3], (1, 3), &device).unwrap();
        let energy = Tensor::from_vec(vec![0.5f32, 0.5, 0.5], (1, 3), &device).unwrap();
        let batch = TrainingBatch {
            tokens: &tokens,
            token_lens: &[3],
            durations: &durations,
            pitch: &pitch,
            energy: &energy,
            mel_frames: 8,
        };
        let out = model.forward(&batch).unwrap();
        assert_eq!(model.step(), 1);
        assert_eq!(out.mel.dims3().unwrap(), (1, 10, 8));
        assert_eq!(out.mel_post.dims3().unwrap(), (1, 10, 8));
        assert_eq!(out.dur_hat.dims2().unwrap(), (1, 3));
        assert_eq!(out.pitch_hat.dims3().unwrap(), (1, 1, 3));
    }

    #[test]
    fn test_forward_pads_mel_with_silence() {
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, mut model) = model(&cfg, &device);

        let tokens = Tensor::from_vec(vec![1u32, 2], (1, 2), &device).unwrap();
        let durations = Tensor::from_vec(vec![1.0f32, 1.0], (1, 2), &device).unwrap();
        let pitch = Tensor::from_vec(vec![0.0f32, 0.0], (1, 2), &device).unwrap();
        let energy = Tensor::from_vec(vec![0.0f32, 0.0], (1, 2), &device).unwrap();
        let batch = TrainingBatch {
            tokens: &tokens,
            token_lens: &[2],
            durations: &durations,
            pitch: &pitch,
            energy: &energy,
            mel_frames: 6,
        };
        let out = model.forward(&batch).unwrap();
        // total duration 2, so frames 2..6 are padding
        let v: Vec<Vec<Vec<f32>>> = out.mel_post.to_vec3().unwrap();
        for m in 0..10 {
            for f in 2..6 {
                assert!((v[0][m][f] - MEL_PAD_VALUE).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_disabled_modalities_leave_hidden_state_untouched() {
        let device = Device::Cpu;
        let mut cfg = small_config();
        cfg.pitch_emb_dims = 0;
        cfg.energy_emb_dims = 0;
        let (_map, model) = model(&cfg, &device);
        assert!(model.pitch_proj.is_none());
        assert!(model.energy_proj.is_none());

        let x = Tensor::randn(0.0f32, 1.0, (1, 4, 16), &device).unwrap();
        let contour = Tensor::zeros((1, 1, 4), DType::F32, &device).unwrap();
        let fused = model.fuse(&x, &contour, &contour).unwrap();
        let a: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = fused.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_frames_match_returned_durations() {
        // end-to-end duration-sum property for the hard-index regulator:
        // the mel length equals the rounded total of the durations the
        // model reports having used
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, model) = model(&cfg, &device);

        let out = model.generate(&[1, 2, 3, 4, 5], 1.0).unwrap();
        let total: f32 = out.durations.iter().map(|d| d.max(0.0)).sum();
        let expected = ((total + 0.5) as i64).max(1) as usize;
        assert_eq!(out.mel_post.dim(2).unwrap(), expected);
    }

    #[test]
    fn test_generate_with_pitch_function() {
        let device = Device::Cpu;
        let cfg = small_config();
        let (_map, model) = model(&cfg, &device);

        let base = model.generate(&[1, 2, 3], 1.0).unwrap();
        let shifted = model
            .generate_with(
                &[1, 2, 3],
                1.0,
                |p| (p + 1.0).map_err(Into::into),
                |e| Ok(e.clone()),
            )
            .unwrap();
        for (b, s) in base.pitch.iter().zip(shifted.pitch.iter()) {
            assert!((b + 1.0 - s).abs() < 1e-5);
        }
    }

    #[test]
    fn test_pad_mel_truncates() {
        let device = Device::Cpu;
        let x = Tensor::randn(0.0f32, 1.0, (1, 4, 9), &device).unwrap();
        let padded = pad_mel(&x, 5).unwrap();
        assert_eq!(padded.dims3().unwrap(), (1, 4, 5));
    }
}
