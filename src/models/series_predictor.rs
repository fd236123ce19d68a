//! Per-token scalar series prediction
//!
//! One network shape serves three heads: duration, pitch, and energy.
//! Tokens are embedded, pushed through a small convolution stack, a
//! bidirectional GRU, and a linear projection down to one value per
//! position. The `alpha` divisor is the global speech-rate control at
//! inference; alpha = 2 halves every predicted duration.

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Embedding, Linear, Module, VarBuilder};

use crate::config::PredictorConfig;
use crate::models::blocks::BatchNormConv;
use crate::models::rnn::{mask_padding, BiGru};

const CONV_LAYERS: usize = 3;
const KERNEL_SIZE: usize = 5;

/// Token-level scalar predictor (duration, pitch, or energy).
pub struct SeriesPredictor {
    embedding: Embedding,
    convs: Vec<BatchNormConv>,
    rnn: BiGru,
    lin: Linear,
    dropout: f32,
}

impl SeriesPredictor {
    /// Build a predictor head over the shared symbol vocabulary.
    pub fn new(
        num_symbols: usize,
        emb_dims: usize,
        cfg: &PredictorConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = candle_nn::embedding(num_symbols, emb_dims, vb.pp("embedding"))?;
        let mut convs = Vec::with_capacity(CONV_LAYERS);
        for i in 0..CONV_LAYERS {
            let in_channels = if i == 0 { emb_dims } else { cfg.conv_dims };
            convs.push(BatchNormConv::new(
                in_channels,
                cfg.conv_dims,
                KERNEL_SIZE,
                true,
                vb.pp(format!("convs.{}", i)),
            )?);
        }
        let rnn = BiGru::new(cfg.conv_dims, cfg.rnn_dims, vb.pp("rnn"))?;
        let lin = candle_nn::linear(2 * cfg.rnn_dims, 1, vb.pp("lin"))?;
        Ok(Self {
            embedding,
            convs,
            rnn,
            lin,
            dropout: cfg.dropout,
        })
    }

    /// Predict one scalar per token.
    ///
    /// `tokens` is (batch, seq) u32. With `lens` (padded training
    /// batches) the recurrent layer only sees each sequence's valid
    /// prefix and padded outputs are exactly 0.0. Output is
    /// (batch, seq, 1), divided by `alpha`.
    pub fn forward(
        &self,
        tokens: &Tensor,
        lens: Option<&[usize]>,
        alpha: f64,
        train: bool,
    ) -> Result<Tensor> {
        let x = self.embedding.forward(tokens)?;
        let mut x = x.transpose(1, 2)?.contiguous()?;
        for conv in &self.convs {
            x = conv.forward(&x, train)?;
            if train {
                x = candle_nn::ops::dropout(&x, self.dropout)?;
            }
        }
        let x = x.transpose(1, 2)?.contiguous()?;
        let x = self.rnn.forward(&x, lens)?;
        let x = self.lin.forward(&x)?;
        let x = (x / alpha)?;
        match lens {
            Some(lens) => mask_padding(&x, lens),
            None => Ok(x),
        }
    }
}
