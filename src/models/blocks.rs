//! Shared convolutional building blocks

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{BatchNorm, Conv1d, Conv1dConfig, Linear, Module, ModuleT, VarBuilder};

/// 1D convolution followed by an optional ReLU and batch normalization.
///
/// The activation runs before the normalization; the encoder and the
/// series predictors both rely on that ordering.
pub struct BatchNormConv {
    conv: Conv1d,
    bnorm: BatchNorm,
    relu: bool,
}

impl BatchNormConv {
    /// Same-padded convolution with `kernel_size` taps.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        relu: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv1dConfig {
            padding: kernel_size / 2,
            ..Default::default()
        };
        let conv =
            candle_nn::conv1d_no_bias(in_channels, out_channels, kernel_size, cfg, vb.pp("conv"))?;
        let bnorm = candle_nn::batch_norm(out_channels, 1e-5, vb.pp("bnorm"))?;
        Ok(Self { conv, bnorm, relu })
    }

    /// Input and output are channel-first: (batch, channels, seq).
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        let x = if self.relu { x.relu()? } else { x };
        self.bnorm.forward_t(&x, train).map_err(Into::into)
    }
}

/// Highway layer: a sigmoid gate blends a transformed path with the
/// identity path.
pub struct Highway {
    w1: Linear,
    w2: Linear,
}

impl Highway {
    /// Gate and transform projections of width `dims`.
    pub fn new(dims: usize, vb: VarBuilder) -> Result<Self> {
        let w1 = candle_nn::linear(dims, dims, vb.pp("w1"))?;
        let w2 = candle_nn::linear(dims, dims, vb.pp("w2"))?;
        Ok(Self { w1, w2 })
    }

    /// Channel-last input (batch, seq, dims), same-shape output.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let transformed = self.w1.forward(x)?.relu()?;
        let gate = candle_nn::ops::sigmoid(&self.w2.forward(x)?)?;
        let carry = gate.affine(-1.0, 1.0)?;
        ((gate * transformed)? + (carry * x)?).map_err(Into::into)
    }
}
