//! CBHG encoder stack
//!
//! Convolution bank + highway network + bidirectional GRU. Used twice:
//! as the prenet over token embeddings and as the postnet over the
//! initial mel prediction. The temporal length never changes, only the
//! channel width.

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

use crate::config::CbhgConfig;
use crate::models::blocks::{BatchNormConv, Highway};
use crate::models::rnn::BiGru;

/// CBHG: bank of multi-width convolutions, max-pooling, projection
/// convolutions with a residual, highway layers, and a BiGRU.
pub struct Cbhg {
    bank: Vec<BatchNormConv>,
    conv_project1: BatchNormConv,
    conv_project2: BatchNormConv,
    pre_highway: Option<Linear>,
    highways: Vec<Highway>,
    rnn: BiGru,
}

impl Cbhg {
    /// `proj_channels` are the two projection widths; the second must
    /// equal `in_channels` for the residual add.
    pub fn new(
        cfg: &CbhgConfig,
        in_channels: usize,
        proj_channels: [usize; 2],
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut bank = Vec::with_capacity(cfg.k);
        for k in 1..=cfg.k {
            bank.push(BatchNormConv::new(
                in_channels,
                cfg.dims,
                k,
                true,
                vb.pp(format!("bank.{}", k - 1)),
            )?);
        }
        let conv_project1 = BatchNormConv::new(
            cfg.k * cfg.dims,
            proj_channels[0],
            3,
            true,
            vb.pp("conv_project1"),
        )?;
        let conv_project2 = BatchNormConv::new(
            proj_channels[0],
            proj_channels[1],
            3,
            false,
            vb.pp("conv_project2"),
        )?;
        let pre_highway = if proj_channels[1] != cfg.dims {
            Some(candle_nn::linear_no_bias(
                proj_channels[1],
                cfg.dims,
                vb.pp("pre_highway"),
            )?)
        } else {
            None
        };
        let mut highways = Vec::with_capacity(cfg.num_highways);
        for i in 0..cfg.num_highways {
            highways.push(Highway::new(cfg.dims, vb.pp(format!("highways.{}", i)))?);
        }
        let rnn = BiGru::new(cfg.dims, cfg.dims, vb.pp("rnn"))?;
        Ok(Self {
            bank,
            conv_project1,
            conv_project2,
            pre_highway,
            highways,
            rnn,
        })
    }

    /// Input is channel-first (batch, in_channels, seq); output is
    /// channel-last (batch, seq, 2 * dims).
    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let seq_len = x.dim(2)?;
        let mut outs = Vec::with_capacity(self.bank.len());
        for conv in &self.bank {
            // even kernels overshoot by one frame under same-padding
            outs.push(conv.forward(x, train)?.narrow(2, 0, seq_len)?);
        }
        let y = Tensor::cat(&outs, 1)?;
        let y = max_pool_same(&y)?;
        let y = self.conv_project1.forward(&y, train)?;
        let y = self.conv_project2.forward(&y, train)?;
        let y = (y + x)?;

        let mut y = y.transpose(1, 2)?.contiguous()?;
        if let Some(pre) = &self.pre_highway {
            y = pre.forward(&y)?;
        }
        for highway in &self.highways {
            y = highway.forward(&y)?;
        }
        self.rnn.forward(&y, None)
    }
}

/// Max pooling with kernel 2, stride 1, preserving length: each frame
/// becomes the max of itself and its left neighbor.
fn max_pool_same(x: &Tensor) -> Result<Tensor> {
    let (batch, channels, seq) = x.dims3()?;
    let pad = Tensor::full(f32::NEG_INFINITY, (batch, channels, 1), x.device())?;
    let padded = Tensor::cat(&[&pad, x], 2)?;
    let left = padded.narrow(2, 0, seq)?;
    let right = padded.narrow(2, 1, seq)?;
    left.maximum(&right).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn test_max_pool_same() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![3f32, 1.0, 2.0], (1, 1, 3), &device).unwrap();
        let y = max_pool_same(&x).unwrap();
        let v: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![3.0, 3.0, 2.0]);
    }

    #[test]
    fn test_cbhg_preserves_token_count() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = CbhgConfig {
            k: 4,
            dims: 16,
            num_highways: 2,
        };
        let cbhg = Cbhg::new(&cfg, 8, [16, 8], vb).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (2, 8, 11), &device).unwrap();
        let y = cbhg.forward(&x, false).unwrap();
        assert_eq!(y.dims3().unwrap(), (2, 11, 32));
    }

    #[test]
    fn test_cbhg_pre_highway_on_dim_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = CbhgConfig {
            k: 2,
            dims: 12,
            num_highways: 1,
        };
        // proj output (6) differs from highway dims (12)
        let cbhg = Cbhg::new(&cfg, 6, [8, 6], vb).unwrap();
        assert!(cbhg.pre_highway.is_some());

        let x = Tensor::randn(0.0f32, 1.0, (1, 6, 5), &device).unwrap();
        let y = cbhg.forward(&x, false).unwrap();
        assert_eq!(y.dims3().unwrap(), (1, 5, 24));
    }
}
