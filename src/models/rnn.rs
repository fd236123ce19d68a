//! Recurrent cells
//!
//! Candle ships no GRU/LSTM layers, so the cells are written out against
//! per-gate weight matrices in the PyTorch layout: `weight_ih` is
//! (gates * hidden, input) with the gate blocks stacked row-wise.
//! Bidirectional wrappers handle padded batches by reversing only the
//! valid prefix of each sequence, so the backward direction starts at
//! the true sequence end and never reads across the padding boundary.

use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{init, VarBuilder};

fn sigmoid(x: &Tensor) -> Result<Tensor> {
    candle_nn::ops::sigmoid(x).map_err(Into::into)
}

/// Single-direction GRU.
pub struct GruCell {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden: usize,
}

impl GruCell {
    /// Gate weights for `input`-wide inputs and `hidden`-wide state.
    pub fn new(input: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let w_ih = vb.get_with_hints((3 * hidden, input), "weight_ih", init::DEFAULT_KAIMING_NORMAL)?;
        let w_hh = vb.get_with_hints((3 * hidden, hidden), "weight_hh", init::DEFAULT_KAIMING_NORMAL)?;
        let b_ih = vb.get_with_hints(3 * hidden, "bias_ih", init::ZERO)?;
        let b_hh = vb.get_with_hints(3 * hidden, "bias_hh", init::ZERO)?;
        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            hidden,
        })
    }

    fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gx = x.matmul(&self.w_ih.t()?)?.broadcast_add(&self.b_ih)?;
        let gh = h.matmul(&self.w_hh.t()?)?.broadcast_add(&self.b_hh)?;
        let n = self.hidden;
        let reset = sigmoid(&(gx.narrow(1, 0, n)? + gh.narrow(1, 0, n)?)?)?;
        let update = sigmoid(&(gx.narrow(1, n, n)? + gh.narrow(1, n, n)?)?)?;
        let cand = (gx.narrow(1, 2 * n, n)? + (reset * gh.narrow(1, 2 * n, n)?)?)?.tanh()?;
        // h' = (1 - update) * cand + update * h
        ((update.affine(-1.0, 1.0)? * cand)? + (update * h)?).map_err(Into::into)
    }

    /// Runs the cell over (batch, seq, input), returning (batch, seq, hidden).
    pub fn run(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = x.dims3()?;
        let mut h = Tensor::zeros((batch, self.hidden), x.dtype(), x.device())?;
        let mut outputs = Vec::with_capacity(seq);
        for t in 0..seq {
            let x_t = x.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            h = self.step(&x_t, &h)?;
            outputs.push(h.clone());
        }
        Tensor::stack(&outputs, 1).map_err(Into::into)
    }
}

/// Single-direction LSTM.
pub struct LstmCell {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden: usize,
}

impl LstmCell {
    /// Gate weights for `input`-wide inputs and `hidden`-wide state.
    pub fn new(input: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        let w_ih = vb.get_with_hints((4 * hidden, input), "weight_ih", init::DEFAULT_KAIMING_NORMAL)?;
        let w_hh = vb.get_with_hints((4 * hidden, hidden), "weight_hh", init::DEFAULT_KAIMING_NORMAL)?;
        let b_ih = vb.get_with_hints(4 * hidden, "bias_ih", init::ZERO)?;
        let b_hh = vb.get_with_hints(4 * hidden, "bias_hh", init::ZERO)?;
        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            hidden,
        })
    }

    fn step(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> Result<(Tensor, Tensor)> {
        let gx = x.matmul(&self.w_ih.t()?)?.broadcast_add(&self.b_ih)?;
        let gh = h.matmul(&self.w_hh.t()?)?.broadcast_add(&self.b_hh)?;
        let gates = (gx + gh)?;
        let n = self.hidden;
        let input = sigmoid(&gates.narrow(1, 0, n)?)?;
        let forget = sigmoid(&gates.narrow(1, n, n)?)?;
        let cand = gates.narrow(1, 2 * n, n)?.tanh()?;
        let output = sigmoid(&gates.narrow(1, 3 * n, n)?)?;
        let c_next = ((forget * c)? + (input * cand)?)?;
        let h_next = (output * c_next.tanh()?)?;
        Ok((h_next, c_next))
    }

    /// Runs the cell over (batch, seq, input), returning (batch, seq, hidden).
    pub fn run(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = x.dims3()?;
        let mut h = Tensor::zeros((batch, self.hidden), x.dtype(), x.device())?;
        let mut c = h.clone();
        let mut outputs = Vec::with_capacity(seq);
        for t in 0..seq {
            let x_t = x.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            let (h_next, c_next) = self.step(&x_t, &h, &c)?;
            h = h_next;
            c = c_next;
            outputs.push(h.clone());
        }
        Tensor::stack(&outputs, 1).map_err(Into::into)
    }
}

/// Bidirectional GRU over (batch, seq, input), output (batch, seq, 2 * hidden).
pub struct BiGru {
    fwd: GruCell,
    bwd: GruCell,
}

impl BiGru {
    /// Independent forward and backward cells of the same size.
    pub fn new(input: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fwd: GruCell::new(input, hidden, vb.pp("fwd"))?,
            bwd: GruCell::new(input, hidden, vb.pp("bwd"))?,
        })
    }

    /// With `lens`, the backward pass runs over the reversed valid
    /// prefix of each sequence and every padded position is forced to
    /// zero in the output.
    pub fn forward(&self, x: &Tensor, lens: Option<&[usize]>) -> Result<Tensor> {
        let fwd = self.fwd.run(x)?;
        let rev_in = reverse_time(x, lens)?;
        let bwd = reverse_time(&self.bwd.run(&rev_in)?, lens)?;
        let out = Tensor::cat(&[&fwd, &bwd], D::Minus1)?;
        match lens {
            Some(lens) => mask_padding(&out, lens),
            None => Ok(out),
        }
    }
}

/// Bidirectional LSTM over (batch, seq, input), output (batch, seq, 2 * hidden).
pub struct BiLstm {
    fwd: LstmCell,
    bwd: LstmCell,
}

impl BiLstm {
    /// Independent forward and backward cells of the same size.
    pub fn new(input: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fwd: LstmCell::new(input, hidden, vb.pp("fwd"))?,
            bwd: LstmCell::new(input, hidden, vb.pp("bwd"))?,
        })
    }

    /// See [`BiGru::forward`]; identical length handling.
    pub fn forward(&self, x: &Tensor, lens: Option<&[usize]>) -> Result<Tensor> {
        let fwd = self.fwd.run(x)?;
        let rev_in = reverse_time(x, lens)?;
        let bwd = reverse_time(&self.bwd.run(&rev_in)?, lens)?;
        let out = Tensor::cat(&[&fwd, &bwd], D::Minus1)?;
        match lens {
            Some(lens) => mask_padding(&out, lens),
            None => Ok(out),
        }
    }
}

/// Reverses the valid prefix of each sequence along the time axis,
/// leaving padded positions where they are. Without lengths the whole
/// axis is reversed.
pub fn reverse_time(x: &Tensor, lens: Option<&[usize]>) -> Result<Tensor> {
    let (batch, seq, channels) = x.dims3()?;
    let mut idx = Vec::with_capacity(batch * seq);
    for b in 0..batch {
        let len = lens.map(|l| l[b]).unwrap_or(seq).min(seq);
        for t in 0..seq {
            let src = if t < len { len - 1 - t } else { t };
            idx.push(src as u32);
        }
    }
    let idx = Tensor::from_vec(idx, (batch, seq), x.device())?
        .unsqueeze(2)?
        .broadcast_as((batch, seq, channels))?
        .contiguous()?;
    x.contiguous()?.gather(&idx, 1).map_err(Into::into)
}

/// Zeroes every position at or beyond its sequence length.
pub fn mask_padding(x: &Tensor, lens: &[usize]) -> Result<Tensor> {
    let (batch, seq, _) = x.dims3()?;
    let mut mask = vec![0f32; batch * seq];
    for (b, &len) in lens.iter().enumerate() {
        for t in 0..len.min(seq) {
            mask[b * seq + t] = 1.0;
        }
    }
    let mask = Tensor::from_vec(mask, (batch, seq), x.device())?.unsqueeze(2)?;
    x.broadcast_mul(&mask).map_err(Into::into)
}
