//! Gated memory cell primitives shared by the encoder and decoder.
//!
//! ```text
//! candidate = tanh(h·W_h + x·W_x + b)        (+ extra inputs, decoder only)
//! update    = σ(h·W_uh + x·W_ux + b_u)
//! forget    = σ(h·W_fh + x·W_fx + b_f)
//! output    = σ(h·W_oh + x·W_ox + b_o)
//! c'        = update ⊙ candidate + forget ⊙ c
//! h'        = output ⊙ tanh(c')
//! ```

use candle_core::{DType, Device, Tensor};

use super::params::GateParams;
use crate::Result;

/// Hidden and cell vectors, each `[1, size]`.
#[derive(Debug, Clone)]
pub struct CellState {
    pub h: Tensor,
    pub c: Tensor,
}

impl CellState {
    /// All-zero state used at the start of every example.
    pub fn zeros(size: usize, device: &Device) -> Result<Self> {
        let zeros = Tensor::zeros((1, size), DType::F32, device)?;
        Ok(Self {
            h: zeros.clone(),
            c: zeros,
        })
    }
}

/// One affine gate over the previous hidden state and an input.
#[derive(Debug, Clone)]
pub struct Gate {
    w_h: Tensor,
    w_x: Tensor,
    b: Tensor,
}

impl Gate {
    pub fn new(params: &GateParams) -> Self {
        Self {
            w_h: params.w_h.as_tensor().clone(),
            w_x: params.w_x.as_tensor().clone(),
            b: params.b.as_tensor().clone(),
        }
    }

    /// `h·W_h + x·W_x + b`.
    pub fn pre_activation(&self, h: &Tensor, x: &Tensor) -> Result<Tensor> {
        let recurrent = h.matmul(&self.w_h)?;
        let input = x.matmul(&self.w_x)?;
        Ok(((recurrent + input)? + &self.b)?)
    }

    /// `σ(h·W_h + x·W_x + b)`.
    pub fn sigmoid(&self, h: &Tensor, x: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.pre_activation(h, x)?)?)
    }
}

/// Fold gate activations into the next state.
pub fn combine(
    candidate: &Tensor,
    update: &Tensor,
    forget: &Tensor,
    output: &Tensor,
    prev: &CellState,
) -> Result<CellState> {
    let c = ((update * candidate)? + (forget * &prev.c)?)?;
    let h = (output * c.tanh()?)?;
    Ok(CellState { h, c })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_with_closed_forget_gate_drops_memory() {
        let dev = Device::Cpu;
        let prev = CellState {
            h: Tensor::zeros((1, 2), DType::F32, &dev).unwrap(),
            c: Tensor::new(&[[5.0f32, -5.0]], &dev).unwrap(),
        };
        let ones = Tensor::ones((1, 2), DType::F32, &dev).unwrap();
        let zeros = Tensor::zeros((1, 2), DType::F32, &dev).unwrap();
        let candidate = Tensor::new(&[[0.5f32, -0.25]], &dev).unwrap();

        let next = combine(&candidate, &ones, &zeros, &ones, &prev).unwrap();
        assert_eq!(next.c.to_vec2::<f32>().unwrap(), vec![vec![0.5, -0.25]]);
        let h = next.h.to_vec2::<f32>().unwrap();
        assert!((h[0][0] - 0.5f32.tanh()).abs() < 1e-6);
        assert!((h[0][1] - (-0.25f32).tanh()).abs() < 1e-6);
    }

    #[test]
    fn zero_state_has_requested_width() {
        let state = CellState::zeros(7, &Device::Cpu).unwrap();
        assert_eq!(state.h.dims(), &[1, 7]);
        assert_eq!(state.c.dims(), &[1, 7]);
    }
}
