//! Signal (melody) decoder.
//!
//! A forward gated memory cell whose candidate activation also sees the
//! chord conditioning vector chosen by the aligner. The update, forget and
//! output gates only see the previous hidden state and the previous signal.
//!
//! ```text
//! candidate = tanh(Z·W_ZZ + s·W_Zs + b_Z + cond·W_Zz)
//! update    = σ(Z·W_uZZ + s·W_uZs + b_u)
//! forget    = σ(Z·W_fZZ + s·W_fZs + b_f)
//! output    = σ(Z·W_oZZ + s·W_oZs + b_o)
//! logits    = Z'·W_yZ + b_y
//! ```
//!
//! Teacher forcing and generation both go through [`SignalDecoder::step`];
//! they only differ in where `s` comes from.

use candle_core::Tensor;

use super::cell::{CellState, Gate, combine};
use super::params::Parameters;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SignalDecoder {
    candidate: Gate,
    conditioning: Tensor,
    update: Gate,
    forget: Gate,
    output: Gate,
    projection_w: Tensor,
    projection_b: Tensor,
    hidden_size: usize,
}

impl SignalDecoder {
    pub fn new(params: &Parameters, hidden_size: usize) -> Self {
        let cell = &params.decoder;
        Self {
            candidate: Gate::new(&cell.candidate),
            conditioning: params.conditioning.as_tensor().clone(),
            update: Gate::new(&cell.update),
            forget: Gate::new(&cell.forget),
            output: Gate::new(&cell.output),
            projection_w: params.projection_w.as_tensor().clone(),
            projection_b: params.projection_b.as_tensor().clone(),
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// One decoder step.
    ///
    /// - `signal_prev`: `[1, signal_emb_size]`
    /// - `conditioning`: `[1, z_size]` row of the encoder table
    pub fn step(
        &self,
        prev: &CellState,
        signal_prev: &Tensor,
        conditioning: &Tensor,
    ) -> Result<CellState> {
        let candidate = (self.candidate.pre_activation(&prev.h, signal_prev)?
            + conditioning.matmul(&self.conditioning)?)?
        .tanh()?;
        let update = self.update.sigmoid(&prev.h, signal_prev)?;
        let forget = self.forget.sigmoid(&prev.h, signal_prev)?;
        let output = self.output.sigmoid(&prev.h, signal_prev)?;
        combine(&candidate, &update, &forget, &output, prev)
    }

    /// Project hidden states `[T, Z_size]` to logits `[T, signal_emb_size]`.
    pub fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        Ok(hidden
            .matmul(&self.projection_w)?
            .broadcast_add(&self.projection_b)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use candle_core::{DType, Device};

    fn setup() -> (SignalDecoder, Device) {
        let dev = Device::Cpu;
        let cfg = ModelConfig {
            event_emb_size: 5,
            signal_emb_size: 3,
            event_hidden_size: 4,
            signal_hidden_size: 6,
        };
        let params = Parameters::init(&cfg, 11, &dev).unwrap();
        (SignalDecoder::new(&params, 6), dev)
    }

    #[test]
    fn test_step_and_project_shapes() {
        let (dec, dev) = setup();
        let state = CellState::zeros(6, &dev).unwrap();
        let signal = Tensor::zeros((1, 3), DType::F32, &dev).unwrap();
        let cond = Tensor::ones((1, 4), DType::F32, &dev).unwrap();
        let next = dec.step(&state, &signal, &cond).unwrap();
        assert_eq!(next.h.dims(), &[1, 6]);
        assert_eq!(dec.project(&next.h).unwrap().dims(), &[1, 3]);

        let stacked = Tensor::cat(&[&next.h, &next.h], 0).unwrap();
        assert_eq!(dec.project(&stacked).unwrap().dims(), &[2, 3]);
    }

    #[test]
    fn test_conditioning_feeds_candidate() {
        let (dec, dev) = setup();
        let state = CellState::zeros(6, &dev).unwrap();
        let signal = Tensor::zeros((1, 3), DType::F32, &dev).unwrap();
        let a = Tensor::zeros((1, 4), DType::F32, &dev).unwrap();
        let b = Tensor::ones((1, 4), DType::F32, &dev).unwrap();
        let ha = dec.step(&state, &signal, &a).unwrap().h.to_vec2::<f32>().unwrap();
        let hb = dec.step(&state, &signal, &b).unwrap().h.to_vec2::<f32>().unwrap();
        assert_ne!(ha, hb);
    }
}
