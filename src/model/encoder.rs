//! Event (chord) encoder.
//!
//! Runs a gated memory cell over the event sequence from last to first, so
//! the hidden vector at position `i` summarizes events `i..T_e`. The result
//! is a `[T_e, z_size]` lookup table the decoder indexes into.

use candle_core::Tensor;

use super::cell::{CellState, Gate, combine};
use super::params::CellParams;
use crate::{Error, Result};

/// Right-to-left event encoder.
#[derive(Debug, Clone)]
pub struct EventEncoder {
    candidate: Gate,
    update: Gate,
    forget: Gate,
    output: Gate,
    input_size: usize,
    hidden_size: usize,
}

impl EventEncoder {
    pub fn new(params: &CellParams, input_size: usize, hidden_size: usize) -> Self {
        Self {
            candidate: Gate::new(&params.candidate),
            update: Gate::new(&params.update),
            forget: Gate::new(&params.forget),
            output: Gate::new(&params.output),
            input_size,
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// One recurrence step on a single `[1, event_emb_size]` event.
    pub fn step(&self, prev: &CellState, event: &Tensor) -> Result<CellState> {
        let candidate = self.candidate.pre_activation(&prev.h, event)?.tanh()?;
        let update = self.update.sigmoid(&prev.h, event)?;
        let forget = self.forget.sigmoid(&prev.h, event)?;
        let output = self.output.sigmoid(&prev.h, event)?;
        combine(&candidate, &update, &forget, &output, prev)
    }

    /// Encode `[T_e, event_emb_size]` events into `[T_e, z_size]` hidden vectors.
    pub fn forward(&self, events: &Tensor) -> Result<Tensor> {
        let (num_events, width) = events.dims2()?;
        if width != self.input_size {
            return Err(Error::Shape(format!(
                "events are {width} wide, encoder expects {}",
                self.input_size
            )));
        }
        if num_events == 0 {
            return Err(Error::Shape("cannot encode an empty event sequence".into()));
        }

        let mut state = CellState::zeros(self.hidden_size, events.device())?;
        let mut hidden = Vec::with_capacity(num_events);
        for i in (0..num_events).rev() {
            let event = events.narrow(0, i, 1)?;
            state = self.step(&state, &event)?;
            hidden.push(state.h.clone());
        }
        hidden.reverse();

        Ok(Tensor::cat(&hidden, 0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::params::Parameters;
    use candle_core::Device;

    fn encoder(seed: u64) -> EventEncoder {
        let cfg = ModelConfig {
            event_emb_size: 5,
            signal_emb_size: 3,
            event_hidden_size: 8,
            signal_hidden_size: 8,
        };
        let params = Parameters::init(&cfg, seed, &Device::Cpu).unwrap();
        EventEncoder::new(&params.encoder, 5, 8)
    }

    fn chords(dev: &Device) -> Tensor {
        Tensor::new(
            &[
                [0f32, 1., 0., 0., 0.],
                [0., 0., 1., 0., 0.],
                [0., 0., 0., 1., 0.],
                [0., 0., 0., 0., 1.],
            ],
            dev,
        )
        .unwrap()
    }

    #[test]
    fn test_encoder_shape() {
        let dev = Device::Cpu;
        let out = encoder(1).forward(&chords(&dev)).unwrap();
        assert_eq!(out.dims(), &[4, 8]);
    }

    #[test]
    fn test_encoder_only_sees_future_events() {
        let dev = Device::Cpu;
        let enc = encoder(2);
        let base = enc.forward(&chords(&dev)).unwrap().to_vec2::<f32>().unwrap();

        // Perturb event 1: rows 2 and 3 must be bit-identical, rows 0 and 1 may move.
        let mut perturbed = chords(&dev).to_vec2::<f32>().unwrap();
        perturbed[1] = vec![0.3, -1.0, 2.0, 0.0, 0.7];
        let perturbed = Tensor::from_vec(perturbed.concat(), (4, 5), &dev).unwrap();
        let out = enc.forward(&perturbed).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(out[2], base[2]);
        assert_eq!(out[3], base[3]);
        assert_ne!(out[1], base[1]);
    }

    #[test]
    fn test_last_position_depends_only_on_last_event() {
        let dev = Device::Cpu;
        let enc = encoder(3);
        let full = enc.forward(&chords(&dev)).unwrap().to_vec2::<f32>().unwrap();
        let last = chords(&dev).narrow(0, 3, 1).unwrap();
        let single = enc.forward(&last).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(full[3], single[0]);
    }

    #[test]
    fn test_rejects_wrong_width_and_empty() {
        let dev = Device::Cpu;
        let enc = encoder(4);
        let wide = Tensor::zeros((2, 6), candle_core::DType::F32, &dev).unwrap();
        assert!(matches!(enc.forward(&wide), Err(Error::Shape(_))));
        let empty = Tensor::zeros((0, 5), candle_core::DType::F32, &dev).unwrap();
        assert!(enc.forward(&empty).is_err());
    }
}
