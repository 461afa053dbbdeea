//! Trainable parameter set.
//!
//! All 27 tensors of the model live here as named [`Var`]s. The encoder and
//! decoder hold clones of the underlying tensors, so an optimizer updating a
//! `Var` in place is seen by both.
//!
//! Naming (also the safetensors keys):
//!
//! ```text
//! encoder.{candidate,update,forget,output}.{w_h,w_x,b}
//! decoder.{candidate,update,forget,output}.{w_h,w_x,b}
//! decoder.candidate.w_c
//! projection.{w,b}
//! ```

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::config::ModelConfig;
use crate::{Error, Result};

/// Weights of one gate: `h·w_h + x·w_x + b`.
#[derive(Debug, Clone)]
pub struct GateParams {
    /// Recurrent weights `[hidden, hidden]`.
    pub w_h: Var,
    /// Input weights `[input, hidden]`.
    pub w_x: Var,
    /// Bias `[1, hidden]`.
    pub b: Var,
}

/// The four gates of one gated memory cell.
#[derive(Debug, Clone)]
pub struct CellParams {
    pub candidate: GateParams,
    pub update: GateParams,
    pub forget: GateParams,
    pub output: GateParams,
}

impl CellParams {
    fn gates(&self) -> [(&'static str, &GateParams); 4] {
        [
            ("candidate", &self.candidate),
            ("update", &self.update),
            ("forget", &self.forget),
            ("output", &self.output),
        ]
    }
}

/// Full parameter set of the chord/melody model.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Event (chord) encoder cell.
    pub encoder: CellParams,
    /// Signal (melody) decoder cell.
    pub decoder: CellParams,
    /// Conditioning weights into the decoder candidate `[z_size, Z_size]`.
    pub conditioning: Var,
    /// Output projection `[Z_size, signal_emb_size]`.
    pub projection_w: Var,
    /// Output bias `[1, signal_emb_size]`.
    pub projection_b: Var,
}

impl Parameters {
    /// Draw every parameter from a standard normal, seeded for reproducibility.
    pub fn init(config: &ModelConfig, seed: u64, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::build(config, |_, (rows, cols)| {
            let data: Vec<f32> = (0..rows * cols)
                .map(|_| -> f32 { StandardNormal.sample(&mut rng) })
                .collect();
            Ok(Var::from_tensor(&Tensor::from_vec(
                data,
                (rows, cols),
                device,
            )?)?)
        })
    }

    /// Load from a safetensors file written by [`Parameters::save`].
    pub fn load(path: impl AsRef<Path>, config: &ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        tracing::info!("Loading parameters from {:?}", path);
        let mut tensors = candle_core::safetensors::load(path, device)?;
        Self::build(config, |name, (rows, cols)| {
            let tensor = tensors
                .remove(name)
                .ok_or_else(|| Error::Shape(format!("missing parameter {name}")))?;
            if tensor.dims() != [rows, cols] {
                return Err(Error::Shape(format!(
                    "parameter {name} has shape {:?}, expected [{rows}, {cols}]",
                    tensor.dims()
                )));
            }
            Ok(Var::from_tensor(&tensor.to_dtype(DType::F32)?)?)
        })
    }

    fn build(
        config: &ModelConfig,
        mut make: impl FnMut(&str, (usize, usize)) -> Result<Var>,
    ) -> Result<Self> {
        let z = config.event_hidden_size;
        let big_z = config.signal_hidden_size;
        let event = config.event_emb_size;
        let signal = config.signal_emb_size;

        let mut cell = |prefix: &str, hidden: usize, input: usize| -> Result<CellParams> {
            let mut gate = |name: &str| -> Result<GateParams> {
                Ok(GateParams {
                    w_h: make(&format!("{prefix}.{name}.w_h"), (hidden, hidden))?,
                    w_x: make(&format!("{prefix}.{name}.w_x"), (input, hidden))?,
                    b: make(&format!("{prefix}.{name}.b"), (1, hidden))?,
                })
            };
            Ok(CellParams {
                candidate: gate("candidate")?,
                update: gate("update")?,
                forget: gate("forget")?,
                output: gate("output")?,
            })
        };
        let encoder = cell("encoder", z, event)?;
        let decoder = cell("decoder", big_z, signal)?;

        Ok(Self {
            encoder,
            decoder,
            conditioning: make("decoder.candidate.w_c", (z, big_z))?,
            projection_w: make("projection.w", (big_z, signal))?,
            projection_b: make("projection.b", (1, signal))?,
        })
    }

    /// Every parameter with its stable name.
    pub fn named(&self) -> Vec<(String, &Var)> {
        let mut named = Vec::with_capacity(27);
        for (prefix, cell) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            for (gate_name, gate) in cell.gates() {
                named.push((format!("{prefix}.{gate_name}.w_h"), &gate.w_h));
                named.push((format!("{prefix}.{gate_name}.w_x"), &gate.w_x));
                named.push((format!("{prefix}.{gate_name}.b"), &gate.b));
            }
        }
        named.push(("decoder.candidate.w_c".to_string(), &self.conditioning));
        named.push(("projection.w".to_string(), &self.projection_w));
        named.push(("projection.b".to_string(), &self.projection_b));
        named
    }

    /// Handles for an optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.named().into_iter().map(|(_, v)| v.clone()).collect()
    }

    /// Total number of trainable scalars.
    pub fn count(&self) -> usize {
        self.named().iter().map(|(_, v)| v.elem_count()).sum()
    }

    /// Write all parameters to a safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .named()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ModelConfig {
        ModelConfig {
            event_emb_size: 5,
            signal_emb_size: 3,
            event_hidden_size: 4,
            signal_hidden_size: 6,
        }
    }

    #[test]
    fn test_parameter_count_and_names() {
        let dev = Device::Cpu;
        let params = Parameters::init(&small(), 0, &dev).unwrap();
        let named = params.named();
        assert_eq!(named.len(), 27);

        // encoder: 4 * (4*4 + 5*4 + 4) = 160
        // decoder: 4 * (6*6 + 3*6 + 6) = 240, plus w_c 4*6 = 24
        // projection: 6*3 + 3 = 21
        assert_eq!(params.count(), 160 + 240 + 24 + 21);

        let mut names: Vec<_> = named.iter().map(|(n, _)| n.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 27, "parameter names must be unique");
    }

    #[test]
    fn test_init_is_seeded() {
        let dev = Device::Cpu;
        let a = Parameters::init(&small(), 7, &dev).unwrap();
        let b = Parameters::init(&small(), 7, &dev).unwrap();
        let c = Parameters::init(&small(), 8, &dev).unwrap();
        let wa = a.projection_w.to_vec2::<f32>().unwrap();
        let wb = b.projection_w.to_vec2::<f32>().unwrap();
        let wc = c.projection_w.to_vec2::<f32>().unwrap();
        assert_eq!(wa, wb);
        assert_ne!(wa, wc);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.safetensors");

        let params = Parameters::init(&small(), 3, &dev).unwrap();
        params.save(&path).unwrap();
        let loaded = Parameters::load(&path, &small(), &dev).unwrap();

        for ((name, a), (_, b)) in params.named().iter().zip(loaded.named().iter()) {
            assert_eq!(
                a.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
                b.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
                "{name} differs after reload"
            );
        }
    }

    #[test]
    fn test_load_rejects_wrong_shape() {
        let dev = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.safetensors");
        Parameters::init(&small(), 3, &dev)
            .unwrap()
            .save(&path)
            .unwrap();

        let wider = ModelConfig {
            signal_hidden_size: 8,
            ..small()
        };
        let err = Parameters::load(&path, &wider, &dev).unwrap_err();
        assert!(matches!(err, Error::Shape(_)), "{err}");
    }
}
