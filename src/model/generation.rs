//! Top-level model combining encoder, aligner and decoder.
//!
//! `MelodyModel` owns the parameter set and exposes:
//! - teacher-forced forward pass (ground-truth previous note at every step)
//! - autoregressive generation (own hardened previous note at every step)
//!
//! Both paths encode the chords once, then walk the decoder one note at a
//! time while the aligner picks which chord position conditions each note.

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};

use super::aligner::{Alignment, FreeRunningAligner, TeacherForcedAligner};
use super::cell::CellState;
use super::decoder::SignalDecoder;
use super::durations::DurationVector;
use super::encoder::EventEncoder;
use super::groups::OutputGroups;
use super::params::Parameters;
use crate::config::{GenerationConfig, ModelConfig, SignalLayout};
use crate::{Error, Result};

/// Output of a teacher-forced forward pass.
#[derive(Debug, Clone)]
pub struct TeacherForced {
    /// Raw logits `[T_s, signal_emb_size]`.
    pub logits: Tensor,
    /// Event position that conditioned each step.
    pub event_indices: Vec<usize>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Generated durations reached the last event.
    Completed,
    /// The next step would have been conditioned past the last event; that
    /// step was discarded.
    Overrun,
    /// Hit [`GenerationConfig::step_limit`] steps.
    StepLimit,
    /// No slot carries a positive duration, so time can never advance.
    NoDuration,
}

/// Output of autoregressive generation.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Hardened one-hot steps `[T, signal_emb_size]`.
    pub signals: Tensor,
    /// Group-normalized probabilities `[T, signal_emb_size]`.
    pub probabilities: Tensor,
    /// Winning slot of each output group, per step.
    pub slots: Vec<Vec<usize>>,
    /// Event position that conditioned each step.
    pub event_indices: Vec<usize>,
    /// Event-time units consumed by the generated steps.
    pub elapsed: f64,
    pub stop: StopReason,
}

impl Generation {
    pub fn len(&self) -> usize {
        self.event_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_indices.is_empty()
    }
}

/// Chord-conditioned melody model.
#[derive(Debug, Clone)]
pub struct MelodyModel {
    config: ModelConfig,
    params: Parameters,
    encoder: EventEncoder,
    decoder: SignalDecoder,
    durations: DurationVector,
    groups: OutputGroups,
    device: Device,
}

impl MelodyModel {
    /// Fresh model with seeded standard-normal parameters.
    pub fn new(
        config: ModelConfig,
        durations: DurationVector,
        groups: OutputGroups,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let params = Parameters::init(&config, seed, device)?;
        Self::from_parameters(config, params, durations, groups, device)
    }

    /// Fresh model whose durations and output groups come from a pitch/rest/duration layout.
    pub fn for_layout(
        config: ModelConfig,
        layout: &SignalLayout,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let durations = DurationVector::from_layout(layout, config.signal_emb_size)?;
        let groups = OutputGroups::from_layout(layout)?;
        Self::new(config, durations, groups, seed, device)
    }

    pub fn from_parameters(
        config: ModelConfig,
        params: Parameters,
        durations: DurationVector,
        groups: OutputGroups,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        if durations.len() != config.signal_emb_size {
            return Err(Error::Config(format!(
                "duration vector has {} slots, signal embedding is {} wide",
                durations.len(),
                config.signal_emb_size
            )));
        }
        if groups.width() != config.signal_emb_size {
            return Err(Error::Config(format!(
                "output groups cover {} slots, signal embedding is {} wide",
                groups.width(),
                config.signal_emb_size
            )));
        }
        let encoder = EventEncoder::new(
            &params.encoder,
            config.event_emb_size,
            config.event_hidden_size,
        );
        let decoder = SignalDecoder::new(&params, config.signal_hidden_size);
        Ok(Self {
            config,
            params,
            encoder,
            decoder,
            durations,
            groups,
            device: device.clone(),
        })
    }

    /// Load parameters written by [`MelodyModel::save`].
    pub fn load(
        path: impl AsRef<Path>,
        config: ModelConfig,
        durations: DurationVector,
        groups: OutputGroups,
        device: &Device,
    ) -> Result<Self> {
        let params = Parameters::load(path, &config, device)?;
        Self::from_parameters(config, params, durations, groups, device)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.params.save(path)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn durations(&self) -> &DurationVector {
        &self.durations
    }

    pub fn groups(&self) -> &OutputGroups {
        &self.groups
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameter handles for an optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.params.vars()
    }

    /// Encode one `[T_e, event_emb_size]` event sequence.
    pub fn encode(&self, events: &Tensor) -> Result<Tensor> {
        let events = events.to_dtype(DType::F32)?;
        self.encoder.forward(&events)
    }

    /// Per-group softmax of decoder logits.
    pub fn normalize(&self, logits: &Tensor) -> Result<Tensor> {
        self.groups.normalize(logits)
    }

    /// Teacher-forced forward pass over one example.
    ///
    /// - `events`: `[T_e, event_emb_size]`
    /// - `signals`: `[T_s, signal_emb_size]` ground truth
    ///
    /// Returns raw logits; apply [`MelodyModel::normalize`] for probabilities.
    pub fn forward(&self, events: &Tensor, signals: &Tensor) -> Result<TeacherForced> {
        let (num_events, _) = events.dims2()?;
        let (num_signals, width) = signals.dims2()?;
        if num_events == 0 || num_signals == 0 {
            return Err(Error::DegenerateSequence {
                events: num_events,
                signals: num_signals,
            });
        }
        if width != self.config.signal_emb_size {
            return Err(Error::Shape(format!(
                "signals are {width} wide, model expects {}",
                self.config.signal_emb_size
            )));
        }

        let encoded = self.encode(events)?;
        let signals = signals.to_dtype(DType::F32)?;
        let rows = signals.to_vec2::<f32>()?;

        let mut aligner = TeacherForcedAligner::new(&self.durations, num_events);
        let mut state = CellState::zeros(self.config.signal_hidden_size, &self.device)?;
        let mut signal_prev = Tensor::zeros((1, width), DType::F32, &self.device)?;
        let mut hidden = Vec::with_capacity(num_signals);
        let mut event_indices = Vec::with_capacity(num_signals);

        for i in 0..num_signals {
            let prev_row = i.checked_sub(1).map(|p| rows[p].as_slice());
            let index = aligner.advance(prev_row)?;
            let conditioning = encoded.narrow(0, index, 1)?;

            state = self.decoder.step(&state, &signal_prev, &conditioning)?;
            hidden.push(state.h.clone());
            event_indices.push(index);

            signal_prev = signals.narrow(0, i, 1)?;
        }

        let hidden = Tensor::cat(&hidden, 0)?;
        let logits = self.decoder.project(&hidden)?;
        Ok(TeacherForced {
            logits,
            event_indices,
        })
    }

    /// Generate a melody over `events` by feeding back the model's own
    /// hardened predictions.
    ///
    /// Stops once the generated durations reach the last event, or when the
    /// next step would be conditioned past it (that step is discarded).
    pub fn generate(&self, events: &Tensor, cfg: &GenerationConfig) -> Result<Generation> {
        let (num_events, _) = events.dims2()?;
        if num_events == 0 {
            return Err(Error::DegenerateSequence {
                events: 0,
                signals: 0,
            });
        }
        let width = self.config.signal_emb_size;

        let Some(min_duration) = self.durations.min_positive() else {
            tracing::warn!("no slot carries a positive duration, nothing to generate");
            return self.finish(Vec::new(), Vec::new(), Vec::new(), 0.0, StopReason::NoDuration);
        };

        let encoded = self.encode(events)?;
        let max_steps = cfg.step_limit(num_events, min_duration);

        let mut aligner = FreeRunningAligner::new(&self.durations, num_events);
        let mut state = CellState::zeros(self.config.signal_hidden_size, &self.device)?;
        let mut signal_prev = Tensor::zeros((1, width), DType::F32, &self.device)?;
        let mut prev_row: Option<Vec<f32>> = None;

        let mut hardened = Vec::new();
        let mut probabilities = Vec::new();
        let mut event_indices = Vec::new();
        let mut elapsed = 0.0;

        let stop = loop {
            if aligner.is_done() {
                break StopReason::Completed;
            }
            if event_indices.len() >= max_steps {
                tracing::warn!(
                    steps = event_indices.len(),
                    elapsed = aligner.elapsed(),
                    "generation hit the step limit before reaching the last event"
                );
                break StopReason::StepLimit;
            }

            let index = match aligner.advance(prev_row.as_deref()) {
                Alignment::Event(index) => index,
                Alignment::Overrun(index) => {
                    tracing::debug!(index, num_events, "alignment overrun, discarding step");
                    break StopReason::Overrun;
                }
            };
            let conditioning = encoded.narrow(0, index, 1)?;

            state = self.decoder.step(&state, &signal_prev, &conditioning)?;
            let probs = self.normalize(&self.decoder.project(&state.h)?)?;
            let row = probs.squeeze(0)?.to_vec1::<f32>()?;
            let hard = self.groups.harden(&row);

            tracing::debug!(
                step = event_indices.len(),
                index,
                elapsed = aligner.elapsed(),
                "generated step"
            );

            elapsed += self.durations.dot(&hard);
            signal_prev = Tensor::from_vec(hard.clone(), (1, width), &self.device)?;
            hardened.push(signal_prev.clone());
            probabilities.push(probs);
            event_indices.push(index);
            prev_row = Some(hard);
        };

        self.finish(hardened, probabilities, event_indices, elapsed, stop)
    }

    fn finish(
        &self,
        hardened: Vec<Tensor>,
        probabilities: Vec<Tensor>,
        event_indices: Vec<usize>,
        elapsed: f64,
        stop: StopReason,
    ) -> Result<Generation> {
        let width = self.config.signal_emb_size;
        let stack = |rows: &[Tensor]| -> Result<Tensor> {
            if rows.is_empty() {
                Ok(Tensor::zeros((0, width), DType::F32, &self.device)?)
            } else {
                Ok(Tensor::cat(rows, 0)?)
            }
        };
        let signals = stack(&hardened)?;
        let probabilities = stack(&probabilities)?;
        let slots = signals
            .to_vec2::<f32>()?
            .iter()
            .map(|row| self.groups.argmax(row))
            .collect();
        Ok(Generation {
            signals,
            probabilities,
            slots,
            event_indices,
            elapsed,
            stop,
        })
    }
}
