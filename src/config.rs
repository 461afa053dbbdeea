//! Configuration for the chord-conditioned melody model.
//!
//! Defaults match the sizes the model was originally trained with on the
//! Parker solo dataset (16-wide chord LSTM, 48-wide melody LSTM).

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Layer widths of the two recurrent cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of one event (chord) embedding.
    pub event_emb_size: usize,
    /// Width of one signal (note) embedding.
    pub signal_emb_size: usize,
    /// Hidden width of the event encoder (`z_size`).
    pub event_hidden_size: usize,
    /// Hidden width of the signal decoder (`Z_size`).
    pub signal_hidden_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            event_emb_size: 5,
            signal_emb_size: 3,
            event_hidden_size: 16,
            signal_hidden_size: 48,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("event_emb_size", self.event_emb_size),
            ("signal_emb_size", self.signal_emb_size),
            ("event_hidden_size", self.event_hidden_size),
            ("signal_hidden_size", self.signal_hidden_size),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// How a signal embedding is laid out: pitch one-hot, optional rest flag,
/// then one slot per duration.
///
/// ```text
/// [ min_pitch ..= max_pitch | rest? | durations[0] .. durations[n-1] ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLayout {
    pub min_pitch: i32,
    pub max_pitch: i32,
    #[serde(default = "default_rest")]
    pub rest: bool,
    /// Duration of each rhythm slot, in event-time units.
    pub durations: Vec<f64>,
}

fn default_rest() -> bool {
    true
}

impl SignalLayout {
    /// Number of pitch slots (`max_pitch - min_pitch + 1`).
    pub fn pitch_width(&self) -> usize {
        let width = i64::from(self.max_pitch) - i64::from(self.min_pitch) + 1;
        usize::try_from(width.max(0)).unwrap_or(usize::MAX)
    }

    /// Index of the first duration slot.
    pub fn duration_region_start(&self) -> usize {
        self.pitch_width().saturating_add(usize::from(self.rest))
    }

    /// Total embedding width implied by the layout.
    pub fn width(&self) -> usize {
        self.duration_region_start()
            .saturating_add(self.durations.len())
    }

    /// Check the layout against the signal width seen in the data.
    pub fn check_width(&self, signal_emb_size: usize) -> Result<()> {
        if self.max_pitch < self.min_pitch {
            return Err(Error::Config(format!(
                "max_pitch {} below min_pitch {}",
                self.max_pitch, self.min_pitch
            )));
        }
        if self.width() != signal_emb_size {
            return Err(Error::Config(format!(
                "signal embedding is {signal_emb_size} wide but layout needs {} \
                 ({} pitches + {} rest + {} durations)",
                self.width(),
                self.pitch_width(),
                usize::from(self.rest),
                self.durations.len()
            )));
        }
        Ok(())
    }
}

/// Whether every example gets its own update or one update per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainMode {
    Stochastic,
    Batch,
}

/// Loss applied between the decoder output and the target signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Mean squared error on the group-normalized output.
    Mse,
    /// Binary cross entropy on raw logits.
    BceWithLogits,
}

/// Training loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub mode: TrainMode,
    pub loss: LossKind,
    /// Log progress every this many examples in stochastic mode.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            mode: TrainMode::Stochastic,
            loss: LossKind::BceWithLogits,
            log_every: 50,
        }
    }
}

/// Autoregressive generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Hard cap on emitted steps per event, for models that keep choosing
    /// zero-duration slots.
    pub max_steps_per_event: usize,
}

impl GenerationConfig {
    /// Step cap for `num_events` events: `max_steps_per_event * num_events`,
    /// raised to what the shortest positive duration needs to reach the last
    /// event.
    pub fn step_limit(&self, num_events: usize, min_duration: f64) -> usize {
        let per_event = self.max_steps_per_event.saturating_mul(num_events);
        let span = num_events.saturating_sub(1) as f64;
        let needed = (span / min_duration).ceil();
        // Two extra steps absorb rounding in the f64 accumulator.
        let needed = if needed.is_finite() && needed < usize::MAX as f64 {
            (needed as usize).saturating_add(2)
        } else {
            usize::MAX
        };
        per_event.max(needed)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_steps_per_event: 16,
        }
    }
}
