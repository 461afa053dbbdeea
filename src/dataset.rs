//! Paired chord/melody training data.
//!
//! Events are one `[N, T_e, event_emb_size]` tensor since every example
//! shares the same number of chord positions. Signals are ragged: one
//! `[T_s_j, signal_emb_size]` tensor per example.
//!
//! On disk a dataset is a JSON object:
//!
//! ```json
//! {
//!   "events":  [[[0, 1, 0, 0, 0], ...], ...],
//!   "signals": [[[0, 1, 0], ...], ...],
//!   "durations": [0.5, 1.0], "min_pitch": 60, "max_pitch": 71, "rest": true
//! }
//! ```
//!
//! The layout keys are optional; without them the caller supplies the
//! duration vector some other way.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::SignalLayout;
use crate::{Error, Result};

/// Sizes reported by [`Dataset::dims`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub num_event_examples: usize,
    pub num_events: usize,
    pub event_emb_size: usize,
    pub num_seq_examples: usize,
    pub signal_emb_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    events: Vec<Vec<Vec<f32>>>,
    signals: Vec<Vec<Vec<f32>>>,
    #[serde(default)]
    durations: Option<Vec<f64>>,
    #[serde(default)]
    min_pitch: Option<i32>,
    #[serde(default)]
    max_pitch: Option<i32>,
    #[serde(default)]
    rest: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    events: Tensor,
    signals: Vec<Tensor>,
    signal_emb_size: usize,
    layout: Option<SignalLayout>,
}

impl Dataset {
    /// Validate and assemble a dataset.
    ///
    /// `signal_emb_size` is taken from the first signal tensor; every other
    /// tensor must match, including empty (`[0, W]`) ones.
    pub fn from_parts(
        events: Tensor,
        signals: Vec<Tensor>,
        layout: Option<SignalLayout>,
    ) -> Result<Self> {
        let (num_examples, _, _) = events.dims3()?;
        if num_examples != signals.len() {
            return Err(Error::Dataset(format!(
                "{num_examples} event examples but {} signal examples",
                signals.len()
            )));
        }
        let mut signal_emb_size = None;
        for (j, s) in signals.iter().enumerate() {
            let (_, width) = s.dims2().map_err(|_| {
                Error::Dataset(format!("signal example {j} has shape {:?}", s.dims()))
            })?;
            match signal_emb_size {
                None => signal_emb_size = Some(width),
                Some(w) if w != width => {
                    return Err(Error::Dataset(format!(
                        "signal example {j} is {width} wide, expected {w}"
                    )));
                }
                Some(_) => {}
            }
        }
        let signal_emb_size = signal_emb_size.unwrap_or(0);
        if let Some(layout) = &layout {
            layout.check_width(signal_emb_size)?;
        }
        let events = events.to_dtype(DType::F32)?;
        let signals = signals
            .into_iter()
            .map(|s| s.to_dtype(DType::F32))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self {
            events,
            signals,
            signal_emb_size,
            layout,
        })
    }

    /// Read a JSON dataset file onto `device`.
    pub fn load_json(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let file: DatasetFile = serde_json::from_reader(std::io::BufReader::new(
            std::fs::File::open(path)?,
        ))?;

        let num_examples = file.events.len();
        let num_events = file.events.first().map_or(0, Vec::len);
        let event_emb_size = file
            .events
            .first()
            .and_then(|e| e.first())
            .map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(num_examples * num_events * event_emb_size);
        for (j, example) in file.events.iter().enumerate() {
            if example.len() != num_events {
                return Err(Error::Dataset(format!(
                    "event example {j} has {} positions, expected {num_events}",
                    example.len()
                )));
            }
            for row in example {
                if row.len() != event_emb_size {
                    return Err(Error::Dataset(format!(
                        "event example {j} has a row of width {}, expected {event_emb_size}",
                        row.len()
                    )));
                }
                flat.extend_from_slice(row);
            }
        }
        let events = Tensor::from_vec(flat, (num_examples, num_events, event_emb_size), device)?;

        let layout = match (file.durations, file.min_pitch, file.max_pitch) {
            (Some(durations), Some(min_pitch), Some(max_pitch)) => Some(SignalLayout {
                min_pitch,
                max_pitch,
                rest: file.rest.unwrap_or(true),
                durations,
            }),
            (None, None, None) => None,
            _ => {
                return Err(Error::Dataset(
                    "durations, min_pitch and max_pitch must be given together".into(),
                ));
            }
        };

        let signal_emb_size = file
            .signals
            .iter()
            .flat_map(|s| s.first())
            .map(Vec::len)
            .next()
            .or_else(|| layout.as_ref().map(SignalLayout::width))
            .unwrap_or(0);
        let signals = file
            .signals
            .iter()
            .enumerate()
            .map(|(j, rows)| {
                if let Some(row) = rows.iter().find(|r| r.len() != signal_emb_size) {
                    return Err(Error::Dataset(format!(
                        "signal example {j} has a row of width {}, expected {signal_emb_size}",
                        row.len()
                    )));
                }
                let flat: Vec<f32> = rows.iter().flatten().copied().collect();
                Ok(Tensor::from_vec(flat, (rows.len(), signal_emb_size), device)?)
            })
            .collect::<Result<Vec<_>>>()?;

        let dataset = Self::from_parts(events, signals, layout)?;
        tracing::info!(
            path = %path.display(),
            examples = dataset.len(),
            num_events,
            event_emb_size,
            signal_emb_size,
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn dims(&self) -> Dimensions {
        let (num_event_examples, num_events, event_emb_size) =
            self.events.dims3().unwrap_or_default();
        Dimensions {
            num_event_examples,
            num_events,
            event_emb_size,
            num_seq_examples: self.signals.len(),
            signal_emb_size: self.signal_emb_size,
        }
    }

    /// Example `j` as `([T_e, event_emb_size], [T_s, signal_emb_size])`.
    pub fn example(&self, j: usize) -> Result<(Tensor, &Tensor)> {
        let signals = self.signals.get(j).ok_or_else(|| {
            Error::Dataset(format!("example {j} out of range ({} examples)", self.len()))
        })?;
        let events = self.events.get(j)?;
        Ok((events, signals))
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn layout(&self) -> Option<&SignalLayout> {
        self.layout.as_ref()
    }
}
