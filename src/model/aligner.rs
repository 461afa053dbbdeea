//! Duration aligner: maps melody steps onto chord positions.
//!
//! Before each decoder step the aligner reads the previous signal vector,
//! looks up how many event-time units it lasted, and advances a running
//! position into the encoder table. A zero-duration slot leaves the position
//! where it is, so one chord can condition several consecutive notes.
//!
//! Two clocks share the same lookup:
//!
//! - [`TeacherForcedAligner`] rounds each step's duration to an integer and
//!   keeps an exact `usize` position. Running past the last event is a data
//!   error.
//! - [`FreeRunningAligner`] accumulates raw durations in `f64` and floors the
//!   sum only when indexing. Running past the last event ends generation.

use super::durations::DurationVector;
use crate::{Error, Result};

/// Integer-clock aligner for training on ground-truth signals.
#[derive(Debug)]
pub struct TeacherForcedAligner<'a> {
    durations: &'a DurationVector,
    num_events: usize,
    index: usize,
    step: usize,
}

impl<'a> TeacherForcedAligner<'a> {
    pub fn new(durations: &'a DurationVector, num_events: usize) -> Self {
        Self {
            durations,
            num_events,
            index: 0,
            step: 0,
        }
    }

    /// Advance by the duration of `signal_prev` (`None` before the first
    /// step) and return the event index for the current decoder step.
    pub fn advance(&mut self, signal_prev: Option<&[f32]>) -> Result<usize> {
        let step = self.step;
        self.step += 1;
        if let Some(row) = signal_prev {
            let advance = self.durations.dot(row).round();
            if advance.is_nan() || advance < 0.0 {
                return Err(Error::InvalidDuration {
                    step,
                    value: advance,
                });
            }
            // Saturates for huge values, which the range check below reports.
            self.index = self.index.saturating_add(advance as usize);
        }
        if self.index >= self.num_events {
            return Err(Error::AlignmentOverrun {
                step,
                index: self.index,
                num_events: self.num_events,
            });
        }
        Ok(self.index)
    }
}

/// Outcome of one free-running advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Condition the next step on this event.
    Event(usize),
    /// The accumulated duration points past the last event.
    Overrun(usize),
}

/// Real-valued-clock aligner for autoregressive generation.
#[derive(Debug)]
pub struct FreeRunningAligner<'a> {
    durations: &'a DurationVector,
    num_events: usize,
    elapsed: f64,
}

impl<'a> FreeRunningAligner<'a> {
    pub fn new(durations: &'a DurationVector, num_events: usize) -> Self {
        Self {
            durations,
            num_events,
            elapsed: 0.0,
        }
    }

    /// Event-time units consumed so far.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// True once the generated durations reach the last event.
    pub fn is_done(&self) -> bool {
        self.elapsed >= self.last_event() as f64
    }

    pub fn advance(&mut self, signal_prev: Option<&[f32]>) -> Alignment {
        if let Some(row) = signal_prev {
            self.elapsed += self.durations.dot(row);
        }
        let index = self.elapsed.floor() as usize;
        if index > self.last_event() {
            Alignment::Overrun(index)
        } else {
            Alignment::Event(index)
        }
    }

    fn last_event(&self) -> usize {
        self.num_events.saturating_sub(1)
    }
}
