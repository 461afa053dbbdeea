//! Duration lookup table for signal slots.
//!
//! Each signal slot maps to the number of event-time units that elapse when
//! that slot is the active output. Pitch and rest slots map to zero; only
//! the rhythm region carries durations.

use crate::config::SignalLayout;
use crate::{Error, Result};

/// Immutable per-slot duration table.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationVector {
    values: Vec<f64>,
    region_start: usize,
}

impl DurationVector {
    /// Build from explicit per-slot values.
    ///
    /// Every slot before `region_start` must be zero and every value must be
    /// finite and non-negative.
    pub fn from_values(values: Vec<f64>, region_start: usize) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::Config("duration vector is empty".into()));
        }
        if region_start > values.len() {
            return Err(Error::Config(format!(
                "duration region starts at {region_start} past width {}",
                values.len()
            )));
        }
        for (slot, &value) in values.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "duration of slot {slot} is {value}, expected a finite non-negative value"
                )));
            }
            if slot < region_start && value != 0.0 {
                return Err(Error::Config(format!(
                    "slot {slot} lies before the duration region ({region_start}) but has duration {value}"
                )));
            }
        }
        Ok(Self {
            values,
            region_start,
        })
    }

    /// Build from a pitch/rest/duration layout. Fails if the layout does not
    /// add up to `signal_emb_size`.
    pub fn from_layout(layout: &SignalLayout, signal_emb_size: usize) -> Result<Self> {
        layout.check_width(signal_emb_size)?;
        let region_start = layout.duration_region_start();
        let mut values = vec![0.0; signal_emb_size];
        values[region_start..].copy_from_slice(&layout.durations);
        Self::from_values(values, region_start)
    }

    /// Slot-index encoding: slot `i` in `first..=last` lasts
    /// `(i - first) / subdivision` units.
    pub fn linear(
        signal_emb_size: usize,
        first: usize,
        last: usize,
        subdivision: f64,
    ) -> Result<Self> {
        if first > last || last >= signal_emb_size {
            return Err(Error::Config(format!(
                "duration slots {first}..={last} do not fit in width {signal_emb_size}"
            )));
        }
        if subdivision.is_nan() || subdivision <= 0.0 {
            return Err(Error::Config(format!(
                "subdivision must be positive, got {subdivision}"
            )));
        }
        let mut values = vec![0.0; signal_emb_size];
        for (slot, value) in values.iter_mut().enumerate().take(last + 1).skip(first) {
            *value = (slot - first) as f64 / subdivision;
        }
        Self::from_values(values, first)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Index of the first rhythm slot.
    pub fn region_start(&self) -> usize {
        self.region_start
    }

    /// `row · durations`, accumulated in f64.
    pub fn dot(&self, row: &[f32]) -> f64 {
        self.values
            .iter()
            .zip(row)
            .map(|(&d, &x)| d * f64::from(x))
            .sum()
    }

    /// Smallest strictly positive duration, if any.
    pub fn min_positive(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|&d| d > 0.0)
            .min_by(f64::total_cmp)
    }
}
