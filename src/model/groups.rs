//! Categorical output groups.
//!
//! A note embedding is either one categorical code or a concatenation of
//! independent ones (pitch region, rhythm region). Each group is normalized
//! by its own softmax so pitch and rhythm never compete for probability mass.

use std::ops::Range;

use candle_core::{D, Tensor};

use crate::config::SignalLayout;
use crate::{Error, Result};

/// Contiguous, non-overlapping slot ranges covering `[0, width)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGroups {
    ranges: Vec<Range<usize>>,
}

impl OutputGroups {
    /// One group spanning every slot.
    pub fn single(width: usize) -> Result<Self> {
        Self::from_boundaries(width, &[])
    }

    /// Two groups: `[0, boundary)` and `[boundary, width)`.
    pub fn split_at(width: usize, boundary: usize) -> Result<Self> {
        Self::from_boundaries(width, &[boundary])
    }

    /// Groups delimited by strictly increasing interior boundaries.
    pub fn from_boundaries(width: usize, boundaries: &[usize]) -> Result<Self> {
        if width == 0 {
            return Err(Error::Config("output groups need a positive width".into()));
        }
        let mut ranges = Vec::with_capacity(boundaries.len() + 1);
        let mut start = 0;
        for &boundary in boundaries {
            if boundary <= start || boundary >= width {
                return Err(Error::Config(format!(
                    "group boundary {boundary} must lie strictly inside ({start}, {width})"
                )));
            }
            ranges.push(start..boundary);
            start = boundary;
        }
        ranges.push(start..width);
        Ok(Self { ranges })
    }

    /// Pitch+rest group followed by the rhythm group. Falls back to a single
    /// group when either region is empty.
    pub fn from_layout(layout: &SignalLayout) -> Result<Self> {
        let width = layout.width();
        let boundary = layout.duration_region_start();
        if boundary == 0 || boundary == width {
            Self::single(width)
        } else {
            Self::split_at(width, boundary)
        }
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn width(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Softmax each group independently over the last dimension and
    /// concatenate the results.
    pub fn normalize(&self, logits: &Tensor) -> Result<Tensor> {
        if let [_] = self.ranges.as_slice() {
            return Ok(candle_nn::ops::softmax(logits, D::Minus1)?);
        }
        let parts = self
            .ranges
            .iter()
            .map(|r| -> Result<Tensor> {
                let group = logits.narrow(D::Minus1, r.start, r.len())?;
                Ok(candle_nn::ops::softmax(&group, D::Minus1)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&parts, D::Minus1)?)
    }

    /// Winning slot of each group (first maximum on ties).
    pub fn argmax(&self, row: &[f32]) -> Vec<usize> {
        self.ranges
            .iter()
            .map(|r| {
                let mut best = r.start;
                for slot in r.clone() {
                    if row[slot] > row[best] {
                        best = slot;
                    }
                }
                best
            })
            .collect()
    }

    /// One-hot per group at the winning slot.
    pub fn harden(&self, row: &[f32]) -> Vec<f32> {
        let mut hard = vec![0.0; row.len()];
        for slot in self.argmax(row) {
            hard[slot] = 1.0;
        }
        hard
    }
}
