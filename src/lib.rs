//! Chord-conditioned melody generation in pure Rust.
//!
//! A candle-based dual-clock LSTM. A reverse LSTM encodes the chord
//! sequence, and a forward LSTM emits melody steps while a duration aligner
//! decides which chord position conditions each step.
//!
//! ## Architecture
//!
//! ```text
//! chords [T_e, D] → reverse LSTM → encoder table [T_e, z]
//!                                        │
//!               durations of s_{i-1} ──→ aligner → row k_i
//!                                        ↓
//! s_{i-1} → forward LSTM (candidate sees row k_i) → logits → per-group softmax
//! ```
//!
//! Training feeds the ground-truth previous step (integer clock); generation
//! feeds back its own hardened prediction (real-valued clock) until the
//! generated durations reach the last chord.
//!
//! ## Modules
//!
//! - [`config`]: model sizes, signal layout, training and generation settings
//! - [`dataset`]: JSON dataset loading and validation
//! - [`model`]: encoder, aligner, decoder, [`model::MelodyModel`]
//! - [`optim`]: centered RMSprop implementing `candle_nn::Optimizer`
//! - [`train`]: stochastic and batch training loops

pub mod config;
pub mod dataset;
pub mod model;
pub mod optim;
pub mod train;

mod error;

pub use error::{Error, Result};
