//! Model components for the melody LSTM.
//!
//! ## Components
//!
//! - [`encoder`]: reverse-direction chord LSTM producing one conditioning row per event
//! - [`aligner`]: duration clocks mapping melody steps onto chord positions
//! - [`decoder`]: forward melody LSTM with chord-conditioned candidate
//! - [`generation`]: [`MelodyModel`]: teacher-forced forward pass and autoregressive generation
//! - [`params`]: named parameter set, seeded init and safetensors I/O
//! - [`durations`], [`groups`]: per-slot durations and per-group softmax

pub mod aligner;
pub mod cell;
pub mod decoder;
pub mod durations;
pub mod encoder;
pub mod generation;
pub mod groups;
pub mod params;

pub use durations::DurationVector;
pub use generation::{Generation, MelodyModel, StopReason, TeacherForced};
pub use groups::OutputGroups;
pub use params::Parameters;
