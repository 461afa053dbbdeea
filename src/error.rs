//! Error types for melody-lstm-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/autograd error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration (layout sizing, hidden sizes, output groups).
    #[error("config: {0}")]
    Config(String),

    /// Input tensor does not match the configured widths.
    #[error("shape: {0}")]
    Shape(String),

    /// Zero-length event or signal sequence. No recurrence can start from it.
    #[error("degenerate sequence: {events} events, {signals} signal steps")]
    DegenerateSequence { events: usize, signals: usize },

    /// The duration aligner pointed past the last encoder position during teacher forcing.
    #[error(
        "alignment overrun at decoder step {step}: event index {index} but only {num_events} events"
    )]
    AlignmentOverrun {
        step: usize,
        index: usize,
        num_events: usize,
    },

    /// A ground-truth step whose duration is negative or not a number.
    #[error("invalid duration {value} at decoder step {step}")]
    InvalidDuration { step: usize, value: f64 },

    /// An error raised while processing one training example.
    #[error("example {index}: {source}")]
    Example {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// Malformed dataset file or dataset contents.
    #[error("dataset: {0}")]
    Dataset(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Attach the index of the training example that produced this error.
    pub fn in_example(self, index: usize) -> Self {
        Error::Example {
            index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_context_names_step_and_index() {
        let err = Error::AlignmentOverrun {
            step: 3,
            index: 7,
            num_events: 4,
        }
        .in_example(12);
        let msg = err.to_string();
        assert!(msg.starts_with("example 12:"), "{msg}");
        assert!(msg.contains("step 3"), "{msg}");
        assert!(msg.contains("index 7"), "{msg}");
        assert!(msg.contains("4 events"), "{msg}");
    }
}
