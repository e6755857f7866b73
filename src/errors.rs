use thiserror::Error;

// Validation failures raised before any decoding work is done. Pixels that
// fail to decode are not errors, they just end up unassigned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("shape mismatch: {what} is {found}, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("codebook contains no targets")]
    EmptyCodebook,

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("percentile must be in [0, 100], got {0}")]
    InvalidPercentile(f32),

    #[error("target '{0}' appears more than once in the codebook")]
    DuplicateTarget(String),

    #[error("invalid intensity {value} at {location}")]
    InvalidIntensity { location: String, value: f32 },
}
