//! Error types for the localization toolbox
//!
//! None of these are recoverable mid-step: any error aborts the current run.

/// Result type alias
pub type Result<T> = std::result::Result<T, LocalizationError>;

#[derive(Debug, thiserror::Error)]
pub enum LocalizationError {
    /// Non-positive particle count, inverted bounds, singular covariance, negative time step, ...
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The raw weight sum was zero or non-finite before normalization
    #[error("Degenerate particle weights (sum = {sum:e})")]
    DegenerateWeights { sum: f64 },

    /// A trajectory log line could not be parsed into the expected field shape
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A measurement carried a different number of observations than there are landmarks
    #[error("Expected {expected} landmark observations, got {found}")]
    ObservationCount { expected: usize, found: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LocalizationError {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        LocalizationError::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }
}
