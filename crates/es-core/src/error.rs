//! Error types for EddyStat

use thiserror::Error;

/// EddyStat error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or undersized input data (wrong dimensionality, empty
    /// axes, fully masked field, non-finite scale metadata).
    #[error("Data validation error: {0}")]
    DataValidation(String),

    /// The dataset is valid but too small or too heavily masked for the
    /// requested configuration.
    #[error("Insufficient data for {context}: need {required} valid samples, have {available}")]
    InsufficientData {
        /// Minimum number of valid samples the algorithm requires.
        required: usize,
        /// Number of valid samples actually available.
        available: usize,
        /// Which algorithm or stage raised the requirement.
        context: String,
    },

    /// Inconsistent or out-of-domain configuration parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two statistic instances cannot be compared (different model family,
    /// different binning, non-overlapping domains).
    #[error("Incompatible instances: {0}")]
    IncompatibleInstances(String),

    /// A distance metric required a valid model fit and at least one
    /// instance's fit is marked invalid.
    #[error("Invalid fit: {0}")]
    InvalidFit(String),

    /// Internal numerical failure (singular solve, non-finite reduction).
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Short name of the taxonomy variant, used in failure markers.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DataValidation(_) => "DataValidation",
            Error::InsufficientData { .. } => "InsufficientData",
            Error::Configuration(_) => "Configuration",
            Error::IncompatibleInstances(_) => "IncompatibleInstances",
            Error::InvalidFit(_) => "InvalidFit",
            Error::Computation(_) => "Computation",
        }
    }

    /// Convenience constructor for [`Error::InsufficientData`].
    pub fn insufficient(context: impl Into<String>, required: usize, available: usize) -> Self {
        Error::InsufficientData { required, available, context: context.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let e = Error::insufficient("power_spectrum", 100, 3);
        assert_eq!(e.kind(), "InsufficientData");
        assert!(e.to_string().contains("need 100"));
        assert!(e.to_string().contains("have 3"));
    }
}
