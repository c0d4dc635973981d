//! Request-scoped and process-scoped error types.

use thiserror::Error;

use crate::params::ParamsError;
use crate::weights::WeightError;

/// Errors surfaced while analyzing one recording. None of them outlive the request.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Empty or unusable input: no samples, zero sample rate, bad file name or extension.
    #[error("{0}")]
    InvalidInput(String),

    /// The supplied bytes could not be decoded as audio.
    #[error("Failed to load audio file: {0}")]
    Decode(String),

    /// Feature extraction or the forward pass failed.
    #[error("Prediction error: {0}")]
    Prediction(String),
}

impl DetectorError {
    /// Whether the caller (as opposed to the service) is at fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Decode(_))
    }
}

/// Failure to bring up pretrained weights. Never fatal: the classifier falls
/// back to its untrained initialization.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error(transparent)]
    Weights(#[from] WeightError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("missing tensor {0}")]
    MissingTensor(String),
    #[error("shape mismatch for {name}: got {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
}

pub type Result<T, E = DetectorError> = std::result::Result<T, E>;
