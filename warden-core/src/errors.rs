//! errors.rs - Error types for the warden-core library.
//!
//! `WardenError` is the setup-time family: anything in it means the process
//! must refuse to handle events. Runtime failures of cloud collaborators are
//! reported as `ProviderError`, which always carries the provider's error
//! code so that step failures can be recorded as `<step>:<code>` tokens.
//!
//! License: MIT OR Apache-2.0

use thiserror::Error;

/// Provider error codes that mean "the thing you asked about does not exist".
///
/// Create-or-update steps fall through to the create path only for these.
pub const NOT_FOUND_CODES: &[&str] = &[
    "TrailNotFoundException",
    "ResourceNotFoundException",
    "InvalidTrailNameException",
    "InvalidInstanceID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "InvalidNetworkInterfaceID.NotFound",
    "InvalidVolume.NotFound",
    "InvalidAssociationID.NotFound",
    "NoSuchKey",
    "NotFound",
];

/// All errors that abort start-up. None of these is ever produced while an
/// event is being handled.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WardenError {
    #[error("Required option '{0}' is missing")]
    MissingOption(&'static str),

    #[error("Option '{key}' has an invalid value: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Configuration validation failed:\n{0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("An unexpected I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("A critical system error occurred: {0}")]
    AnyhowWrapper(#[from] anyhow::Error),
}

/// A failed call against an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error with a code and no further detail.
    pub fn code(code: impl Into<String>) -> Self {
        Self::new(code, "")
    }

    pub fn is_not_found(&self) -> bool {
        NOT_FOUND_CODES.contains(&self.code.as_str())
    }
}

/// Failure of a single remediation step. Only the code survives into the
/// invocation result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}")]
pub struct StepError {
    pub code: String,
}

impl StepError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl From<ProviderError> for StepError {
    fn from(err: ProviderError) -> Self {
        let code = if err.code.is_empty() {
            "UnknownError".to_string()
        } else {
            err.code
        };
        StepError { code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes_are_classified() {
        assert!(ProviderError::code("TrailNotFoundException").is_not_found());
        assert!(ProviderError::code("InvalidGroup.NotFound").is_not_found());
        assert!(!ProviderError::code("AccessDenied").is_not_found());
    }

    #[test]
    fn empty_provider_code_becomes_unknown_step_code() {
        let step: StepError = ProviderError::new("", "boom").into();
        assert_eq!(step.code, "UnknownError");
        let step: StepError = ProviderError::code("Throttling").into();
        assert_eq!(step.to_string(), "Throttling");
    }
}
