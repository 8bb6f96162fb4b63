//! Error types for `SensorMux` core library.

use thiserror::Error;

use crate::sensor::SensorKind;

/// Result type alias using `SensorMux` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for configuration and I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to the owner of a sensor handle.
///
/// `InvalidFrequency`, `InvalidReferenceFrame` and `PermissionPolicyViolation`
/// are raised locally and never reach the multiplexer. `SensorUnavailable`,
/// `PermissionDenied` and `BackendStartFailure` come from the backend and are
/// delivered to every handle of the affected type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("Invalid sampling frequency: {value}")]
    InvalidFrequency { value: f64 },

    #[error("{kind} does not support the requested reference frame")]
    InvalidReferenceFrame { kind: SensorKind },

    #[error("Feature '{feature}' is not allowed in this context")]
    PermissionPolicyViolation { feature: String },

    #[error("{kind} is not available on this platform")]
    SensorUnavailable { kind: SensorKind },

    #[error("Permission to use {kind} was denied")]
    PermissionDenied { kind: SensorKind },

    #[error("{kind} failed to start: {reason}")]
    BackendStartFailure { kind: SensorKind, reason: String },

    /// Reading was requested from a handle that was never activated.
    #[error("Sensor handle has never been activated")]
    NeverActivated,

    #[error("Sensor multiplexer has shut down")]
    MultiplexerShutdown,
}

/// Coarse classification of a [`SensorError`], mirroring the DOM exception
/// names a web-facing caller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// `NotReadableError`: the sensor cannot produce readings.
    NotReadable,
    /// `NotAllowedError`: the user or platform denied access.
    NotAllowed,
    /// `SecurityError`: the creating context may not use the feature.
    Security,
    /// `TypeError`: the caller passed invalid options.
    Type,
    /// `InvalidStateError`: the handle is in the wrong state.
    InvalidState,
}

impl ErrorClass {
    /// DOM exception name for this class.
    pub const fn dom_name(self) -> &'static str {
        match self {
            Self::NotReadable => "NotReadableError",
            Self::NotAllowed => "NotAllowedError",
            Self::Security => "SecurityError",
            Self::Type => "TypeError",
            Self::InvalidState => "InvalidStateError",
        }
    }
}

impl SensorError {
    /// Classify this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidFrequency { .. } | Self::InvalidReferenceFrame { .. } => ErrorClass::Type,
            Self::PermissionPolicyViolation { .. } => ErrorClass::Security,
            Self::SensorUnavailable { .. }
            | Self::BackendStartFailure { .. }
            | Self::MultiplexerShutdown => ErrorClass::NotReadable,
            Self::PermissionDenied { .. } => ErrorClass::NotAllowed,
            Self::NeverActivated => ErrorClass::InvalidState,
        }
    }

    /// Whether the error was raised without contacting the backend.
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrequency { .. }
                | Self::InvalidReferenceFrame { .. }
                | Self::PermissionPolicyViolation { .. }
                | Self::NeverActivated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_are_not_readable() {
        let unavailable = SensorError::SensorUnavailable {
            kind: SensorKind::Accelerometer,
        };
        let start = SensorError::BackendStartFailure {
            kind: SensorKind::Accelerometer,
            reason: "device busy".to_string(),
        };
        assert_eq!(unavailable.class().dom_name(), "NotReadableError");
        assert_eq!(start.class().dom_name(), "NotReadableError");
        assert!(!unavailable.is_local());
    }

    #[test]
    fn denial_is_distinct_from_unavailability() {
        let denied = SensorError::PermissionDenied {
            kind: SensorKind::Gyroscope,
        };
        assert_eq!(denied.class(), ErrorClass::NotAllowed);
        assert_eq!(denied.class().dom_name(), "NotAllowedError");
    }

    #[test]
    fn policy_violation_is_local() {
        let err = SensorError::PermissionPolicyViolation {
            feature: "magnetometer".to_string(),
        };
        assert!(err.is_local());
        assert_eq!(err.class(), ErrorClass::Security);
        assert_eq!(
            err.to_string(),
            "Feature 'magnetometer' is not allowed in this context"
        );
    }
}
