//! Custom error types for the session controller.
//!
//! This module defines `SessionError`, the only error type that crosses the controller
//! boundary. Every hardware-proxy call is wrapped where it is made and its `anyhow` error is
//! converted into one of these variants, so callers never see a raw vendor failure.
//!
//! ## Error Taxonomy
//!
//! - **`NoDeviceFound`**: Discovery returned zero descriptors for a required kind.
//!   Recoverable by reconnecting hardware and retrying discovery.
//! - **`HardwareUnavailable`**: A proxy operation failed because the unit is absent or
//!   unresponsive. The session stays in (or returns to) its prior non-fatal state.
//! - **`AlreadyConnected`**: A connect attempt against a descriptor that is already owned
//!   by a session. Rejected without side effects.
//! - **`InvalidStateTransition`**: The requested operation is not valid in the current
//!   session state (for example tearing down while acquiring).
//! - **`PartialApply`**: One or more acquisition parameters failed to apply. The session
//!   remains `Ready`.
//! - **`ResultExtraction`**: The completion event carried no usable result. The session
//!   returns to `Ready` since the hardware itself reported completion.
//! - **`Faulted`**: The adapter became unusable; the session must be rebuilt.
//!
//! `ErrorKind` is a `Copy` tag for each variant. Failure notifications on the session event
//! channel carry it so the presentation layer can render errors without a separate channel.

use crate::hardware::DeviceKind;
use crate::session::SessionState;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the session error type.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Tag identifying the kind of a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Discovery found no unit of a required kind.
    NoDeviceFound,
    /// A hardware proxy operation failed.
    HardwareUnavailable,
    /// The detector descriptor is owned by another session.
    AlreadyConnected,
    /// The operation is not valid in the current state.
    InvalidStateTransition,
    /// Some acquisition parameters failed to apply.
    PartialApply,
    /// The completion event yielded no usable result.
    ResultExtraction,
    /// The requested region does not fit on the chip (strict validation).
    RegionOutOfBounds,
    /// The session is unusable.
    Faulted,
    /// A blocking wait expired.
    Timeout,
    /// Configuration could not be loaded or failed validation.
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NoDeviceFound => "no_device_found",
            ErrorKind::HardwareUnavailable => "hardware_unavailable",
            ErrorKind::AlreadyConnected => "already_connected",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::PartialApply => "partial_apply",
            ErrorKind::ResultExtraction => "result_extraction",
            ErrorKind::RegionOutOfBounds => "region_out_of_bounds",
            ErrorKind::Faulted => "faulted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Acquisition parameter sub-settings applied independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterField {
    /// Detector gain token.
    Gain,
    /// ADC selection token.
    Adc,
    /// Integration (exposure) time.
    IntegrationTime,
    /// Scan or image acquisition format.
    AcquisitionFormat,
    /// Region of interest geometry and binning.
    Region,
}

impl fmt::Display for ParameterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ParameterField::Gain => "gain",
            ParameterField::Adc => "adc",
            ParameterField::IntegrationTime => "integration_time",
            ParameterField::AcquisitionFormat => "acquisition_format",
            ParameterField::Region => "region",
        };
        write!(f, "{}", label)
    }
}

/// One parameter sub-setting that the hardware rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterFailure {
    /// Which sub-setting failed.
    pub field: ParameterField,
    /// Hardware error message.
    pub message: String,
}

/// Error returned when some acquisition parameters could not be applied.
///
/// The remaining sub-settings were still applied; `failures` lists only the rejected ones,
/// in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialApplyError {
    /// Rejected sub-settings.
    pub failures: Vec<ParameterFailure>,
}

impl PartialApplyError {
    /// Returns true if the given field is among the failures.
    pub fn failed(&self, field: ParameterField) -> bool {
        self.failures.iter().any(|f| f.field == field)
    }
}

impl fmt::Display for PartialApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} parameter(s) failed to apply", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{} ({})", sep, failure.field, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialApplyError {}

/// Primary error type for session control.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Discovery returned zero descriptors for a required kind.
    #[error("No {kind} found during discovery")]
    NoDeviceFound {
        /// The kind with no discovered units.
        kind: DeviceKind,
    },

    /// A hardware proxy operation raised an error.
    #[error("Hardware unavailable during {operation}: {message}")]
    HardwareUnavailable {
        /// Proxy operation that failed.
        operation: &'static str,
        /// Error reported by the proxy.
        message: String,
    },

    /// The detector descriptor is already held by a connected session.
    #[error("Device '{id}' is already connected")]
    AlreadyConnected {
        /// Descriptor id of the detector.
        id: String,
    },

    /// The operation is not permitted in the current state.
    #[error("Cannot {operation} while session is {state}")]
    InvalidStateTransition {
        /// State the session was in.
        state: SessionState,
        /// Operation that was rejected.
        operation: &'static str,
    },

    /// Some parameter sub-settings failed to apply.
    #[error(transparent)]
    PartialApply(#[from] PartialApplyError),

    /// The completion event payload yielded no usable result.
    #[error("Acquisition failed: {0}")]
    ResultExtraction(String),

    /// Region geometry exceeds the chip bounds (strict validation only).
    #[error("Region out of bounds: {0}")]
    RegionOutOfBounds(String),

    /// The session is faulted and must be reconstructed.
    #[error("Session faulted: {0}")]
    Faulted(String),

    /// A blocking wait expired before the awaited condition.
    #[error("Timed out after {timeout_ms} ms waiting for {waiting_for}")]
    Timeout {
        /// What the caller was waiting for.
        waiting_for: String,
        /// Timeout that expired.
        timeout_ms: u64,
    },

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration values failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// Wrap a hardware proxy error raised by `operation`.
    pub fn hardware(operation: &'static str, err: anyhow::Error) -> Self {
        SessionError::HardwareUnavailable {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NoDeviceFound { .. } => ErrorKind::NoDeviceFound,
            SessionError::HardwareUnavailable { .. } => ErrorKind::HardwareUnavailable,
            SessionError::AlreadyConnected { .. } => ErrorKind::AlreadyConnected,
            SessionError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            SessionError::PartialApply(_) => ErrorKind::PartialApply,
            SessionError::ResultExtraction(_) => ErrorKind::ResultExtraction,
            SessionError::RegionOutOfBounds(_) => ErrorKind::RegionOutOfBounds,
            SessionError::Faulted(_) => ErrorKind::Faulted,
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::Config(_) | SessionError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the session can continue after this error.
    ///
    /// Only `Faulted` requires rebuilding the session.
    pub fn can_recover(&self) -> bool {
        !matches!(self, SessionError::Faulted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_error_keeps_operation_and_context() {
        let err = SessionError::hardware(
            "open_communications",
            anyhow::anyhow!("port busy").context("CCD Hardware Not Detected"),
        );
        assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
        let text = err.to_string();
        assert!(text.contains("open_communications"));
        assert!(text.contains("CCD Hardware Not Detected"));
        assert!(text.contains("port busy"));
    }

    #[test]
    fn partial_apply_lists_every_failure() {
        let err = PartialApplyError {
            failures: vec![
                ParameterFailure {
                    field: ParameterField::Adc,
                    message: "unsupported ADC token 7".into(),
                },
                ParameterFailure {
                    field: ParameterField::Region,
                    message: "area rejected".into(),
                },
            ],
        };
        assert!(err.failed(ParameterField::Adc));
        assert!(!err.failed(ParameterField::Gain));
        assert_eq!(
            err.to_string(),
            "2 parameter(s) failed to apply: adc (unsupported ADC token 7); region (area rejected)"
        );

        let session_err: SessionError = err.into();
        assert_eq!(session_err.kind(), ErrorKind::PartialApply);
        assert!(session_err.can_recover());
    }

    #[test]
    fn only_faulted_is_unrecoverable() {
        assert!(!SessionError::Faulted("sink closed".into()).can_recover());
        assert!(SessionError::NoDeviceFound {
            kind: DeviceKind::Detector
        }
        .can_recover());
        assert!(SessionError::ResultExtraction("missing result".into()).can_recover());
    }

    #[test]
    fn state_transition_message_names_state() {
        let err = SessionError::InvalidStateTransition {
            state: SessionState::Acquiring,
            operation: "teardown",
        };
        assert_eq!(err.to_string(), "Cannot teardown while session is Acquiring");
    }
}
