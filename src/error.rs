// Error types for capture sessions and overlay reconciliation

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::session::SessionState;

/// Comprehensive error type for capture operations
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CaptureError {
    /// The permission grant was refused; the session never activates
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    /// Virtual display or acquisition surface could not be created
    #[error("capture setup failed: {0}")]
    SetupFailed(String),
    /// A single image could not be read; the frame is skipped
    #[error("image acquisition failed: {0}")]
    ImageAcquisitionTransient(String),
    /// The platform revoked the capture source
    #[error("capture source terminated by the platform")]
    ExternalTermination,
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Session state machine refused a transition
    #[error("cannot transition session from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
    /// The session has already reached a terminal state
    #[error("capture session is closed")]
    SessionClosed,
    /// The presentation context no longer accepts tasks
    #[error("presentation context is closed")]
    DispatchClosed,
}

impl CaptureError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::PermissionDenied(_) => {
                "Screen capture permission was not granted.".to_string()
            }
            CaptureError::SetupFailed(err) => format!("Failed to start screen capture: {}", err),
            CaptureError::ImageAcquisitionTransient(err) => {
                format!("A frame could not be read: {}", err)
            }
            CaptureError::ExternalTermination => {
                "Screen capture was stopped by the system.".to_string()
            }
            CaptureError::InvalidConfig(err) => format!("Invalid configuration: {}", err),
            CaptureError::InvalidTransition { from, to } => {
                format!("Capture cannot go from {:?} to {:?}.", from, to)
            }
            CaptureError::SessionClosed => "The capture session has ended.".to_string(),
            CaptureError::DispatchClosed => "The application is shutting down.".to_string(),
        }
    }

    /// Get recovery suggestions
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            CaptureError::PermissionDenied(_) => {
                Some("Request capture again and accept the system prompt.".to_string())
            }
            CaptureError::SetupFailed(_) | CaptureError::ExternalTermination => {
                Some("Start a new capture session.".to_string())
            }
            _ => None,
        }
    }

    /// Per-frame errors never escalate to the session
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::ImageAcquisitionTransient(_))
    }
}

/// Errors raised while reconciling redaction overlays
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum OverlayError {
    /// A region with negative size was submitted
    #[error("invalid overlay region at index {index}: {reason}")]
    InvalidRegion { index: usize, reason: String },
    /// The overlay surface rejected an operation
    #[error("overlay surface error: {0}")]
    Surface(String),
    /// The presentation context no longer accepts overlay work
    #[error("presentation context is closed")]
    DispatchClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_tagged() {
        let err = CaptureError::PermissionDenied("user declined".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "PermissionDenied");
        assert_eq!(json["message"], "user declined");
    }

    #[test]
    fn test_only_acquisition_errors_are_transient() {
        assert!(CaptureError::ImageAcquisitionTransient("gone".into()).is_transient());
        assert!(!CaptureError::SetupFailed("no display".into()).is_transient());
        assert!(!CaptureError::ExternalTermination.is_transient());
    }

    #[test]
    fn test_recovery_suggestion() {
        assert!(CaptureError::ExternalTermination.recovery_suggestion().is_some());
        assert!(CaptureError::SessionClosed.recovery_suggestion().is_none());
    }
}
