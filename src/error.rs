//! Capture error taxonomy
//!
//! Every failure on the capture path resolves to a [`CaptureError`]. Each
//! variant knows whether (and how) it should be surfaced to the operator,
//! so the controller can hand it straight to the notification bus.

use crate::notification::Severity;

/// Message shown when the camera cannot be opened or drops out
pub const CAMERA_ERROR_MESSAGE: &str = "Error accessing camera. Please check permissions.";

/// Message shown when a capture is attempted without a subject
pub const MISSING_SUBJECT_MESSAGE: &str = "Please select a subject before capturing";

/// Errors produced by the capture path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Camera is not ready")]
    CameraNotReady,

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("No subject selected")]
    MissingSubject,

    #[error("No frame available from the camera yet")]
    NoFrameAvailable,

    #[error("Recognition failed: {0}")]
    RecognitionService(String),

    #[error("Result from epoch {launched} discarded (current epoch {current})")]
    StaleResult { launched: u64, current: u64 },

    #[error("A capture cycle is already in flight")]
    CycleInFlight,

    #[error("Single capture is not available while the session is capturing")]
    SchedulerActive,

    #[error("Subject cannot be changed while the session is capturing")]
    SubjectLocked,

    #[error("Session is not capturing")]
    NotCapturing,
}

impl CaptureError {
    /// User-facing notice for this error, if it should be shown at all
    pub fn notice(&self) -> Option<(String, Severity)> {
        match self {
            CaptureError::CameraNotReady => {
                Some(("Camera is not ready yet".to_string(), Severity::Warning))
            }
            CaptureError::CameraUnavailable(_) => {
                Some((CAMERA_ERROR_MESSAGE.to_string(), Severity::Error))
            }
            CaptureError::MissingSubject => {
                Some((MISSING_SUBJECT_MESSAGE.to_string(), Severity::Warning))
            }
            CaptureError::RecognitionService(message) => Some((message.clone(), Severity::Error)),
            CaptureError::SchedulerActive => Some((
                "Stop recognition before capturing a single frame".to_string(),
                Severity::Warning,
            )),
            CaptureError::SubjectLocked => Some((
                "Stop recognition before changing the subject".to_string(),
                Severity::Warning,
            )),
            // Cycle-local and silent
            CaptureError::NoFrameAvailable
            | CaptureError::StaleResult { .. }
            | CaptureError::CycleInFlight
            | CaptureError::NotCapturing => None,
        }
    }

    /// Whether this error halts the capture path
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::CameraUnavailable(_))
    }
}
