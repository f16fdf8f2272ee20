//! Face recognition backend
//!
//! The recognition itself happens in an external service. This module defines
//! the data it exchanges with the console and the [`Recognizer`] seam the
//! capture controller talks to, so tests can swap the HTTP client for a
//! double.

pub mod client;

pub use client::AttendanceApiClient;

use crate::camera::Frame;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Message used when the service fails without saying why
pub const GENERIC_SERVICE_ERROR: &str = "Error processing image";

/// A class session students are recognized against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Opaque id; the backend sends integers, kept in textual form
    #[serde(deserialize_with = "deserialize_opaque_id")]
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Subject {
    /// Label shown in pickers and logs
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.code)
    }
}

/// A student matched in a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedStudent {
    #[serde(deserialize_with = "deserialize_opaque_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roll_number: String,
}

/// Successful recognition outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub recognized_count: usize,
    #[serde(default)]
    pub students: Vec<MatchedStudent>,
}

/// Recognition failures
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("No subject selected")]
    MissingSubject,

    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Connection failed: {0}")]
    Transport(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),
}

impl RecognitionError {
    /// Message suitable for the operator
    ///
    /// The service's own `error` text is passed through; anything else
    /// collapses to the generic message.
    pub fn user_message(&self) -> String {
        match self {
            RecognitionError::MissingSubject => crate::error::MISSING_SUBJECT_MESSAGE.to_string(),
            RecognitionError::Service { message, .. } if !message.trim().is_empty() => {
                message.clone()
            }
            _ => GENERIC_SERVICE_ERROR.to_string(),
        }
    }
}

/// Submits frames to a recognition backend
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize the students visible in `frame` for `subject_id`
    async fn recognize(
        &self,
        frame: &Frame,
        subject_id: &str,
    ) -> Result<RecognitionResponse, RecognitionError>;
}

fn deserialize_opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OpaqueId {
        Int(i64),
        Text(String),
    }

    Ok(match OpaqueId::deserialize(deserializer)? {
        OpaqueId::Int(n) => n.to_string(),
        OpaqueId::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_from_backend_row() {
        let json = r#"{
            "id": 7,
            "code": "CS101",
            "name": "Intro to Computing",
            "faculty": "Science",
            "description": "",
            "created_at": "2024-03-01 09:00:00"
        }"#;
        let subject: Subject = serde_json::from_str(json).unwrap();
        assert_eq!(subject.id, "7");
        assert_eq!(subject.code, "CS101");
        assert_eq!(subject.faculty.as_deref(), Some("Science"));
        assert_eq!(subject.display_name(), "Intro to Computing (CS101)");
    }

    #[test]
    fn test_subject_with_text_id() {
        let json = r#"{"id": "abc", "code": "M1", "name": "Maths"}"#;
        let subject: Subject = serde_json::from_str(json).unwrap();
        assert_eq!(subject.id, "abc");
        assert!(subject.faculty.is_none());
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "recognized_count": 2,
            "students": [
                {"id": 1, "name": "Ana", "roll_number": "R1"},
                {"id": 2, "name": "Ben", "roll_number": "R2"}
            ]
        }"#;
        let response: RecognitionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.recognized_count, 2);
        assert_eq!(response.students[1].id, "2");
        assert_eq!(response.students[1].roll_number, "R2");
    }

    #[test]
    fn test_zero_match_response() {
        let response: RecognitionResponse =
            serde_json::from_str(r#"{"recognized_count": 0}"#).unwrap();
        assert_eq!(response.recognized_count, 0);
        assert!(response.students.is_empty());
    }

    #[test]
    fn test_user_message() {
        let err = RecognitionError::Service {
            status: 400,
            message: "No face detected in image".to_string(),
        };
        assert_eq!(err.user_message(), "No face detected in image");

        let err = RecognitionError::Service {
            status: 500,
            message: String::new(),
        };
        assert_eq!(err.user_message(), GENERIC_SERVICE_ERROR);

        assert_eq!(
            RecognitionError::Timeout(30).user_message(),
            GENERIC_SERVICE_ERROR
        );
        assert_eq!(
            RecognitionError::Transport("refused".into()).user_message(),
            GENERIC_SERVICE_ERROR
        );
    }

    #[test]
    fn test_error_display() {
        let err = RecognitionError::Timeout(30);
        assert_eq!(err.to_string(), "Request timeout after 30 seconds");

        let err = RecognitionError::Service {
            status: 400,
            message: "Invalid subject ID".to_string(),
        };
        assert_eq!(err.to_string(), "Service error (400): Invalid subject ID");
    }
}
