//! HTTP client for the attendance recognition service
//!
//! Talks to the backend's `/api/subjects` and `/api/attendance` endpoints.
//! Recognition requests are never retried: a failed cycle is simply followed
//! by the next tick.

use super::{
    RecognitionError, RecognitionResponse, Recognizer, Subject, GENERIC_SERVICE_ERROR,
};
use crate::camera::{Frame, FRAME_FILE_NAME};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Default backend address
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Default timeout for API requests in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Extract the operator-facing message from a failed response body
pub fn service_error(status: u16, body: &str) -> RecognitionError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| GENERIC_SERVICE_ERROR.to_string());
    RecognitionError::Service { status, message }
}

/// reqwest-backed recognition client
#[derive(Debug, Clone)]
pub struct AttendanceApiClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl AttendanceApiClient {
    /// Create a client with default settings
    pub fn new() -> Result<Self, RecognitionError> {
        Self::with_config(DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a client with full configuration
    ///
    /// # Arguments
    ///
    /// * `base_url` - The service base URL (e.g., "http://localhost:5000")
    /// * `timeout_secs` - Request timeout in seconds
    pub fn with_config(base_url: &str, timeout_secs: u64) -> Result<Self, RecognitionError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RecognitionError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_send_error(&self, e: reqwest::Error) -> RecognitionError {
        if e.is_timeout() {
            RecognitionError::Timeout(self.timeout.as_secs())
        } else {
            RecognitionError::Transport(e.to_string())
        }
    }

    /// Check if the service answers at all
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/subjects", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Recognition service not available: {}", e);
                false
            }
        }
    }

    /// Fetch the subjects that can be selected for a session
    pub async fn list_subjects(&self) -> Result<Vec<Subject>, RecognitionError> {
        let url = format!("{}/api/subjects", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(service_error(status, &body));
        }

        let subjects: Vec<Subject> = response
            .json()
            .await
            .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))?;

        tracing::debug!("Loaded {} subjects", subjects.len());
        Ok(subjects)
    }
}

#[async_trait]
impl Recognizer for AttendanceApiClient {
    async fn recognize(
        &self,
        frame: &Frame,
        subject_id: &str,
    ) -> Result<RecognitionResponse, RecognitionError> {
        if subject_id.trim().is_empty() {
            return Err(RecognitionError::MissingSubject);
        }

        let url = format!("{}/api/attendance", self.base_url);
        let image = Part::bytes(frame.data.clone())
            .file_name(FRAME_FILE_NAME)
            .mime_str(&frame.mime_type)
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;
        let form = Form::new()
            .part("image", image)
            .text("subject_id", subject_id.to_string());

        tracing::debug!(
            "Submitting {} byte frame for subject {}",
            frame.data.len(),
            subject_id
        );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let err = service_error(status, &body);
            tracing::warn!("Recognition request failed: {}", err);
            return Err(err);
        }

        let parsed: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            "Recognition returned {} match(es)",
            parsed.recognized_count
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame() -> Frame {
        Frame {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            mime_type: "image/jpeg".to_string(),
            width: 1,
            height: 1,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = AttendanceApiClient::new().unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.timeout().as_secs(), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_with_config_trims_trailing_slash() {
        let client = AttendanceApiClient::with_config("http://example.com:5000/", 10).unwrap();
        assert_eq!(client.base_url(), "http://example.com:5000");
        assert_eq!(client.timeout().as_secs(), 10);
    }

    #[test]
    fn test_service_error_uses_error_field() {
        let err = service_error(400, r#"{"error": "Invalid subject ID"}"#);
        match err {
            RecognitionError::Service { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid subject ID");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_service_error_fallback() {
        for body in ["", "<html>oops</html>", r#"{"message": "x"}"#, r#"{"error": "  "}"#] {
            match service_error(500, body) {
                RecognitionError::Service { message, .. } => {
                    assert_eq!(message, GENERIC_SERVICE_ERROR)
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_blank_subject_fails_locally() {
        // Unroutable address: reaching the network would fail differently
        let client = AttendanceApiClient::with_config("http://127.0.0.1:9", 1).unwrap();
        let err = client.recognize(&frame(), "  ").await.unwrap_err();
        assert!(matches!(err, RecognitionError::MissingSubject));
    }
}
