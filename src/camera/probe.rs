//! Camera capability probe
//!
//! Tracks whether the capture device is usable. `Unavailable` is terminal:
//! once the device has failed, further ready reports are ignored until the
//! operator explicitly retries.

use super::FrameSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Camera capability state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CameraState {
    /// Device not opened yet
    #[default]
    Pending,
    /// Device produced a usable stream
    Ready,
    /// Permission denied or device error
    Unavailable { reason: String },
}

impl CameraState {
    /// Returns a human-readable description of the state
    pub fn description(&self) -> String {
        match self {
            CameraState::Pending => "Waiting for camera".to_string(),
            CameraState::Ready => "Camera ready".to_string(),
            CameraState::Unavailable { reason } => format!("Camera unavailable ({})", reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CameraState::Ready)
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CameraState::Unavailable { .. })
    }
}

/// Shared camera capability
///
/// Cheap to clone; clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct CapabilityProbe {
    state: Arc<watch::Sender<CameraState>>,
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe {
    /// Creates a probe in the `Pending` state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CameraState::Pending);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Current state
    pub fn state(&self) -> CameraState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Record that the device produced a usable stream
    ///
    /// Ignored (returns false) once the probe is unavailable.
    pub fn mark_ready(&self) -> bool {
        let changed = self.state.send_if_modified(|state| match state {
            CameraState::Pending => {
                *state = CameraState::Ready;
                true
            }
            _ => false,
        });
        if changed {
            tracing::info!("Camera ready");
        }
        changed
    }

    /// Record a permission denial or device error
    ///
    /// Returns false if the probe was already unavailable.
    pub fn mark_unavailable(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let changed = self.state.send_if_modified(|state| {
            if state.is_unavailable() {
                return false;
            }
            *state = CameraState::Unavailable {
                reason: reason.clone(),
            };
            true
        });
        if changed {
            tracing::error!("Camera unavailable: {}", reason);
        }
        changed
    }

    /// Operator-initiated retry: back to `Pending` so the device can be probed again
    pub fn retry(&self) {
        self.state.send_replace(CameraState::Pending);
        tracing::info!("Camera probe reset for retry");
    }

    /// Follow state changes
    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state.subscribe()
    }

    /// Open `source` on the blocking pool and record the outcome
    pub async fn probe(&self, source: Arc<dyn FrameSource>) -> CameraState {
        let current = self.state();
        if current.is_unavailable() {
            tracing::debug!("Skipping probe, camera already unavailable");
            return current;
        }

        let name = source.name();
        tracing::info!("Probing camera: {}", name);

        match tokio::task::spawn_blocking(move || source.open()).await {
            Ok(Ok(())) => {
                self.mark_ready();
            }
            Ok(Err(e)) => {
                self.mark_unavailable(e.to_string());
            }
            Err(e) => {
                self.mark_unavailable(format!("camera probe worker failed: {}", e));
            }
        }

        self.state()
    }
}
