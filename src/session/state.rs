//! Capture scheduler state machine
//!
//! Two states: `Idle` and `Capturing`. Start and single-capture requests are
//! checked against the camera and subject preconditions here, so every refusal
//! is a typed [`CaptureError`] rather than a silent no-op.

use crate::camera::CameraState;
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No recurring capture
    #[default]
    Idle,
    /// Recurring capture active
    Capturing,
}

impl SchedulerState {
    /// Returns a human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "Idle",
            SchedulerState::Capturing => "Capturing",
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, SchedulerState::Capturing)
    }
}

/// Why recurring capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator pressed stop
    User,
    /// Operator left the capture console
    Detached,
    /// Camera became unavailable mid-session
    CameraLost,
}

impl StopReason {
    pub fn description(&self) -> &'static str {
        match self {
            StopReason::User => "stopped by operator",
            StopReason::Detached => "console detached",
            StopReason::CameraLost => "camera lost",
        }
    }
}

/// What the scheduler is asked to do
///
/// Start and single-capture requests carry the facts their preconditions
/// depend on, read by the caller at request time.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Start {
        camera: CameraState,
        subject_selected: bool,
    },
    Tick,
    SingleCapture {
        camera: CameraState,
        subject_selected: bool,
    },
    Stop(StopReason),
}

/// Reason for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionReason {
    Started,
    AlreadyCapturing,
    Tick,
    SingleCapture,
    Stopped { reason: StopReason },
}

/// Result of an accepted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SchedulerState,
    pub to: SchedulerState,
    pub reason: TransitionReason,
    /// Whether the caller should launch one capture cycle
    pub launch_cycle: bool,
}

/// Capture scheduler state machine
///
/// Not synchronised; the controller keeps it behind a lock.
#[derive(Debug)]
pub struct SchedulerStateMachine {
    state: SchedulerState,
    state_entered_at: Instant,
    runs_started: u64,
}

impl Default for SchedulerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerStateMachine {
    /// Creates a new state machine in the Idle state
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            state_entered_at: Instant::now(),
            runs_started: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns how long the machine has been in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// Number of Idle to Capturing transitions so far
    pub fn runs_started(&self) -> u64 {
        self.runs_started
    }

    /// Process an event, returning the transition or the reason it was refused
    pub fn process_event(&mut self, event: SchedulerEvent) -> Result<Transition, CaptureError> {
        let from = self.state;
        let (to, reason, launch_cycle) = match (from, event) {
            (
                SchedulerState::Idle,
                SchedulerEvent::Start {
                    camera,
                    subject_selected,
                },
            ) => {
                check_preconditions(&camera, subject_selected)?;
                (SchedulerState::Capturing, TransitionReason::Started, true)
            }
            (SchedulerState::Capturing, SchedulerEvent::Start { .. }) => (
                SchedulerState::Capturing,
                TransitionReason::AlreadyCapturing,
                false,
            ),

            (SchedulerState::Capturing, SchedulerEvent::Tick) => {
                (SchedulerState::Capturing, TransitionReason::Tick, true)
            }
            (SchedulerState::Idle, SchedulerEvent::Tick) => return Err(CaptureError::NotCapturing),

            (
                SchedulerState::Idle,
                SchedulerEvent::SingleCapture {
                    camera,
                    subject_selected,
                },
            ) => {
                check_preconditions(&camera, subject_selected)?;
                (SchedulerState::Idle, TransitionReason::SingleCapture, true)
            }
            (SchedulerState::Capturing, SchedulerEvent::SingleCapture { .. }) => {
                return Err(CaptureError::SchedulerActive)
            }

            (SchedulerState::Capturing, SchedulerEvent::Stop(reason)) => (
                SchedulerState::Idle,
                TransitionReason::Stopped { reason },
                false,
            ),
            (SchedulerState::Idle, SchedulerEvent::Stop(_)) => {
                return Err(CaptureError::NotCapturing)
            }
        };

        if to != from {
            tracing::info!(
                "Scheduler: {} -> {} ({:?})",
                from.description(),
                to.description(),
                reason
            );
            self.state = to;
            self.state_entered_at = Instant::now();
            if to.is_capturing() {
                self.runs_started += 1;
            }
        }

        Ok(Transition {
            from,
            to,
            reason,
            launch_cycle,
        })
    }

    /// Force the machine back to Idle
    pub fn reset(&mut self) {
        if self.state != SchedulerState::Idle {
            tracing::info!("Scheduler: resetting from {}", self.state.description());
        }
        self.state = SchedulerState::Idle;
        self.state_entered_at = Instant::now();
    }
}

/// Camera problems are reported before a missing subject
fn check_preconditions(camera: &CameraState, subject_selected: bool) -> Result<(), CaptureError> {
    match camera {
        CameraState::Ready => {}
        CameraState::Pending => return Err(CaptureError::CameraNotReady),
        CameraState::Unavailable { reason } => {
            return Err(CaptureError::CameraUnavailable(reason.clone()))
        }
    }
    if !subject_selected {
        return Err(CaptureError::MissingSubject);
    }
    Ok(())
}
