//! Attendance capture session
//!
//! - [`store`]: roster, subject, run flag and epoch
//! - [`state`]: `Idle`/`Capturing` scheduler state machine
//! - [`controller`]: ties the camera, recognizer, store and notification bus
//!   together and runs the capture cadence

pub mod controller;
pub mod state;
pub mod store;

pub use controller::{CaptureController, ControllerSettings, CycleOutcome};
pub use state::{SchedulerState, StopReason};
pub use store::{RecognizedStudent, SessionSnapshot, SessionStore};
