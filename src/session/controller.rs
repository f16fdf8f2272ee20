//! Capture session controller
//!
//! Drives capture cycles (acquire a frame, recognize, merge, notify) on a
//! fixed cadence. At most one cycle is outstanding at any time: a tick that
//! lands while the previous cycle is still waiting on the recognition service
//! is skipped. Every cycle is tagged with the session epoch at launch and its
//! result is dropped if the session was cleared, restarted or reset in the
//! meantime.
//!
//! Locks are `parking_lot` mutexes and are never held across an `.await`.
//! When both are needed the store lock is taken before the state machine lock.

use super::state::{SchedulerEvent, SchedulerState, SchedulerStateMachine, StopReason};
use super::store::{SessionSnapshot, SessionStore};
use crate::camera::{CameraState, FrameAcquirer};
use crate::error::{CaptureError, CAMERA_ERROR_MESSAGE};
use crate::notification::{NotificationBus, Severity};
use crate::recognition::{Recognizer, Subject};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default capture cadence
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 3000;

/// Default number of consecutive empty cycles before the operator is warned
pub const DEFAULT_NO_FRAME_WARNING_STREAK: u32 = 3;

/// Warning raised once the camera keeps returning nothing
pub const NO_FRAME_MESSAGE: &str = "Camera is not producing frames";

/// Controller tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Period of the recurring capture timer
    pub interval: Duration,
    /// Empty cycles in a row before a warning is raised; 0 never warns
    pub no_frame_warning_streak: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_CAPTURE_INTERVAL_MS),
            no_frame_warning_streak: DEFAULT_NO_FRAME_WARNING_STREAK,
        }
    }
}

/// How a finished cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Result merged into the roster
    Merged { recognized: usize, added: usize },
    /// Cycle failed or its result was discarded
    Failed(CaptureError),
}

#[derive(Debug, Clone, Copy)]
enum CycleKind {
    Immediate,
    Tick,
    Single,
}

impl CycleKind {
    fn label(&self) -> &'static str {
        match self {
            CycleKind::Immediate => "start",
            CycleKind::Tick => "tick",
            CycleKind::Single => "single",
        }
    }
}

struct Inner {
    acquirer: FrameAcquirer,
    recognizer: Arc<dyn Recognizer>,
    notifications: NotificationBus,
    settings: ControllerSettings,
    store: Mutex<SessionStore>,
    machine: Mutex<SchedulerStateMachine>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    current_cycle: Mutex<Option<JoinHandle<CycleOutcome>>>,
    in_flight: AtomicBool,
    no_frame_streak: AtomicU32,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

/// RAII guard that clears the in-flight flag when a cycle ends
struct CycleGuard {
    inner: Arc<Inner>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Attendance capture session controller
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct CaptureController {
    inner: Arc<Inner>,
}

impl CaptureController {
    pub fn new(
        acquirer: FrameAcquirer,
        recognizer: Arc<dyn Recognizer>,
        notifications: NotificationBus,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                acquirer,
                recognizer,
                notifications,
                settings,
                store: Mutex::new(SessionStore::new()),
                machine: Mutex::new(SchedulerStateMachine::new()),
                ticker: Mutex::new(None),
                current_cycle: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                no_frame_streak: AtomicU32::new(0),
            }),
        }
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.inner.notifications
    }

    pub fn settings(&self) -> ControllerSettings {
        self.inner.settings
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.machine.lock().state()
    }

    /// How long the scheduler has been in its current state
    pub fn time_in_state(&self) -> Duration {
        self.inner.machine.lock().time_in_state()
    }

    /// Recurring runs started since the controller was created
    pub fn runs_started(&self) -> u64 {
        self.inner.machine.lock().runs_started()
    }

    pub fn camera_state(&self) -> CameraState {
        self.inner.acquirer.probe().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.lock().snapshot()
    }

    /// Whether a capture cycle is currently outstanding
    pub fn is_cycle_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Choose the subject for the session; refused while capturing
    pub fn select_subject(&self, subject: Subject) -> Result<(), CaptureError> {
        let label = subject.display_name();
        let result = self.inner.store.lock().select_subject(subject);
        match result {
            Ok(()) => {
                tracing::info!("Subject selected: {}", label);
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Begin recurring capture
    ///
    /// Runs one cycle immediately, then one per configured interval.
    pub fn start(&self) -> Result<(), CaptureError> {
        let camera = self.camera_state();
        let begun = {
            let mut store = self.inner.store.lock();
            let mut machine = self.inner.machine.lock();
            let transition = machine.process_event(SchedulerEvent::Start {
                camera,
                subject_selected: store.subject().is_some(),
            });
            match transition {
                Ok(t) if !t.launch_cycle => Ok(false),
                Ok(_) => match store.begin_run() {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        machine.reset();
                        Err(e)
                    }
                },
                Err(e) => Err(e),
            }
        };

        match begun {
            Ok(false) => {
                tracing::debug!("Start ignored, already capturing");
                Ok(())
            }
            Ok(true) => {
                self.inner.no_frame_streak.store(0, Ordering::SeqCst);
                self.inner
                    .notifications
                    .raise("Attendance session started", Severity::Info);
                self.spawn_ticker();
                if let Err(e) = self.launch_cycle(CycleKind::Immediate) {
                    tracing::debug!("Immediate cycle not launched: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// One scheduler tick: launch a cycle unless one is still in flight
    pub fn tick(&self) -> Result<(), CaptureError> {
        self.inner.machine.lock().process_event(SchedulerEvent::Tick)?;
        match self.launch_cycle(CycleKind::Tick) {
            Err(CaptureError::CycleInFlight) => {
                tracing::debug!("Skipping tick, previous cycle still in flight");
                Err(CaptureError::CycleInFlight)
            }
            other => other,
        }
    }

    /// Capture exactly one frame while idle
    pub fn capture_once(&self) -> Result<(), CaptureError> {
        let camera = self.camera_state();
        let checked = {
            let store = self.inner.store.lock();
            let mut machine = self.inner.machine.lock();
            machine.process_event(SchedulerEvent::SingleCapture {
                camera,
                subject_selected: store.subject().is_some(),
            })
        };
        if let Err(e) = checked {
            return Err(self.report(e));
        }
        self.launch_cycle(CycleKind::Single)
    }

    /// Stop recurring capture
    ///
    /// The timer is cancelled at once; a cycle already in flight completes and
    /// its result is still merged.
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.halt(StopReason::User)?;
        self.inner
            .notifications
            .raise("Attendance session stopped", Severity::Info);
        Ok(())
    }

    /// Empty the roster; results of cycles launched before this are dropped
    pub fn clear(&self) {
        self.inner.store.lock().clear();
        self.inner.no_frame_streak.store(0, Ordering::SeqCst);
        tracing::info!("Roster cleared");
        self.inner
            .notifications
            .raise("Attendance session cleared", Severity::Info);
    }

    /// Operator left the capture console: stop and drop the session
    pub fn detach(&self) {
        if let Err(e) = self.halt(StopReason::Detached) {
            tracing::debug!("Detach while idle: {}", e);
        }
        self.inner.store.lock().reset();
        self.inner.no_frame_streak.store(0, Ordering::SeqCst);
        tracing::info!("Session detached and reset");
    }

    /// Device reported a usable stream
    pub fn on_camera_ready(&self) -> bool {
        self.inner.acquirer.probe().mark_ready()
    }

    /// Device reported a permission denial or error
    pub fn on_camera_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.acquirer.probe().mark_unavailable(reason.clone());
        self.handle_camera_loss(&reason);
    }

    /// Open the frame source and record whether the camera is usable
    pub async fn probe_camera(&self) -> CameraState {
        let probe = self.inner.acquirer.probe().clone();
        let state = probe.probe(self.inner.acquirer.source()).await;
        if let CameraState::Unavailable { reason } = &state {
            self.handle_camera_loss(reason);
        }
        state
    }

    /// Operator-initiated retry after the camera became unavailable
    pub async fn retry_camera(&self) -> CameraState {
        self.inner.acquirer.probe().retry();
        self.probe_camera().await
    }

    /// Wait for the most recently launched cycle to finish
    ///
    /// Returns `None` when no cycle was pending.
    pub async fn settle(&self) -> Option<CycleOutcome> {
        let handle = self.inner.current_cycle.lock().take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("Capture cycle task failed: {}", e);
                None
            }
        }
    }

    fn report(&self, err: CaptureError) -> CaptureError {
        if let Some((message, severity)) = err.notice() {
            self.inner.notifications.raise(message, severity);
        }
        err
    }

    /// Leave Capturing and cancel the timer
    fn halt(&self, reason: StopReason) -> Result<(), CaptureError> {
        {
            let mut store = self.inner.store.lock();
            let mut machine = self.inner.machine.lock();
            machine.process_event(SchedulerEvent::Stop(reason))?;
            // Stopping never needs a subject
            let _ = store.set_running(false);
        }
        self.cancel_ticker();
        tracing::info!("Recurring capture {}", reason.description());
        Ok(())
    }

    fn handle_camera_loss(&self, reason: &str) {
        if self.halt(StopReason::CameraLost).is_err() {
            tracing::debug!("Camera lost while idle: {}", reason);
        }
        self.inner
            .notifications
            .raise(CAMERA_ERROR_MESSAGE, Severity::Error);
    }

    fn spawn_ticker(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let controller = CaptureController { inner };
                if let Err(CaptureError::NotCapturing) = controller.tick() {
                    break;
                }
            }
        });

        if let Some(previous) = self.inner.ticker.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_ticker(&self) {
        if let Some(handle) = self.inner.ticker.lock().take() {
            handle.abort();
            tracing::debug!("Capture timer cancelled");
        }
    }

    fn launch_cycle(&self, kind: CycleKind) -> Result<(), CaptureError> {
        if self.inner.in_flight.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::CycleInFlight);
        }
        let guard = CycleGuard {
            inner: Arc::clone(&self.inner),
        };

        let (epoch, subject_id) = {
            let store = self.inner.store.lock();
            (store.epoch(), store.subject().map(|s| s.id.clone()))
        };
        let Some(subject_id) = subject_id else {
            drop(guard);
            return Err(self.report(CaptureError::MissingSubject));
        };

        tracing::debug!("Launching {} cycle (epoch {})", kind.label(), epoch);
        let handle = tokio::spawn(async move {
            let guard = guard;
            run_cycle(&guard.inner, epoch, &subject_id).await
        });
        *self.inner.current_cycle.lock() = Some(handle);
        Ok(())
    }
}

async fn run_cycle(inner: &Arc<Inner>, epoch: u64, subject_id: &str) -> CycleOutcome {
    let frame = match inner.acquirer.acquire().await {
        Ok(frame) => {
            inner.no_frame_streak.store(0, Ordering::SeqCst);
            frame
        }
        Err(CaptureError::NoFrameAvailable) => {
            let streak = inner.no_frame_streak.fetch_add(1, Ordering::SeqCst) + 1;
            let threshold = inner.settings.no_frame_warning_streak;
            tracing::debug!("No frame available ({} in a row)", streak);
            if threshold > 0 && streak == threshold {
                inner.notifications.raise(NO_FRAME_MESSAGE, Severity::Warning);
            }
            return CycleOutcome::Failed(CaptureError::NoFrameAvailable);
        }
        Err(e) if e.is_fatal() => {
            let controller = CaptureController {
                inner: Arc::clone(inner),
            };
            controller.handle_camera_loss(&e.to_string());
            return CycleOutcome::Failed(e);
        }
        Err(e) => {
            if let Some((message, severity)) = e.notice() {
                inner.notifications.raise(message, severity);
            }
            return CycleOutcome::Failed(e);
        }
    };

    let response = inner.recognizer.recognize(&frame, subject_id).await;
    let current = inner.store.lock().epoch();
    if current != epoch {
        tracing::debug!(
            "Discarding result from epoch {} (current epoch {})",
            epoch,
            current
        );
        return CycleOutcome::Failed(CaptureError::StaleResult {
            launched: epoch,
            current,
        });
    }

    match response {
        Ok(response) => {
            let merged = inner
                .store
                .lock()
                .merge_for_epoch(epoch, &response, Utc::now());
            match merged {
                Ok(added) => {
                    if response.recognized_count > 0 {
                        inner.notifications.raise(
                            format!(
                                "Recognized {} student(s)! ({} new)",
                                response.recognized_count, added
                            ),
                            Severity::Success,
                        );
                    }
                    CycleOutcome::Merged {
                        recognized: response.recognized_count,
                        added,
                    }
                }
                Err(stale) => {
                    tracing::debug!("{}", stale);
                    CycleOutcome::Failed(stale)
                }
            }
        }
        Err(e) => {
            tracing::warn!("Recognition failed: {}", e);
            let err = CaptureError::RecognitionService(e.user_message());
            if let Some((message, severity)) = err.notice() {
                inner.notifications.raise(message, severity);
            }
            CycleOutcome::Failed(err)
        }
    }
}
