//! Notification bus
//!
//! Single-slot, replace-not-queue stream of operator notices. A new
//! [`NotificationBus::raise`] while a notice is open replaces it, so
//! high-frequency per-cycle notices never build a backlog. Observers follow
//! the slot through a `tokio::sync::watch` receiver and always see the
//! latest notice only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default auto-hide delay for notices
pub const DEFAULT_AUTO_HIDE_MS: u64 = 6000;

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Short label for console output
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A user-facing notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Monotonic id, unique per bus
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    /// False once dismissed
    pub is_open: bool,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    /// Whether the notice is still on screen at `now`
    pub fn is_visible_at(&self, now: DateTime<Utc>, auto_hide: Option<Duration>) -> bool {
        if !self.is_open {
            return false;
        }
        match auto_hide {
            Some(limit) => {
                let elapsed_ms = now.signed_duration_since(self.raised_at).num_milliseconds();
                elapsed_ms < limit.as_millis() as i64
            }
            None => true,
        }
    }
}

/// Single-slot notification bus
///
/// Cheap to clone; clones share the same slot.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    slot: Arc<watch::Sender<Option<Notification>>>,
    next_id: Arc<AtomicU64>,
    auto_hide: Option<Duration>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(Some(Duration::from_millis(DEFAULT_AUTO_HIDE_MS)))
    }
}

impl NotificationBus {
    /// Create a bus; `auto_hide` of `None` keeps notices open until dismissed
    pub fn new(auto_hide: Option<Duration>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            slot: Arc::new(tx),
            next_id: Arc::new(AtomicU64::new(1)),
            auto_hide,
        }
    }

    /// Raise a notice, replacing whatever is currently shown
    pub fn raise(&self, message: impl Into<String>, severity: Severity) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let notification = Notification {
            id,
            message: message.into(),
            severity,
            is_open: true,
            raised_at: Utc::now(),
        };

        match severity {
            Severity::Error => tracing::warn!("Notice [{}]: {}", severity.label(), notification.message),
            _ => tracing::debug!("Notice [{}]: {}", severity.label(), notification.message),
        }

        self.slot.send_replace(Some(notification));
        id
    }

    /// Close the currently shown notice
    pub fn dismiss(&self) {
        self.slot.send_if_modified(|slot| match slot {
            Some(current) if current.is_open => {
                current.is_open = false;
                true
            }
            _ => false,
        });
    }

    /// Close the notice only if it is still the one identified by `id`
    ///
    /// Returns false when a newer notice has replaced it in the meantime.
    pub fn dismiss_id(&self, id: u64) -> bool {
        self.slot.send_if_modified(|slot| match slot {
            Some(current) if current.id == id && current.is_open => {
                current.is_open = false;
                true
            }
            _ => false,
        })
    }

    /// The last raised notice, open or not
    pub fn current(&self) -> Option<Notification> {
        self.slot.borrow().clone()
    }

    /// The notice that should be on screen right now, if any
    pub fn visible(&self) -> Option<Notification> {
        self.visible_at(Utc::now())
    }

    /// The notice that should be on screen at `now`, if any
    pub fn visible_at(&self, now: DateTime<Utc>) -> Option<Notification> {
        self.current()
            .filter(|n| n.is_visible_at(now, self.auto_hide))
    }

    /// Follow the slot
    pub fn subscribe(&self) -> watch::Receiver<Option<Notification>> {
        self.slot.subscribe()
    }

    /// Configured auto-hide delay
    pub fn auto_hide(&self) -> Option<Duration> {
        self.auto_hide
    }
}
