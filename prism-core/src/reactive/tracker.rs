//! Dependency Tracker
//!
//! The tracker records which observers are read during one evaluation so
//! callers can auto-discover dependencies instead of declaring them. Tracked
//! read points (state values, group outputs, collection lookups) report
//! themselves to the tracker; the tracker only listens while a session is
//! armed.
//!
//! # Session Protocol
//!
//! 1. `track()` arms a single recording session.
//! 2. Every tracked read appends its observer to the session's found-set.
//! 3. `drain()` returns the accumulated set and disarms the session.
//!
//! # Single-Session Limitation
//!
//! Only one session can be active at a time. Arming while a session is
//! already armed corrupts the outer session: the tracker warns and resets.
//! Nested tracked evaluations (a computed reading another computed
//! mid-evaluation) are unsupported.

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::warn;

use super::observer::ObserverId;

/// A one-shot recorder of observer reads.
pub struct DependencyTracker {
    session: Mutex<Option<IndexSet<ObserverId>>>,
}

impl DependencyTracker {
    /// Create a disarmed tracker.
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Arm a recording session.
    ///
    /// Arming while already armed resets the in-flight session (nested
    /// sessions are unsupported).
    pub fn track(&self) {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!("tracking session armed while another is active; resetting the outer session");
        }
        *session = Some(IndexSet::new());
    }

    /// Whether a session is currently armed.
    pub fn is_tracking(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Report an observer read. Ignored unless a session is armed.
    pub fn tracked(&self, observer: ObserverId) {
        if let Some(session) = self.session.lock().as_mut() {
            session.insert(observer);
        }
    }

    /// Return the accumulated found-set and disarm the session.
    ///
    /// Draining a disarmed tracker returns an empty set.
    pub fn drain(&self) -> IndexSet<ObserverId> {
        self.session.lock().take().unwrap_or_default()
    }
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
