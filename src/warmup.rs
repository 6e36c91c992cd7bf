use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// "First warmup done" state.
///
/// Lifecycle:
/// - `Pending` at process start
/// - set to `Completed` exactly once, by the first successful
///   market enrichment
/// - read-only afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupState {
    Pending,
    Completed { at: DateTime<Utc> },
}

/// Single-writer flag holding a `WarmupState`.
///
/// The mutex makes the transition atomic: when several enrichment
/// passes finish concurrently only one caller sees
/// `mark_completed() == Some(_)` and sends the notification.
#[derive(Debug)]
pub struct WarmupFlag {
    state: Mutex<WarmupState>,
}

impl Default for WarmupFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmupFlag {
    pub const fn new() -> Self {
        Self { state: Mutex::new(WarmupState::Pending) }
    }

    /// Marks the warmup as completed now.
    ///
    /// Returns the completion time only for the call performing the
    /// transition.
    pub fn mark_completed(&self) -> Option<DateTime<Utc>> {
        let at = Utc::now();
        self.transition(at).then_some(at)
    }

    pub fn is_completed(&self) -> bool {
        !matches!(self.state(), WarmupState::Pending)
    }

    pub fn state(&self) -> WarmupState {
        // A poisoned lock still holds a valid state value.
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            WarmupState::Pending => {
                *state = WarmupState::Completed { at };
                true
            }
            WarmupState::Completed { .. } => false,
        }
    }
}

/// Process-wide warmup flag.
pub static WARMUP: WarmupFlag = WarmupFlag::new();
