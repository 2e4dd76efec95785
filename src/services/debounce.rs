//! Debounce / confidence-window primitives
//!
//! Telemetry is noisy; a single favorable sample must not trigger an event.
//! These counters implement streaming hysteresis without buffering samples:
//! a matching observation extends the current streak, a contradicting one
//! resets it, an absent one changes nothing. Confirmation happens exactly on
//! the transition where the streak reaches the configured window, once per
//! unbroken streak.
//!
//! All three variants serialize as part of the cached handler state.

use serde::{Deserialize, Serialize};

/// Boolean streak counter: fires once when `window` consecutive matching
/// observations arrive, then stays quiet until the streak breaks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceCounter {
    count: u32,
    confirmed: bool,
}

impl ConfidenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observation. `None` is "no observation" and leaves the
    /// counter untouched. Returns true exactly on the transition into
    /// confirmed.
    pub fn observe(&mut self, observation: Option<bool>, window: u32) -> bool {
        match observation {
            None => false,
            Some(true) => {
                self.count = self.count.saturating_add(1);
                if !self.confirmed && self.count >= window {
                    self.confirmed = true;
                    return true;
                }
                false
            }
            Some(false) => {
                self.count = 0;
                self.confirmed = false;
                false
            }
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Reset counter and confirmation so a fresh streak is required.
    pub fn clear(&mut self) {
        self.count = 0;
        self.confirmed = false;
    }
}

/// Boolean streak that confirms either polarity: reports `Some(value)` once
/// `window` consecutive observations agreed on `value`, `None` while the
/// signal is still ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStreak {
    value: Option<bool>,
    count: u32,
}

impl PresenceStreak {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, observation: Option<bool>) {
        let Some(observation) = observation else { return };
        if self.value == Some(observation) {
            self.count = self.count.saturating_add(1);
        } else {
            self.value = Some(observation);
            self.count = 1;
        }
    }

    pub fn confirmed(&self, window: u32) -> Option<bool> {
        if self.count >= window {
            self.value
        } else {
            None
        }
    }
}

/// Categorical streak counter for surface types. Observing a value advances
/// that value's streak and implicitly resets every other value to zero;
/// comparison is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceStreak {
    value: Option<String>,
    count: u32,
    confirmed: bool,
}

impl SurfaceStreak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly when this value's streak reaches the window for
    /// the first time.
    pub fn observe(&mut self, surface: &str, window: u32) -> bool {
        let surface = surface.to_lowercase();
        if self.value.as_deref() == Some(surface.as_str()) {
            self.count = self.count.saturating_add(1);
        } else {
            self.value = Some(surface);
            self.count = 1;
            self.confirmed = false;
        }

        if !self.confirmed && self.count >= window {
            self.confirmed = true;
            return true;
        }
        false
    }

    pub fn current(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
