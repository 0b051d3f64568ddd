//! Keyboard input descriptions: timed key events and injection payloads.
//!
//! # Why does a key press need a hold time? (for beginners)
//!
//! The guest OS measures how long a key is held on its *own* clock.  Inside
//! the emulator that clock advances much faster than real time while the guest
//! is idle, so an innocent "press, wait 100 ms, release" can look like a
//! multi-second hold to the guest.  A hold longer than the debounce threshold
//! turns a tap into the key's "hold" variant, or drops it entirely for keys
//! that have none (arrows, the menu key).
//!
//! emuctl therefore expresses the hold in *emulated* time: the emulator is
//! paused, the key pressed, the emulated clock stepped forward by exactly the
//! hold duration, the key released, and the emulator resumed.  The monitor
//! gives no feedback if the hold was too long, so [`KeyEvent`] refuses such a
//! value up front.

use std::time::Duration;

use thiserror::Error;

use crate::keymap::KeyName;

/// Minimum hold the guest keyboard service interprets as a "hold" rather than
/// a tap.  Every [`KeyEvent`] hold must stay strictly below this.
pub const DEBOUNCE_THRESHOLD: Duration = Duration::from_millis(500);

/// Default emulated hold time of a key tap.
pub const DEFAULT_HOLD: Duration = Duration::from_millis(1);

/// Default wall-clock delay after a key tap before the next command.
pub const DEFAULT_KEY_SETTLE: Duration = Duration::from_secs(1);

/// Errors raised while describing keyboard input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The hold would reach the debounce threshold and be misread by the guest.
    #[error("hold of {hold:?} is not below the {threshold:?} debounce threshold")]
    HoldTooLong { hold: Duration, threshold: Duration },
    /// A zero hold delivers press and release at the same emulated instant.
    #[error("hold duration must be at least one millisecond")]
    HoldTooShort,
    /// The emulated clock is stepped in whole milliseconds.
    #[error("hold of {0:?} is not a whole number of milliseconds")]
    HoldNotWholeMillis(Duration),
}

/// One timed key tap: which key, for how long (emulated), and how long to let
/// the guest settle afterwards (wall-clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    key: KeyName,
    hold: Duration,
    settle: Duration,
}

impl KeyEvent {
    /// A tap of `key` with the default 1 ms hold and 1 s settle.
    pub fn new(key: KeyName) -> Self {
        Self {
            key,
            hold: DEFAULT_HOLD,
            settle: DEFAULT_KEY_SETTLE,
        }
    }

    /// Sets the emulated hold time.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::HoldTooLong`] when `hold` is not strictly below
    /// [`DEBOUNCE_THRESHOLD`], and [`InputError::HoldTooShort`] when it is
    /// under one millisecond.  The emulated clock is stepped in milliseconds,
    /// so a hold with a sub-millisecond remainder is
    /// [`InputError::HoldNotWholeMillis`].
    pub fn with_hold(mut self, hold: Duration) -> Result<Self, InputError> {
        if hold >= DEBOUNCE_THRESHOLD {
            return Err(InputError::HoldTooLong {
                hold,
                threshold: DEBOUNCE_THRESHOLD,
            });
        }
        if hold < Duration::from_millis(1) {
            return Err(InputError::HoldTooShort);
        }
        if hold.subsec_nanos() % 1_000_000 != 0 {
            return Err(InputError::HoldNotWholeMillis(hold));
        }
        self.hold = hold;
        Ok(self)
    }

    /// Sets the wall-clock settle delay that follows the release.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn key(&self) -> KeyName {
        self.key
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }
}

/// Input written straight into the emulated keyboard queue, bypassing the
/// timed press/release sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionPayload {
    /// Text followed by a carriage return.  The guest reads the terminator as
    /// submit, confirm, or "press any key", depending on the screen.
    Line(String),
    /// Text with no terminator.
    Text(String),
    /// A single character, sent by its code.
    Char(char),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_key_event_uses_one_millisecond_hold() {
        let event = KeyEvent::new(KeyName::Down);
        assert_eq!(event.hold(), Duration::from_millis(1));
        assert_eq!(event.settle(), Duration::from_secs(1));
        assert_eq!(event.key(), KeyName::Down);
    }

    #[test]
    fn test_with_hold_accepts_value_just_below_threshold() {
        // Arrange
        let hold = DEBOUNCE_THRESHOLD - Duration::from_millis(1);

        // Act
        let event = KeyEvent::new(KeyName::A).with_hold(hold).unwrap();

        // Assert
        assert_eq!(event.hold(), hold);
    }

    #[test]
    fn test_with_hold_rejects_threshold_itself() {
        let result = KeyEvent::new(KeyName::A).with_hold(DEBOUNCE_THRESHOLD);
        assert_eq!(
            result,
            Err(InputError::HoldTooLong {
                hold: DEBOUNCE_THRESHOLD,
                threshold: DEBOUNCE_THRESHOLD,
            })
        );
    }

    #[test]
    fn test_with_hold_rejects_zero() {
        let result = KeyEvent::new(KeyName::A).with_hold(Duration::ZERO);
        assert_eq!(result, Err(InputError::HoldTooShort));
    }

    #[test]
    fn test_with_hold_rejects_fractional_milliseconds() {
        let hold = Duration::from_micros(1_500);

        let result = KeyEvent::new(KeyName::A).with_hold(hold);

        assert_eq!(result, Err(InputError::HoldNotWholeMillis(hold)));
    }

    #[test]
    fn test_with_settle_overrides_default() {
        let event = KeyEvent::new(KeyName::Home).with_settle(Duration::from_secs(3));
        assert_eq!(event.settle(), Duration::from_secs(3));
    }
}
