//! Timed keyboard input.
//!
//! # Why pause the emulator to press a key? (for beginners)
//!
//! The guest decides "tap" versus "hold" by how much *emulated* time passes
//! between key-down and key-up.  If the emulator keeps running while commands
//! travel over the socket, that gap depends on host load and can easily pass
//! the 500 ms debounce threshold, turning a tap into a hold.  So every press
//! freezes the emulated clock, presses, advances the clock by exactly the
//! hold time, releases, and only then lets the clock run again:
//!
//! ```text
//!  Idle ─pause─► Paused ─Press─► Pressed ─RunFor─► Advanced ─Release─► Released ─start─► Resumed
//! ```
//!
//! The settle delays between transitions are wall-clock and give the monitor
//! time to apply each command; they have nothing to do with emulated time.
//!
//! Injections (`InjectLine`, `InjectString`, `InjectKey`) skip all of this and
//! write straight into the keyboard queue.

use std::time::Duration;

use emuctl_core::{InjectionPayload, KeyEvent, KeyName, MonitorCommand};
use tracing::{debug, trace, warn};

use crate::application::session::Session;
use crate::error::Result;

/// Wall-clock settle delays around keyboard input.
#[derive(Debug, Clone)]
pub struct InputTiming {
    /// Emulated hold time of a tap.
    pub hold: Duration,
    /// Wait after a tap completes, for the guest to redraw.
    pub key_settle: Duration,
    pub after_pause: Duration,
    pub after_press: Duration,
    pub after_advance: Duration,
    pub after_release: Duration,
    pub inject_line_settle: Duration,
    pub inject_string_settle: Duration,
    pub inject_key_settle: Duration,
}

impl Default for InputTiming {
    fn default() -> Self {
        Self {
            hold: emuctl_core::input::DEFAULT_HOLD,
            key_settle: emuctl_core::input::DEFAULT_KEY_SETTLE,
            after_pause: Duration::from_millis(200),
            after_press: Duration::from_millis(100),
            after_advance: Duration::from_millis(300),
            after_release: Duration::from_millis(100),
            inject_line_settle: Duration::from_millis(500),
            inject_string_settle: Duration::from_millis(500),
            inject_key_settle: Duration::from_millis(300),
        }
    }
}

/// Where a key press currently is in its pause/press/release sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Idle,
    Paused,
    Pressed,
    Advanced,
    Released,
    Resumed,
}

/// Drives keyboard input through a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct TimedInput {
    timing: InputTiming,
}

impl TimedInput {
    pub fn new(timing: InputTiming) -> Self {
        Self { timing }
    }

    pub fn timing(&self) -> &InputTiming {
        &self.timing
    }

    /// A key event using the configured hold and settle times.
    ///
    /// # Errors
    ///
    /// [`crate::DriverError::Input`] if the configured hold is not a valid
    /// tap.
    pub fn event(&self, key: KeyName) -> Result<KeyEvent> {
        Ok(KeyEvent::new(key)
            .with_hold(self.timing.hold)?
            .with_settle(self.timing.key_settle))
    }

    /// Taps `key` with the configured timing.
    pub async fn tap(&self, session: &mut Session, key: KeyName) -> Result<()> {
        let event = self.event(key)?;
        self.press(session, &event).await
    }

    /// Taps `key`, then waits `settle` instead of the configured key settle.
    pub async fn tap_then(&self, session: &mut Session, key: KeyName, settle: Duration) -> Result<()> {
        let event = self.event(key)?.with_settle(settle);
        self.press(session, &event).await
    }

    /// Runs the full pause → press → advance → release → resume sequence.
    ///
    /// If a step fails after the clock was paused, a best-effort release and
    /// resume are sent so the guest is not left frozen with a key held.
    pub async fn press(&self, session: &mut Session, event: &KeyEvent) -> Result<()> {
        let key = event.key();
        let t = &self.timing;
        let steps = [
            (KeyPhase::Paused, MonitorCommand::Pause, t.after_pause),
            (KeyPhase::Pressed, MonitorCommand::Press(key), t.after_press),
            (KeyPhase::Advanced, MonitorCommand::RunFor(event.hold()), t.after_advance),
            (KeyPhase::Released, MonitorCommand::Release(key), t.after_release),
            (KeyPhase::Resumed, MonitorCommand::Start, event.settle()),
        ];

        debug!(%key, hold = ?event.hold(), "key press");
        let mut phase = KeyPhase::Idle;
        for (next, command, settle) in steps {
            let step = async {
                session.send(&command).await?;
                trace!(%key, from = ?phase, to = ?next, "key transition");
                phase = next;
                session.settle(settle).await
            };
            if let Err(e) = step.await {
                recover(session, key, phase).await;
                return Err(e);
            }
        }
        trace!(%key, from = ?phase, to = ?KeyPhase::Idle, "key transition");
        Ok(())
    }

    pub async fn inject_line(&self, session: &mut Session, text: &str) -> Result<()> {
        self.inject(session, InjectionPayload::Line(text.to_string()), self.timing.inject_line_settle)
            .await
    }

    pub async fn inject_string(&self, session: &mut Session, text: &str) -> Result<()> {
        self.inject(session, InjectionPayload::Text(text.to_string()), self.timing.inject_string_settle)
            .await
    }

    pub async fn inject_key(&self, session: &mut Session, c: char) -> Result<()> {
        self.inject(session, InjectionPayload::Char(c), self.timing.inject_key_settle)
            .await
    }

    async fn inject(&self, session: &mut Session, payload: InjectionPayload, settle: Duration) -> Result<()> {
        session.send(&MonitorCommand::inject(payload)).await?;
        session.settle(settle).await
    }

    /// Types `text` one character at a time.  Lowercase letters, digits,
    /// space and newlines go through timed presses; anything else, uppercase
    /// letters included, is injected by code so its case survives.
    pub async fn type_text(&self, session: &mut Session, text: &str) -> Result<()> {
        for c in text.chars() {
            match KeyName::for_char(c) {
                Some(key) => self.tap(session, key).await?,
                None => self.inject_key(session, c).await?,
            }
        }
        Ok(())
    }
}

/// Best-effort cleanup after a press sequence was interrupted in `phase`.
async fn recover(session: &mut Session, key: KeyName, phase: KeyPhase) {
    let cleanup: &[MonitorCommand] = match phase {
        KeyPhase::Pressed | KeyPhase::Advanced => {
            &[MonitorCommand::Release(key), MonitorCommand::Start]
        }
        KeyPhase::Paused | KeyPhase::Released => &[MonitorCommand::Start],
        KeyPhase::Idle | KeyPhase::Resumed => &[],
    };
    if cleanup.is_empty() {
        return;
    }
    warn!(%key, ?phase, "key press interrupted, resuming emulation");
    for command in cleanup {
        if session.send(command).await.is_err() {
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
