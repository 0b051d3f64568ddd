//! First-boot storage provisioning and application launch.
//!
//! The guest gives no acknowledgement for anything we type, so every step
//! that should redraw the screen is bracketed by a checkpoint: capture a
//! hash, act, wait, capture again.  Equal hashes mean the input was lost or
//! the guest is not on the screen we think it is, and the run stops there
//! with [`DriverError::NoScreenChange`] instead of typing a PIN into the
//! wrong dialog.
//!
//! A checkpoint whose capture fails is skipped with a warning: screenshots
//! are instrumentation, and a flaky display read must not abort a
//! multi-minute run on its own.

use std::time::Duration;

use emuctl_core::{ContentHash, KeyName, ProvisioningState};
use tracing::{info, warn};

use crate::application::screenshot::ScreenshotExtractor;
use crate::application::session::Session;
use crate::application::timed_input::TimedInput;
use crate::error::{DriverError, Result};

/// How the sequencer decides formatting has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCompletion {
    /// Any change of the screen hash.
    ScreenChange,
    /// A screenshot smaller than this many bytes.
    SizeBelow(usize),
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    /// Wait after each `Down` in the format dialog.
    pub dialog_key_settle: Duration,
    /// Wait before and after each prompt's input.
    pub step_settle: Duration,
    pub format_timeout: Duration,
    pub format_poll_interval: Duration,
    pub format_completion: FormatCompletion,
    /// Wait after the unlock PIN, before mounting starts.
    pub unlock_settle: Duration,
    pub mount_wait: Duration,
    /// Checkpoint each input step with a screen hash comparison.
    pub verify_transitions: bool,
    /// Capture attempts per checkpoint screenshot.
    pub checkpoint_retries: u32,
    /// Key that opens the main menu and confirms entries.
    pub confirm_key: KeyName,
    /// Menu entries above "switch application".
    pub preceding_entries: usize,
    pub menu_open_settle: Duration,
    pub menu_step_settle: Duration,
    pub launch_settle: Duration,
    pub app_start_wait: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            dialog_key_settle: Duration::from_millis(1500),
            step_settle: Duration::from_secs(5),
            format_timeout: Duration::from_secs(15 * 60),
            format_poll_interval: Duration::from_secs(60),
            format_completion: FormatCompletion::ScreenChange,
            unlock_settle: Duration::from_secs(10),
            mount_wait: Duration::from_secs(45),
            verify_transitions: true,
            checkpoint_retries: 1,
            confirm_key: KeyName::Home,
            preceding_entries: 1,
            menu_open_settle: Duration::from_secs(3),
            menu_step_settle: Duration::from_secs(1),
            launch_settle: Duration::from_secs(5),
            app_start_wait: Duration::from_secs(10),
        }
    }
}

/// Runs provisioning and menu navigation over a [`Session`].
#[derive(Debug)]
pub struct ProvisioningSequencer {
    input: TimedInput,
    screens: ScreenshotExtractor,
    config: ProvisioningConfig,
    state: ProvisioningState,
}

impl ProvisioningSequencer {
    pub fn new(input: TimedInput, screens: ScreenshotExtractor, config: ProvisioningConfig) -> Self {
        Self {
            input,
            screens,
            config,
            state: ProvisioningState::AwaitingFormatConfirm,
        }
    }

    /// The step currently running, or the last one reached.
    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Formats the device's encrypted store with `pin` and mounts it.
    ///
    /// # Errors
    ///
    /// [`DriverError::NoScreenChange`] or [`DriverError::Timeout`] naming the
    /// failed step; session errors as for [`Session::send`].  No step is
    /// retried; [`Self::state`] keeps the step that failed.
    pub async fn initialize(&mut self, session: &mut Session, pin: &str) -> Result<()> {
        info!("starting storage provisioning");
        self.run_from(session, ProvisioningState::AwaitingFormatConfirm, pin)
            .await
    }

    /// Unlocks and mounts an already formatted store.
    pub async fn unlock(&mut self, session: &mut Session, pin: &str) -> Result<()> {
        info!("unlocking existing storage");
        self.run_from(session, ProvisioningState::Unlocking, pin).await
    }

    async fn run_from(
        &mut self,
        session: &mut Session,
        start: ProvisioningState,
        pin: &str,
    ) -> Result<()> {
        self.state = start;
        while !self.state.is_terminal() {
            info!(step = %self.state, "provisioning step");
            self.run_step(session, self.state, pin).await?;
            self.state = self.state.next();
        }
        info!("storage ready");
        Ok(())
    }

    async fn run_step(
        &self,
        session: &mut Session,
        state: ProvisioningState,
        pin: &str,
    ) -> Result<()> {
        let c = &self.config;
        match state {
            ProvisioningState::AwaitingFormatConfirm => {
                let reference = self.reference(session).await?;
                self.input
                    .tap_then(session, KeyName::Down, c.dialog_key_settle)
                    .await?;
                self.input
                    .tap_then(session, KeyName::Down, c.dialog_key_settle)
                    .await?;
                self.input.inject_line(session, "").await?;
                session.settle(c.step_settle).await?;
                self.verify(session, reference, state.as_str()).await
            }
            ProvisioningState::EnteringPin | ProvisioningState::ConfirmingPin => {
                self.prompt_step(session, state, pin, c.step_settle).await
            }
            ProvisioningState::AwaitingNotification => {
                self.prompt_step(session, state, "", c.step_settle).await
            }
            ProvisioningState::Formatting => self.await_format(session).await,
            ProvisioningState::Unlocking => {
                self.prompt_step(session, state, pin, c.unlock_settle).await
            }
            ProvisioningState::MountWait => session.settle(c.mount_wait).await,
            ProvisioningState::Ready => Ok(()),
        }
    }

    /// Settle, type `line` plus a terminator, settle again, verify.
    async fn prompt_step(
        &self,
        session: &mut Session,
        state: ProvisioningState,
        line: &str,
        after: Duration,
    ) -> Result<()> {
        session.settle(self.config.step_settle).await?;
        let reference = self.reference(session).await?;
        self.input.inject_line(session, line).await?;
        session.settle(after).await?;
        self.verify(session, reference, state.as_str()).await
    }

    async fn await_format(&self, session: &mut Session) -> Result<()> {
        let c = &self.config;
        info!(timeout = ?c.format_timeout, "waiting for formatting to finish");
        let finished = match c.format_completion {
            FormatCompletion::ScreenChange => {
                self.screens
                    .wait_for_change(session, c.format_timeout, c.format_poll_interval)
                    .await?
            }
            FormatCompletion::SizeBelow(threshold) => {
                self.screens
                    .wait_for_size_below(session, threshold, c.format_timeout, c.format_poll_interval)
                    .await?
            }
        };
        if finished {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                step: ProvisioningState::Formatting.as_str().to_string(),
                waited: c.format_timeout,
            })
        }
    }

    /// Opens the main menu, enters "switch application", and launches the
    /// entry `index` rows below the first.
    pub async fn navigate_and_launch(&self, session: &mut Session, index: usize) -> Result<()> {
        let c = &self.config;
        info!(index, "launching application");

        let reference = self.reference(session).await?;
        self.input
            .tap_then(session, c.confirm_key, c.menu_open_settle)
            .await?;
        self.verify(session, reference, "open main menu").await?;

        for _ in 0..c.preceding_entries {
            self.input
                .tap_then(session, KeyName::Down, c.menu_step_settle)
                .await?;
        }
        let reference = self.reference(session).await?;
        self.input
            .tap_then(session, c.confirm_key, c.menu_open_settle)
            .await?;
        self.verify(session, reference, "open application list").await?;

        for _ in 0..index {
            self.input
                .tap_then(session, KeyName::Down, c.menu_step_settle)
                .await?;
        }
        let reference = self.reference(session).await?;
        self.input
            .tap_then(session, c.confirm_key, c.launch_settle)
            .await?;
        self.verify(session, reference, "launch application").await?;

        session.settle(c.app_start_wait).await
    }

    /// Hash of the screen before a step, when checkpoints are enabled.
    async fn reference(&self, session: &mut Session) -> Result<Option<ContentHash>> {
        if !self.config.verify_transitions {
            return Ok(None);
        }
        let hash = self
            .screens
            .capture_hash(session, self.config.checkpoint_retries)
            .await?;
        if hash.is_none() {
            warn!("checkpoint reference capture failed, step will not be verified");
        }
        Ok(hash)
    }

    async fn verify(
        &self,
        session: &mut Session,
        reference: Option<ContentHash>,
        step: &str,
    ) -> Result<()> {
        let Some(before) = reference else {
            return Ok(());
        };
        match self
            .screens
            .capture_hash(session, self.config.checkpoint_retries)
            .await?
        {
            Some(after) if after == before => {
                warn!(step, "screen did not change");
                Err(DriverError::NoScreenChange {
                    step: step.to_string(),
                })
            }
            Some(_) => Ok(()),
            None => {
                warn!(step, "checkpoint capture failed, skipping verification");
                Ok(())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::SessionConfig;
    use crate::infrastructure::network::mock::FakeMonitor;
    use tokio_util::sync::CancellationToken;

    async fn connect(monitor: &FakeMonitor) -> Session {
        let session = Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        monitor.clear_sent();
        session
    }

    fn sequencer(config: ProvisioningConfig) -> ProvisioningSequencer {
        ProvisioningSequencer::new(TimedInput::default(), ScreenshotExtractor::default(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unverified_unlock_types_pin_and_reaches_ready() {
        // Arrange
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;
        let mut seq = sequencer(ProvisioningConfig {
            verify_transitions: false,
            ..ProvisioningConfig::default()
        });

        // Act
        seq.unlock(&mut session, "1234").await.unwrap();

        // Assert
        assert_eq!(
            monitor.keyboard_commands(),
            vec!["sysbus.keyboard InjectLine \"1234\""]
        );
        assert_eq!(seq.state(), ProvisioningState::Ready);
        assert_eq!(monitor.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_screen_fails_first_checkpoint() {
        // Arrange
        let monitor = FakeMonitor::new();
        monitor.freeze_screen();
        let mut session = connect(&monitor).await;
        let mut seq = sequencer(ProvisioningConfig::default());

        // Act
        let result = seq.initialize(&mut session, "a").await;

        // Assert
        let Err(DriverError::NoScreenChange { step }) = result else {
            panic!("expected NoScreenChange, got {result:?}");
        };
        assert_eq!(step, "AwaitingFormatConfirm");
        assert_eq!(seq.state(), ProvisioningState::AwaitingFormatConfirm);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_checkpoint_capture_is_skipped() {
        // Arrange: the reference capture fails, so nothing can be compared.
        let monitor = FakeMonitor::new();
        monitor.freeze_screen();
        monitor.garble_next_captures(1);
        let mut session = connect(&monitor).await;
        let mut seq = sequencer(ProvisioningConfig::default());

        // Act
        let result = seq.unlock(&mut session, "a").await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_formatting_without_signal_times_out() {
        // Arrange: input redraws the screen, but formatting never finishes.
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;
        let mut seq = sequencer(ProvisioningConfig {
            format_timeout: Duration::from_secs(120),
            ..ProvisioningConfig::default()
        });

        // Act
        let result = seq.initialize(&mut session, "a").await;

        // Assert
        let Err(DriverError::Timeout { step, waited }) = result else {
            panic!("expected Timeout, got {result:?}");
        };
        assert_eq!(step, "Formatting");
        assert_eq!(waited, Duration::from_secs(120));
        assert_eq!(seq.state(), ProvisioningState::Formatting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_format_timeout_still_completes() {
        // Arrange: no checkpoints, so capture 1 is the format reference.
        let monitor = FakeMonitor::new();
        monitor.flip_screen_at_capture(2);
        let mut session = connect(&monitor).await;
        let mut seq = sequencer(ProvisioningConfig {
            verify_transitions: false,
            format_timeout: Duration::MAX,
            ..ProvisioningConfig::default()
        });

        // Act
        let result = seq.initialize(&mut session, "a").await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(seq.state(), ProvisioningState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_with_zero_index_still_confirms_three_times() {
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;
        let seq = sequencer(ProvisioningConfig {
            verify_transitions: false,
            ..ProvisioningConfig::default()
        });

        seq.navigate_and_launch(&mut session, 0).await.unwrap();

        let presses: Vec<String> = monitor
            .keyboard_commands()
            .into_iter()
            .filter(|c| c.contains("Press"))
            .collect();
        assert_eq!(
            presses,
            vec![
                "sysbus.keyboard Press Home",
                "sysbus.keyboard Press Down",
                "sysbus.keyboard Press Home",
                "sysbus.keyboard Press Home",
            ]
        );
    }
}
