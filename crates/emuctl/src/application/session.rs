//! Session connection and command channel.
//!
//! A [`Session`] owns the one control channel of a run.  It exists only after
//! the machine has been selected, so no command can reach the monitor before
//! `mach set`.  Commands are fire-and-forget: the protocol has no
//! acknowledgements, so `send` returns as soon as the line is written and
//! callers wait a settle delay for the emulator to act on it.
//!
//! # Connection lifecycle
//!
//! ```text
//!  connect ──► open ─► settle ─► drain banner ─► mach set ─► settle ─► drain
//!     │          │ I/O error on any step: close, back off, try again
//!     ▼          ▼
//!  Session ──► send / read_response / drain ... ──► quit ─► disconnect
//! ```

use std::io;
use std::time::Duration;

use emuctl_core::MonitorCommand;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DriverError, Result};
use crate::infrastructure::network::{Connector, ControlChannel};

/// Connection and channel settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Monitor address, `host:port`.
    pub addr: String,
    /// Machine selected right after connecting.
    pub machine: String,
    /// Connection attempts before giving up.  Zero is treated as one.
    pub connect_retries: u32,
    /// Wait between failed attempts.
    pub connect_backoff: Duration,
    /// Wait after the TCP connect, before draining the banner.
    pub connect_settle: Duration,
    /// Wait after `mach set`, before draining its echo.
    pub select_settle: Duration,
    /// Idle window used by [`Session::drain`].
    pub drain_window: Duration,
    /// Wait between sending `quit` and closing the socket.
    pub quit_settle: Duration,
    /// Upper bound on one response.
    pub max_response_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4567".to_string(),
            machine: "SoC".to_string(),
            connect_retries: 3,
            connect_backoff: Duration::from_secs(2),
            connect_settle: Duration::from_millis(500),
            select_settle: Duration::from_millis(300),
            drain_window: Duration::from_millis(100),
            quit_settle: Duration::from_secs(1),
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Sleeps for `wait` unless `cancel` fires first.
///
/// # Errors
///
/// [`DriverError::Cancelled`] if the token is (or becomes) cancelled.
pub async fn settle_for(cancel: &CancellationToken, wait: Duration) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DriverError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DriverError::Cancelled),
        _ = time::sleep(wait) => Ok(()),
    }
}

/// The instant `timeout` from now.
///
/// A timeout too large to represent is clamped to roughly thirty years out,
/// which no wait in this crate will reach.
pub fn deadline_after(timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// An open, machine-selected connection to the monitor.
pub struct Session {
    channel: Option<Box<dyn ControlChannel>>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.config.addr)
            .field("machine", &self.config.machine)
            .field("connected", &self.channel.is_some())
            .finish()
    }
}

impl Session {
    /// Opens a channel through `connector` and selects the machine, retrying
    /// with a fixed backoff.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Connection`] once every attempt failed, carrying the
    ///   last I/O error.
    /// - [`DriverError::Protocol`] if the machine name cannot be encoded.
    /// - [`DriverError::Cancelled`] if `cancel` fires during a wait.
    pub async fn connect(
        connector: &dyn Connector,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let select_line = MonitorCommand::SelectMachine(config.machine.clone()).to_line()?;
        let attempts = config.connect_retries.max(1);
        let mut last_err = io::Error::new(io::ErrorKind::Other, "no connection attempt made");

        for attempt in 1..=attempts {
            debug!(addr = %config.addr, attempt, attempts, "connecting to monitor");
            match Self::open_and_select(connector, &config, &cancel, &select_line).await {
                Ok(channel) => {
                    info!(addr = %config.addr, machine = %config.machine, "monitor session established");
                    return Ok(Self {
                        channel: Some(channel),
                        config,
                        cancel,
                    });
                }
                Err(DriverError::Io(e)) => {
                    warn!(attempt, attempts, "connection attempt failed: {e}");
                    last_err = e;
                }
                Err(other) => return Err(other),
            }

            if attempt < attempts {
                settle_for(&cancel, config.connect_backoff).await?;
            }
        }

        Err(DriverError::Connection {
            addr: config.addr,
            attempts,
            source: last_err,
        })
    }

    async fn open_and_select(
        connector: &dyn Connector,
        config: &SessionConfig,
        cancel: &CancellationToken,
        select_line: &str,
    ) -> Result<Box<dyn ControlChannel>> {
        let mut channel = connector.open(&config.addr).await?;

        let handshake = async {
            settle_for(cancel, config.connect_settle).await?;
            channel
                .read_until_idle(config.drain_window, config.max_response_bytes)
                .await?;
            channel.write_line(select_line).await?;
            settle_for(cancel, config.select_settle).await?;
            channel
                .read_until_idle(config.drain_window, config.max_response_bytes)
                .await?;
            Ok::<(), DriverError>(())
        }
        .await;

        match handshake {
            Ok(()) => Ok(channel),
            Err(e) => {
                // The partial channel is never reused.
                let _ = channel.close().await;
                Err(e)
            }
        }
    }

    /// Encodes and writes one command.  No acknowledgement is awaited.
    ///
    /// # Errors
    ///
    /// [`DriverError::Protocol`] before anything is written if the command
    /// cannot be encoded; [`DriverError::NotConnected`] after `disconnect`;
    /// [`DriverError::Io`] if the write fails.
    pub async fn send(&mut self, command: &MonitorCommand) -> Result<()> {
        let line = command.to_line()?;
        let channel = self.channel.as_mut().ok_or(DriverError::NotConnected)?;
        debug!(%command, "sending monitor command");
        channel.write_line(&line).await?;
        Ok(())
    }

    /// Accumulates a response until the channel has been quiet for `window`.
    pub async fn read_response(&mut self, window: Duration) -> Result<Vec<u8>> {
        let max = self.config.max_response_bytes;
        let channel = self.channel.as_mut().ok_or(DriverError::NotConnected)?;
        let bytes = channel.read_until_idle(window, max).await?;
        debug!(len = bytes.len(), "read monitor response");
        Ok(bytes)
    }

    /// Discards whatever output is buffered.  Returns the number of bytes
    /// thrown away.
    pub async fn drain(&mut self) -> Result<usize> {
        let window = self.config.drain_window;
        let discarded = self.read_response(window).await?.len();
        if discarded > 0 {
            debug!(discarded, "drained stale monitor output");
        }
        Ok(discarded)
    }

    /// Cancellable wall-clock wait.
    pub async fn settle(&self, wait: Duration) -> Result<()> {
        settle_for(&self.cancel, wait).await
    }

    /// Sleeps until `at`, returning at once if it has already passed.
    pub async fn settle_until(&self, at: Instant) -> Result<()> {
        settle_for(&self.cancel, at.saturating_duration_since(Instant::now())).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Closes the channel.  Safe to call any number of times; close errors
    /// are logged and swallowed.
    pub async fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("error while closing monitor channel: {e}");
            }
            info!("monitor session closed");
        }
    }

    /// Sends `quit`, waits the quit settle delay, then disconnects.  Never
    /// fails and ignores cancellation, so it can run on every exit path.
    pub async fn quit(&mut self) {
        if self.channel.is_none() {
            return;
        }
        if let Err(e) = self.send(&MonitorCommand::Quit).await {
            debug!("could not send quit: {e}");
        }
        time::sleep(self.config.quit_settle).await;
        self.disconnect().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::{mock::FakeMonitor, MockConnector};
    use mockall::Sequence;
    use tokio::time::Instant;

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "refused")
    }

    // ── Connect / retry ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_connect_fails_after_all_attempts_with_backoff_between() {
        // Arrange
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(3)
            .returning(|_| Err(refused()));
        let start = Instant::now();

        // Act
        let result =
            Session::connect(&connector, SessionConfig::default(), CancellationToken::new()).await;

        // Assert: two backoffs, none after the last attempt.
        assert!(matches!(
            result,
            Err(DriverError::Connection { attempts: 3, .. })
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_one_attempt() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|_| Err(refused()));
        let config = SessionConfig {
            connect_retries: 0,
            ..SessionConfig::default()
        };

        let result = Session::connect(&connector, config, CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(DriverError::Connection { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_on_second_attempt() {
        // Arrange
        let monitor = FakeMonitor::new();
        let fake = monitor.clone();
        let mut seq = Sequence::new();
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(refused()));
        connector
            .expect_open()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Box::new(fake.channel()) as Box<dyn ControlChannel>));

        // Act
        let session =
            Session::connect(&connector, SessionConfig::default(), CancellationToken::new())
                .await
                .unwrap();

        // Assert
        assert!(session.is_connected());
        assert_eq!(monitor.sent(), vec!["mach set \"SoC\"".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let mut connector = MockConnector::new();
        connector
            .expect_open()
            .times(1)
            .returning(|_| Err(refused()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Session::connect(&connector, SessionConfig::default(), cancel).await;

        assert!(matches!(result, Err(DriverError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_machine_name_never_connects() {
        let mut connector = MockConnector::new();
        connector.expect_open().never();
        let config = SessionConfig {
            machine: "So\"C".to_string(),
            ..SessionConfig::default()
        };

        let result = Session::connect(&connector, config, CancellationToken::new()).await;

        assert!(matches!(result, Err(DriverError::Protocol(_))));
    }

    // ── Channel ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_machine_selection_precedes_first_command() {
        // Arrange
        let monitor = FakeMonitor::new();
        let mut session = Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        // Act
        session.send(&MonitorCommand::Start).await.unwrap();

        // Assert
        assert_eq!(monitor.sent(), vec!["mach set \"SoC\"", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_disconnect_is_not_connected() {
        let monitor = FakeMonitor::new();
        let mut session = Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        session.disconnect().await;
        session.disconnect().await;
        let result = session.send(&MonitorCommand::Pause).await;

        assert!(matches!(result, Err(DriverError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unencodable_text_is_rejected_before_writing() {
        let monitor = FakeMonitor::new();
        let mut session = Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        monitor.clear_sent();

        let result = session
            .send(&MonitorCommand::InjectLine("two\nlines".to_string()))
            .await;

        assert!(matches!(result, Err(DriverError::Protocol(_))));
        assert!(monitor.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_sends_quit_then_closes() {
        // Arrange
        let monitor = FakeMonitor::new();
        let mut session = Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        // Act
        session.quit().await;
        session.quit().await;

        // Assert
        assert_eq!(monitor.sent().last().map(String::as_str), Some("quit"));
        assert!(monitor.is_closed());
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_for_returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let result = settle_for(&cancel, Duration::from_secs(3600)).await;

        assert!(matches!(result, Err(DriverError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_clamps_unrepresentable_timeouts() {
        // Arrange
        let now = Instant::now();

        // Act
        let deadline = deadline_after(Duration::from_secs(u64::MAX));

        // Assert
        assert!(deadline > now + Duration::from_secs(86_400 * 365));
        assert_eq!(
            deadline_after(Duration::from_secs(30)),
            now + Duration::from_secs(30)
        );
    }
}
