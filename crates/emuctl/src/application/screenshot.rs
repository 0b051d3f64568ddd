//! Screenshot capture and screen-change detection.
//!
//! Capture is instrumentation, not control: a screenshot that cannot be
//! extracted after every retry is reported as `Ok(None)` and logged, never as
//! an error.  Only failures of the session itself (I/O, cancellation) and
//! failures to write a valid image to disk are errors.
//!
//! The content hash of a capture is the driver's only view of the guest's
//! state, so [`ScreenshotExtractor::wait_for_change`] is what turns a blind
//! timer into a verified transition.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emuctl_core::{protocol::extract::Extracted, ContentHash, ImageExtractor, MonitorCommand};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::application::session::{deadline_after, Session};
use crate::error::{DriverError, Result};

#[derive(Debug, Clone)]
pub struct CaptureTiming {
    /// Wait after `TakeScreenshot` for the display to render and encode.
    pub render_settle: Duration,
    /// The response is complete once the channel is quiet this long.
    pub read_idle: Duration,
    /// Wait between failed attempts.
    pub retry_delay: Duration,
    /// Attempts per capture.  Zero is treated as one.
    pub retries: u32,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            render_settle: Duration::from_secs(4),
            read_idle: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            retries: 2,
        }
    }
}

/// What a successful capture wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub path: PathBuf,
    pub len: usize,
    pub hash: ContentHash,
    /// Name of the extraction pattern that matched.
    pub pattern: &'static str,
}

pub struct ScreenshotExtractor {
    extractor: ImageExtractor,
    timing: CaptureTiming,
}

impl std::fmt::Debug for ScreenshotExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotExtractor")
            .field("patterns", &self.extractor.pattern_names())
            .field("timing", &self.timing)
            .finish()
    }
}

impl Default for ScreenshotExtractor {
    fn default() -> Self {
        Self::new(ImageExtractor::default(), CaptureTiming::default())
    }
}

impl ScreenshotExtractor {
    pub fn new(extractor: ImageExtractor, timing: CaptureTiming) -> Self {
        Self { extractor, timing }
    }

    pub fn timing(&self) -> &CaptureTiming {
        &self.timing
    }

    /// Takes one validated screenshot, retrying up to `retries` times.
    ///
    /// Returns `Ok(None)` when every attempt failed to yield a PNG.
    pub async fn grab(&self, session: &mut Session, retries: u32) -> Result<Option<Extracted>> {
        let attempts = retries.max(1);

        for attempt in 1..=attempts {
            session.drain().await?;
            session.send(&MonitorCommand::TakeScreenshot).await?;
            session.settle(self.timing.render_settle).await?;
            let response = session.read_response(self.timing.read_idle).await?;

            match self.extractor.extract(&response) {
                Ok(extracted) => {
                    debug!(
                        pattern = extracted.pattern,
                        len = extracted.screenshot.len(),
                        hash = %extracted.screenshot.hash(),
                        "screenshot extracted"
                    );
                    return Ok(Some(extracted));
                }
                Err(e) => {
                    warn!(attempt, attempts, "screenshot attempt failed: {e}");
                }
            }

            if attempt < attempts {
                session.settle(self.timing.retry_delay).await?;
            }
        }

        warn!("no screenshot after {attempts} attempt(s)");
        Ok(None)
    }

    /// Captures a screenshot and writes it to `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// [`DriverError::Persist`] if the image cannot be written; session
    /// errors as for [`Session::send`].
    pub async fn capture(
        &self,
        session: &mut Session,
        path: &Path,
        retries: u32,
    ) -> Result<Option<CaptureReport>> {
        let Some(extracted) = self.grab(session, retries).await? else {
            return Ok(None);
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| DriverError::Persist {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, extracted.screenshot.bytes())
            .await
            .map_err(|source| DriverError::Persist {
                path: path.to_path_buf(),
                source,
            })?;

        let report = CaptureReport {
            path: path.to_path_buf(),
            len: extracted.screenshot.len(),
            hash: extracted.screenshot.hash(),
            pattern: extracted.pattern,
        };
        info!(path = %report.path.display(), len = report.len, "screenshot saved");
        Ok(Some(report))
    }

    /// Captures a screenshot and returns only its content hash.
    pub async fn capture_hash(
        &self,
        session: &mut Session,
        retries: u32,
    ) -> Result<Option<ContentHash>> {
        Ok(self
            .grab(session, retries)
            .await?
            .map(|e| e.screenshot.hash()))
    }

    /// Polls until the screen hash differs from the one captured on entry.
    ///
    /// Returns `false` if no reference could be captured or `timeout` passed
    /// without a change.  Failed polls count as "no change".  The whole call,
    /// reference capture included, returns within `timeout`: a capture still
    /// in flight at the deadline is abandoned.
    pub async fn wait_for_change(
        &self,
        session: &mut Session,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let deadline = deadline_after(timeout);
        let reference = match time::timeout_at(
            deadline,
            self.capture_hash(session, self.timing.retries),
        )
        .await
        {
            Ok(hash) => hash?,
            Err(_) => None,
        };
        let Some(reference) = reference else {
            warn!("no reference screenshot, cannot detect a change");
            return Ok(false);
        };
        self.poll_until(session, started, deadline, interval, |e| {
            e.screenshot.hash() != reference
        })
        .await
    }

    /// Polls until a screenshot is under half or over one and a half times
    /// `reference_len` bytes.
    pub async fn wait_for_size_change(
        &self,
        session: &mut Session,
        reference_len: usize,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        self.poll_until(session, started, deadline_after(timeout), interval, |e| {
            let len = e.screenshot.len();
            len.saturating_mul(2) < reference_len
                || len.saturating_mul(2) > reference_len.saturating_mul(3)
        })
        .await
    }

    /// Polls until a screenshot is smaller than `threshold` bytes.  A mostly
    /// blank screen compresses far better than a busy one.
    pub async fn wait_for_size_below(
        &self,
        session: &mut Session,
        threshold: usize,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        self.poll_until(session, started, deadline_after(timeout), interval, |e| {
            e.screenshot.len() < threshold
        })
        .await
    }

    /// Starts a capture every `interval` after `started` until `done` accepts
    /// one or `deadline` passes.  Only a capture that completes before the
    /// deadline can end the wait with `true`.
    async fn poll_until<F>(
        &self,
        session: &mut Session,
        started: Instant,
        deadline: Instant,
        interval: Duration,
        mut done: F,
    ) -> Result<bool>
    where
        F: FnMut(&Extracted) -> bool,
    {
        let interval = interval.max(Duration::from_millis(1));
        let mut next_poll = started;
        let mut polls = 0u32;

        loop {
            next_poll = next_poll
                .checked_add(interval)
                .unwrap_or(deadline)
                .max(Instant::now());
            if next_poll >= deadline {
                session.settle_until(deadline).await?;
                debug!(polls, "no change before deadline");
                return Ok(false);
            }
            session.settle_until(next_poll).await?;
            polls += 1;

            match time::timeout_at(deadline, self.grab(session, 1)).await {
                Ok(grabbed) => {
                    if let Some(extracted) = grabbed? {
                        if done(&extracted) {
                            debug!(polls, "screen changed");
                            return Ok(true);
                        }
                    }
                }
                Err(_) => {
                    debug!(polls, "deadline passed during capture");
                    return Ok(false);
                }
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
    use emuctl_core::PNG_SIGNATURE;
    use tokio_util::sync::CancellationToken;

    async fn connect(monitor: &FakeMonitor) -> Session {
        Session::connect(
            &monitor.connector(),
            SessionConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("emuctl-shots-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_writes_png_into_new_directory() {
        // Arrange
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;
        let path = temp_dir().join("a/b/screen.png");

        // Act
        let report = ScreenshotExtractor::default()
            .capture(&mut session, &path, 2)
            .await
            .unwrap()
            .expect("captured");

        // Assert
        let written = std::fs::read(&path).unwrap();
        assert!(written.starts_with(&PNG_SIGNATURE));
        assert_eq!(report.len, written.len());
        assert_eq!(report.hash, ContentHash::of(&written));
        assert_eq!(report.pattern, "inline-marker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_retries_after_garbled_response() {
        let monitor = FakeMonitor::new();
        monitor.garble_next_captures(1);
        let mut session = connect(&monitor).await;

        let hash = ScreenshotExtractor::default()
            .capture_hash(&mut session, 2)
            .await
            .unwrap();

        assert!(hash.is_some());
        assert_eq!(monitor.captures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_returns_none_when_every_attempt_fails() {
        // Arrange
        let monitor = FakeMonitor::new();
        monitor.garble_next_captures(5);
        let mut session = connect(&monitor).await;
        let path = temp_dir().join("never.png");

        // Act
        let report = ScreenshotExtractor::default()
            .capture(&mut session, &path, 3)
            .await
            .unwrap();

        // Assert
        assert!(report.is_none());
        assert!(!path.exists());
        assert_eq!(monitor.captures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_captures_of_unchanged_screen_hash_equal() {
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;
        let shots = ScreenshotExtractor::default();

        let first = shots.capture_hash(&mut session, 1).await.unwrap();
        let second = shots.capture_hash(&mut session, 1).await.unwrap();

        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_size_change_detects_shrink() {
        let monitor = FakeMonitor::new();
        monitor.resize_image_at_capture(3, 1000);
        let mut session = connect(&monitor).await;

        let changed = ScreenshotExtractor::default()
            .wait_for_size_change(
                &mut session,
                4096,
                Duration::from_secs(60),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(monitor.captures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_size_below_times_out_on_large_images() {
        let monitor = FakeMonitor::new();
        let mut session = connect(&monitor).await;

        let done = ScreenshotExtractor::default()
            .wait_for_size_below(
                &mut session,
                100,
                Duration::from_secs(30),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert!(!done);
    }
}
