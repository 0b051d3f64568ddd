//! In-memory fake monitor for tests.
//!
//! Records every line the driver sends and answers the few commands whose
//! responses matter:
//! - `TakeScreenshot` returns a synthetic PNG behind the inline-image marker.
//! - Everything else returns a prompt.
//!
//! The "screen" is a counter.  A key press or an injection bumps it, so two
//! captures taken either side of input hash differently, exactly like a real
//! guest redrawing its display.  Tests can also flip the screen at a chosen
//! capture, garble captures, freeze the screen, or refuse connections.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use emuctl_core::PNG_SIGNATURE;

use super::{ControlChannel, Connector};

/// Default size of the synthetic screenshot, in bytes.
const DEFAULT_IMAGE_LEN: usize = 4096;

#[derive(Debug)]
struct FakeState {
    sent: Vec<String>,
    pending: Vec<u8>,
    screen: u64,
    captures: u64,
    flips_at: Vec<u64>,
    resize_at: Option<(u64, usize)>,
    image_len: usize,
    garbled: u32,
    frozen: bool,
    refuse_connects: u32,
    connect_attempts: u32,
    closed: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            pending: Vec::new(),
            screen: 0,
            captures: 0,
            flips_at: Vec::new(),
            resize_at: None,
            image_len: DEFAULT_IMAGE_LEN,
            garbled: 0,
            frozen: false,
            refuse_connects: 0,
            connect_attempts: 0,
            closed: false,
        }
    }
}

impl FakeState {
    fn respond_to(&mut self, line: &str) {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("sysbus.memlcd"), Some("TakeScreenshot")) => self.take_screenshot(),
            (Some("sysbus.keyboard"), Some(action)) => {
                if action != "Release" && !self.frozen {
                    self.screen += 1;
                }
                self.pending.extend_from_slice(b"(SoC) ");
            }
            (Some("mach"), Some("set")) => self.pending.extend_from_slice(b"\n(SoC) "),
            (Some("quit"), _) => self.closed = true,
            _ => self.pending.extend_from_slice(b"(SoC) "),
        }
    }

    fn take_screenshot(&mut self) {
        self.captures += 1;
        if self.flips_at.contains(&self.captures) {
            self.screen += 1;
        }
        if let Some((at, len)) = self.resize_at {
            if self.captures >= at {
                self.image_len = len;
            }
        }

        if self.garbled > 0 {
            self.garbled -= 1;
            self.pending
                .extend_from_slice(b"sysbus.memlcd: display busy, try again\n(SoC) ");
            return;
        }

        let image = synthetic_png(self.screen, self.image_len);
        let response = format!(
            "\x1b]1337;File=name=c2NyZWVu;inline=1:{}\x07\n(SoC) ",
            STANDARD.encode(image)
        );
        self.pending.extend_from_slice(response.as_bytes());
    }
}

/// A PNG-signed payload whose content is a function of the screen counter.
fn synthetic_png(screen: u64, len: usize) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(&screen.to_be_bytes());
    bytes.resize(len.max(bytes.len()), 0xAB);
    bytes
}

/// Shared handle to one fake monitor.  Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeMonitor {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake monitor state poisoned")
    }

    /// Every line received so far, without the trailing newline.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Only the keyboard commands received so far.
    pub fn keyboard_commands(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|l| l.starts_with("sysbus.keyboard"))
            .collect()
    }

    /// Forgets the recorded lines, keeping the screen state.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Number of screenshots taken so far.
    pub fn captures(&self) -> u64 {
        self.state().captures
    }

    /// Changes the screen just before the `n`-th screenshot (1-based) is taken.
    pub fn flip_screen_at_capture(&self, n: u64) {
        self.state().flips_at.push(n);
    }

    /// From the `n`-th screenshot on, images are `len` bytes long.
    pub fn resize_image_at_capture(&self, n: u64, len: usize) {
        self.state().resize_at = Some((n, len));
    }

    /// The next `n` screenshots return text with no image in it.
    pub fn garble_next_captures(&self, n: u32) {
        self.state().garbled = n;
    }

    /// Input no longer changes the screen.
    pub fn freeze_screen(&self) {
        self.state().frozen = true;
    }

    /// The next `n` connection attempts are refused.
    pub fn refuse_connections(&self, n: u32) {
        self.state().refuse_connects = n;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// True once the driver sent `quit` or closed its channel.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            monitor: self.clone(),
        }
    }

    pub fn channel(&self) -> FakeChannel {
        FakeChannel {
            monitor: self.clone(),
        }
    }
}

/// [`ControlChannel`] end of a [`FakeMonitor`].
pub struct FakeChannel {
    monitor: FakeMonitor,
}

#[async_trait]
impl ControlChannel for FakeChannel {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.monitor.state();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "fake monitor closed"));
        }
        let line = line.trim_end_matches('\n');
        state.sent.push(line.to_string());
        state.respond_to(line);
        Ok(())
    }

    async fn read_until_idle(&mut self, idle: Duration, max_bytes: usize) -> io::Result<Vec<u8>> {
        // Mirror the real channel: an empty read costs one idle window.
        let pending = {
            let mut state = self.monitor.state();
            let take = state.pending.len().min(max_bytes);
            let out: Vec<u8> = state.pending.drain(..take).collect();
            out
        };
        if pending.is_empty() {
            tokio::time::sleep(idle).await;
        }
        Ok(pending)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.monitor.state().closed = true;
        Ok(())
    }
}

/// [`Connector`] that hands out channels to a [`FakeMonitor`].
#[derive(Debug, Clone)]
pub struct FakeConnector {
    monitor: FakeMonitor,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _addr: &str) -> io::Result<Box<dyn ControlChannel>> {
        let mut state = self.monitor.state();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "fake monitor refused connection",
            ));
        }
        state.closed = false;
        state.pending.extend_from_slice(b"Monitor ready\n(monitor) ");
        drop(state);
        Ok(Box::new(self.monitor.channel()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
