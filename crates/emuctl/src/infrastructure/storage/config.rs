//! TOML-based configuration for emuctl.
//!
//! Every wall-clock wait the driver performs is a field here, so a slow host
//! can be tuned without recompiling.  Example:
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [monitor]
//! host = "127.0.0.1"
//! port = 4567
//!
//! [provisioning]
//! pin = "a"
//! format_timeout_secs = 1200
//! format_completion = "size-below"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent; sections marked
//! `#[serde(default)]` fall back to their `Default` impl field by field.  A
//! missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use emuctl_core::KeyName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::provisioning::{FormatCompletion, ProvisioningConfig};
use crate::application::screenshot::CaptureTiming;
use crate::application::session::SessionConfig;
use crate::application::timed_input::InputTiming;
use crate::infrastructure::bootstrap::BootstrapConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    #[serde(default)]
    pub launcher: LauncherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the monitor listens and how patiently to connect to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Machine selected right after connecting.
    #[serde(default = "default_machine")]
    pub machine: String,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    /// Wait after the TCP connect, before draining the banner.
    #[serde(default = "default_connect_settle_ms")]
    pub connect_settle_ms: u64,
    /// Wait after selecting the machine.
    #[serde(default = "default_select_settle_ms")]
    pub select_settle_ms: u64,
    /// Idle window used when discarding stale output.
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
    /// Wait between sending `quit` and closing the socket.
    #[serde(default = "default_quit_settle_ms")]
    pub quit_settle_ms: u64,
    /// Upper bound on a single response.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

/// How to start the emulator for the `boot` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmulatorConfig {
    pub binary: PathBuf,
    /// Directory added to the emulator's script search path.
    pub workspace_root: PathBuf,
    /// Boot script, relative to `workspace_root`.
    pub boot_script: String,
    pub ready_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Wait after `start` for the guest to reach its first screen.
    pub boot_wait_secs: u64,
    /// Time the emulator gets to exit after `quit` before it is killed.
    pub shutdown_grace_secs: u64,
}

/// Settle delays around keyboard input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Emulated hold time of a key press; must stay under 500 ms.
    pub hold_ms: u64,
    pub key_settle_ms: u64,
    pub after_pause_ms: u64,
    pub after_press_ms: u64,
    pub after_advance_ms: u64,
    pub after_release_ms: u64,
    pub inject_line_settle_ms: u64,
    pub inject_string_settle_ms: u64,
    pub inject_key_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Wait after `TakeScreenshot` before reading the response.
    pub render_settle_ms: u64,
    /// The response is complete once the channel is quiet this long.
    pub read_idle_ms: u64,
    pub retry_delay_ms: u64,
    pub retries: u32,
}

/// Completion signal for the formatting step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FormatSignal {
    ScreenChange,
    SizeBelow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningSection {
    pub pin: String,
    /// Wait after each `Down` in the format dialog.
    pub dialog_key_settle_ms: u64,
    /// Wait before and after each prompt's input.
    pub step_settle_ms: u64,
    pub format_timeout_secs: u64,
    pub format_poll_secs: u64,
    pub format_completion: FormatSignal,
    /// Screenshot size under which formatting counts as finished
    /// (`size-below` only).
    pub format_size_threshold: usize,
    pub unlock_settle_ms: u64,
    pub mount_wait_secs: u64,
    pub verify_transitions: bool,
    pub checkpoint_retries: u32,
}

/// Main-menu navigation used by `launch-app`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    pub confirm_key: KeyName,
    /// Menu entries above "switch application".
    pub preceding_entries: usize,
    pub menu_open_settle_ms: u64,
    pub menu_step_settle_ms: u64,
    pub launch_settle_ms: u64,
    pub app_start_wait_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4567
}
fn default_machine() -> String {
    "SoC".to_string()
}
fn default_connect_retries() -> u32 {
    3
}
fn default_connect_backoff_ms() -> u64 {
    2000
}
fn default_connect_settle_ms() -> u64 {
    500
}
fn default_select_settle_ms() -> u64 {
    300
}
fn default_drain_window_ms() -> u64 {
    100
}
fn default_quit_settle_ms() -> u64 {
    1000
}
fn default_max_response_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            machine: default_machine(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff_ms(),
            connect_settle_ms: default_connect_settle_ms(),
            select_settle_ms: default_select_settle_ms(),
            drain_window_ms: default_drain_window_ms(),
            quit_settle_ms: default_quit_settle_ms(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("renode"),
            workspace_root: PathBuf::from("."),
            boot_script: "emulation/xous-release.resc".to_string(),
            ready_timeout_secs: 30,
            poll_interval_ms: 1000,
            probe_timeout_ms: 1000,
            boot_wait_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            hold_ms: 1,
            key_settle_ms: 1000,
            after_pause_ms: 200,
            after_press_ms: 100,
            after_advance_ms: 300,
            after_release_ms: 100,
            inject_line_settle_ms: 500,
            inject_string_settle_ms: 500,
            inject_key_settle_ms: 300,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            render_settle_ms: 4000,
            read_idle_ms: 2000,
            retry_delay_ms: 1000,
            retries: 2,
        }
    }
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            pin: "a".to_string(),
            dialog_key_settle_ms: 1500,
            step_settle_ms: 5000,
            format_timeout_secs: 15 * 60,
            format_poll_secs: 60,
            format_completion: FormatSignal::ScreenChange,
            format_size_threshold: 5000,
            unlock_settle_ms: 10_000,
            mount_wait_secs: 45,
            verify_transitions: true,
            checkpoint_retries: 1,
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            confirm_key: KeyName::Home,
            preceding_entries: 1,
            menu_open_settle_ms: 3000,
            menu_step_settle_ms: 1000,
            launch_settle_ms: 5000,
            app_start_wait_secs: 10,
        }
    }
}

// ── Conversion to runtime settings ────────────────────────────────────────────

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

impl AppConfig {
    /// `host:port` of the monitor.
    pub fn monitor_addr(&self) -> String {
        format!("{}:{}", self.monitor.host, self.monitor.port)
    }

    pub fn session_config(&self) -> SessionConfig {
        let m = &self.monitor;
        SessionConfig {
            addr: self.monitor_addr(),
            machine: m.machine.clone(),
            connect_retries: m.connect_retries,
            connect_backoff: ms(m.connect_backoff_ms),
            connect_settle: ms(m.connect_settle_ms),
            select_settle: ms(m.select_settle_ms),
            drain_window: ms(m.drain_window_ms),
            quit_settle: ms(m.quit_settle_ms),
            max_response_bytes: m.max_response_bytes,
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the hold time would be read by
    /// the guest as a held key, or is zero.
    pub fn input_timing(&self) -> Result<InputTiming, ConfigError> {
        let i = &self.input;
        let hold = ms(i.hold_ms);
        if hold.is_zero() || hold >= emuctl_core::DEBOUNCE_THRESHOLD {
            return Err(ConfigError::Invalid {
                field: "input.hold_ms",
                reason: format!(
                    "must be between 1 and {} ms",
                    emuctl_core::DEBOUNCE_THRESHOLD.as_millis() - 1
                ),
            });
        }
        Ok(InputTiming {
            hold,
            key_settle: ms(i.key_settle_ms),
            after_pause: ms(i.after_pause_ms),
            after_press: ms(i.after_press_ms),
            after_advance: ms(i.after_advance_ms),
            after_release: ms(i.after_release_ms),
            inject_line_settle: ms(i.inject_line_settle_ms),
            inject_string_settle: ms(i.inject_string_settle_ms),
            inject_key_settle: ms(i.inject_key_settle_ms),
        })
    }

    pub fn capture_timing(&self) -> CaptureTiming {
        let c = &self.capture;
        CaptureTiming {
            render_settle: ms(c.render_settle_ms),
            read_idle: ms(c.read_idle_ms),
            retry_delay: ms(c.retry_delay_ms),
            retries: c.retries,
        }
    }

    pub fn provisioning_config(&self) -> ProvisioningConfig {
        let p = &self.provisioning;
        let l = &self.launcher;
        ProvisioningConfig {
            dialog_key_settle: ms(p.dialog_key_settle_ms),
            step_settle: ms(p.step_settle_ms),
            format_timeout: secs(p.format_timeout_secs),
            format_poll_interval: secs(p.format_poll_secs),
            format_completion: match p.format_completion {
                FormatSignal::ScreenChange => FormatCompletion::ScreenChange,
                FormatSignal::SizeBelow => FormatCompletion::SizeBelow(p.format_size_threshold),
            },
            unlock_settle: ms(p.unlock_settle_ms),
            mount_wait: secs(p.mount_wait_secs),
            verify_transitions: p.verify_transitions,
            checkpoint_retries: p.checkpoint_retries,
            confirm_key: l.confirm_key,
            preceding_entries: l.preceding_entries,
            menu_open_settle: ms(l.menu_open_settle_ms),
            menu_step_settle: ms(l.menu_step_settle_ms),
            launch_settle: ms(l.launch_settle_ms),
            app_start_wait: secs(l.app_start_wait_secs),
        }
    }

    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let e = &self.emulator;
        BootstrapConfig {
            binary: e.binary.clone(),
            workspace_root: e.workspace_root.clone(),
            boot_script: e.boot_script.clone(),
            host: self.monitor.host.clone(),
            port: self.monitor.port,
            ready_timeout: secs(e.ready_timeout_secs),
            poll_interval: ms(e.poll_interval_ms),
            probe_timeout: ms(e.probe_timeout_ms),
            shutdown_grace: secs(e.shutdown_grace_secs),
        }
    }

    pub fn boot_wait(&self) -> Duration {
        secs(self.emulator.boot_wait_secs)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
