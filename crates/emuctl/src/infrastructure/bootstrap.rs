//! Emulator process bootstrap.
//!
//! Starts the emulator headless with its monitor on a known port and waits
//! until that port accepts TCP connections.  This module knows nothing about
//! the monitor protocol: its only product is a reachable address.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::{
    net::TcpStream,
    process::{Child, Command},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::session::{deadline_after, settle_for};
use crate::error::{DriverError, Result};

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Emulator executable.
    pub binary: PathBuf,
    /// Added to the emulator's script search path.
    pub workspace_root: PathBuf,
    /// Boot script, relative to `workspace_root`.
    pub boot_script: String,
    pub host: String,
    pub port: u16,
    /// Give up (and kill the child) if the port is still closed after this.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on one connectability probe.
    pub probe_timeout: Duration,
    /// How long `shutdown` waits for the emulator to exit on its own (after
    /// the monitor's `quit`) before killing it.
    pub shutdown_grace: Duration,
}

impl BootstrapConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Command-line arguments passed to the emulator binary.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--disable-xwt".to_string(),
            "-P".to_string(),
            self.port.to_string(),
            "-e".to_string(),
            format!(
                "path add @{}; i @{}",
                self.workspace_root.display(),
                self.boot_script
            ),
        ]
    }
}

/// Returns true if `addr` accepts a TCP connection within `probe_timeout`.
pub async fn probe_port(addr: &str, probe_timeout: Duration) -> bool {
    matches!(
        time::timeout(probe_timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// A running emulator owned by this run.  Dropping it kills the child.
#[derive(Debug)]
pub struct EmulatorProcess {
    child: Child,
    addr: String,
    shutdown_grace: Duration,
}

impl EmulatorProcess {
    /// Spawns the emulator and waits for its monitor port to open.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Bootstrap`] if the binary cannot be spawned, exits
    ///   early, or the port stays closed past `ready_timeout`.  The child is
    ///   killed before returning.
    /// - [`DriverError::Cancelled`] if `cancel` fires while waiting.
    pub async fn launch(config: &BootstrapConfig, cancel: &CancellationToken) -> Result<Self> {
        let args = config.args();
        info!(binary = %config.binary.display(), port = config.port, "launching emulator");
        debug!("emulator args: {args:?}");

        let child = Command::new(&config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Bootstrap(format!(
                    "could not start {}: {e}",
                    config.binary.display()
                ))
            })?;

        let mut process = Self {
            child,
            addr: config.addr(),
            shutdown_grace: config.shutdown_grace,
        };

        match process.wait_until_ready(config, cancel).await {
            Ok(()) => {
                info!(addr = %process.addr, "emulator monitor is accepting connections");
                Ok(process)
            }
            Err(e) => {
                process.kill().await;
                Err(e)
            }
        }
    }

    async fn wait_until_ready(
        &mut self,
        config: &BootstrapConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = deadline_after(config.ready_timeout);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if probe_port(&self.addr, config.probe_timeout).await {
                return Ok(());
            }
            if let Some(status) = self.child.try_wait()? {
                return Err(exited_early(status));
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Bootstrap(format!(
                    "monitor port {} did not open within {:?}",
                    self.addr, config.ready_timeout
                )));
            }
            debug!(attempt, "monitor port not open yet");
            settle_for(cancel, config.poll_interval).await?;
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// OS process id, if the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Gives the emulator `shutdown_grace` to exit by itself, then kills it.
    /// Returns its exit status once reaped.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        info!(grace = ?self.shutdown_grace, "stopping emulator");
        match time::timeout(self.shutdown_grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "emulator exited");
                return Some(status);
            }
            Ok(Err(e)) => warn!("could not wait for emulator process: {e}"),
            Err(_) => debug!("emulator still running after grace period"),
        }
        self.kill().await;
        self.child.try_wait().ok().flatten()
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("could not kill emulator process: {e}");
        }
    }
}

fn exited_early(status: ExitStatus) -> DriverError {
    DriverError::Bootstrap(format!(
        "emulator exited with {status} before opening its monitor port"
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
