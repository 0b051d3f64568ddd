//! emuctl command-line entry point.
//!
//! Loads the configuration file, applies command-line overrides, sets up
//! logging and Ctrl-C cancellation, then runs exactly one operation against
//! the emulator monitor.  The session is always closed with `quit`, whatever
//! the outcome.
//!
//! # Usage
//!
//! ```text
//! emuctl [--config <PATH>] [--host <HOST>] [--port <PORT>] <COMMAND>
//!
//! Commands:
//!   screenshot <PATH>      Save a screenshot
//!   hash                   Print the current screen hash
//!   wait-change            Block until the screen changes
//!   press-key <KEY>        Tap one key (Down, Home, A, Number1, ...)
//!   inject-line <TEXT>     Type TEXT followed by Enter
//!   inject-string <TEXT>   Type TEXT with no terminator
//!   inject-key <CHAR>      Push a single character code
//!   type <TEXT>            Type TEXT key by key
//!   init-storage           Run first-boot storage provisioning
//!   unlock                 Unlock an already formatted store
//!   launch-app <INDEX>     Open the INDEX-th entry of the app switcher
//!   boot                   Start the emulator, then optionally provision
//!   init-config            Write the effective configuration to --config
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable        | Description                      |
//! |-----------------|----------------------------------|
//! | `EMUCTL_CONFIG` | Configuration file path          |
//! | `EMUCTL_HOST`   | Monitor host                     |
//! | `EMUCTL_PORT`   | Monitor port                     |
//! | `RUST_LOG`      | Overrides `general.log_level`    |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emuctl::infrastructure::bootstrap::EmulatorProcess;
use emuctl::infrastructure::network::TcpConnector;
use emuctl::infrastructure::storage::config::{load_config, save_config, AppConfig};
use emuctl::{ProvisioningSequencer, ScreenshotExtractor, Session, TimedInput};
use emuctl_core::{ImageExtractor, KeyName, MonitorCommand};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Drive an emulated device through its emulator's monitor port.
#[derive(Debug, Parser)]
#[command(name = "emuctl", version)]
struct Cli {
    /// TOML configuration file.  Missing means all defaults.
    #[arg(long, default_value = "emuctl.toml", env = "EMUCTL_CONFIG")]
    config: PathBuf,

    /// Monitor host, overriding `monitor.host`.
    #[arg(long, env = "EMUCTL_HOST")]
    host: Option<String>,

    /// Monitor port, overriding `monitor.port`.
    #[arg(long, env = "EMUCTL_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save a screenshot of the emulated display.
    Screenshot {
        path: PathBuf,
        /// Capture attempts; defaults to `capture.retries`.
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Print the SHA-256 of the current screen.
    Hash,
    /// Wait until the screen differs from its current content.
    WaitChange {
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
    /// Tap one key.
    PressKey {
        key: KeyName,
        /// Emulated hold time; must stay under 500 ms.
        #[arg(long)]
        hold_ms: Option<u64>,
    },
    InjectLine { text: String },
    InjectString { text: String },
    InjectKey { ch: char },
    /// Type text key by key through timed presses.
    Type { text: String },
    /// Format and mount the encrypted store on a blank device.
    InitStorage {
        /// Defaults to `provisioning.pin`.
        #[arg(long)]
        pin: Option<String>,
    },
    /// Unlock and mount an already formatted store.
    Unlock {
        #[arg(long)]
        pin: Option<String>,
    },
    /// Launch the INDEX-th application of the app switcher (0-based).
    LaunchApp { index: usize },
    /// Start the emulator and wait for its monitor.
    Boot(BootArgs),
    /// Write the effective configuration (defaults plus overrides) to the
    /// `--config` path, as a starting point for editing.
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
struct BootArgs {
    /// Provision storage after boot.
    #[arg(long, conflicts_with = "unlock")]
    init: bool,
    /// Unlock existing storage after boot.
    #[arg(long)]
    unlock: bool,
    /// Launch this application after storage is ready.
    #[arg(long)]
    app: Option<usize>,
    /// Save a final screenshot here.
    #[arg(long)]
    screenshot: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file and applies the host/port overrides.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("could not load config from {}", self.config.display()))?;
        if let Some(host) = &self.host {
            config.monitor.host = host.clone();
        }
        if let Some(port) = self.port {
            config.monitor.port = port;
        }
        Ok(config)
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct Driver {
    input: TimedInput,
    screens: ScreenshotExtractor,
    config: AppConfig,
}

impl Driver {
    fn new(config: AppConfig) -> anyhow::Result<Self> {
        let input = TimedInput::new(config.input_timing()?);
        Ok(Self {
            input,
            screens: screen_extractor(&config),
            config,
        })
    }

    fn sequencer(&self) -> ProvisioningSequencer {
        ProvisioningSequencer::new(
            self.input.clone(),
            screen_extractor(&self.config),
            self.config.provisioning_config(),
        )
    }

    fn pin(&self, pin: Option<String>) -> String {
        pin.unwrap_or_else(|| self.config.provisioning.pin.clone())
    }

    async fn run(&self, session: &mut Session, command: Command) -> anyhow::Result<()> {
        let retries = self.screens.timing().retries;
        match command {
            Command::Screenshot { path, retries: r } => {
                let Some(report) = self
                    .screens
                    .capture(session, &path, r.unwrap_or(retries))
                    .await?
                else {
                    bail!("no screenshot could be extracted from the monitor response");
                };
                println!("{} {} bytes sha256={}", report.path.display(), report.len, report.hash);
            }
            Command::Hash => match self.screens.capture_hash(session, retries).await? {
                Some(hash) => println!("{hash}"),
                None => bail!("no screenshot could be extracted from the monitor response"),
            },
            Command::WaitChange {
                timeout_secs,
                interval_secs,
            } => {
                let changed = self
                    .screens
                    .wait_for_change(
                        session,
                        Duration::from_secs(timeout_secs),
                        Duration::from_secs(interval_secs),
                    )
                    .await?;
                if !changed {
                    bail!("screen did not change within {timeout_secs} s");
                }
                println!("changed");
            }
            Command::PressKey { key, hold_ms } => {
                let mut event = self.input.event(key)?;
                if let Some(ms) = hold_ms {
                    event = event.with_hold(Duration::from_millis(ms))?;
                }
                self.input.press(session, &event).await?;
            }
            Command::InjectLine { text } => self.input.inject_line(session, &text).await?,
            Command::InjectString { text } => self.input.inject_string(session, &text).await?,
            Command::InjectKey { ch } => self.input.inject_key(session, ch).await?,
            Command::Type { text } => self.input.type_text(session, &text).await?,
            Command::InitStorage { pin } => {
                let pin = self.pin(pin);
                self.sequencer().initialize(session, &pin).await?;
            }
            Command::Unlock { pin } => {
                let pin = self.pin(pin);
                self.sequencer().unlock(session, &pin).await?;
            }
            Command::LaunchApp { index } => {
                self.sequencer().navigate_and_launch(session, index).await?;
            }
            Command::Boot(args) => {
                session.send(&MonitorCommand::Start).await?;
                let boot_wait = self.config.boot_wait();
                info!(?boot_wait, "waiting for the guest to boot");
                session.settle(boot_wait).await?;

                let pin = self.config.provisioning.pin.clone();
                if args.init {
                    self.sequencer().initialize(session, &pin).await?;
                } else if args.unlock {
                    self.sequencer().unlock(session, &pin).await?;
                }
                if let Some(index) = args.app {
                    self.sequencer().navigate_and_launch(session, index).await?;
                }
                if let Some(path) = args.screenshot {
                    if self.screens.capture(session, &path, retries).await?.is_none() {
                        warn!("final screenshot could not be captured");
                    }
                }
            }
            Command::InitConfig { .. } => bail!("init-config does not talk to the monitor"),
        }
        Ok(())
    }
}

fn screen_extractor(config: &AppConfig) -> ScreenshotExtractor {
    ScreenshotExtractor::new(ImageExtractor::default(), config.capture_timing())
}

/// Writes `config` to `path`, refusing to replace an existing file unless
/// `force` is set.
fn init_config(path: &Path, config: &AppConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    save_config(path, config)
        .with_context(|| format!("could not write config to {}", path.display()))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let command = cli.command;
    if let Command::InitConfig { force } = command {
        init_config(&cli.config, &config, force)?;
        info!(path = %cli.config.display(), "configuration written");
        return Ok(());
    }

    let emulator = match &command {
        Command::Boot(_) => Some(
            EmulatorProcess::launch(&config.bootstrap_config(), &cancel)
                .await
                .context("could not start the emulator")?,
        ),
        _ => None,
    };

    let driver = Driver::new(config)?;
    let outcome = async {
        let mut session = Session::connect(
            &TcpConnector::default(),
            driver.config.session_config(),
            cancel.clone(),
        )
        .await
        .context("could not reach the emulator monitor")?;

        let result = driver.run(&mut session, command).await;
        session.quit().await;
        result
    }
    .await;

    if let Some(emulator) = emulator {
        emulator.shutdown().await;
    }
    outcome
}

// ── Tests ─────────────────────────────────────────────────────────────────────
