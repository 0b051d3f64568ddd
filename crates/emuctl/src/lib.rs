//! # emuctl
//!
//! Drives an emulated embedded device through its emulator's monitor port:
//! timed keyboard input, framebuffer screenshots, and the multi-minute
//! first-boot storage provisioning flow.
//!
//! # Layers
//!
//! - **`application`** – session, timed input, screenshot capture and the
//!   provisioning sequencer.  Talks to the monitor only through the
//!   `Connector` / `ControlChannel` traits.
//! - **`infrastructure`** – TCP channel, in-memory fake monitor, emulator
//!   process bootstrap, and the TOML configuration file.
//! - **`error`** – [`DriverError`], shared by every layer above.
//!
//! Everything a run needs arrives through constructor arguments; there is no
//! global state.

pub mod application;
pub mod error;
pub mod infrastructure;

pub use application::provisioning::{FormatCompletion, ProvisioningConfig, ProvisioningSequencer};
pub use application::screenshot::{CaptureReport, CaptureTiming, ScreenshotExtractor};
pub use application::session::{Session, SessionConfig};
pub use application::timed_input::{InputTiming, TimedInput};
pub use error::DriverError;
