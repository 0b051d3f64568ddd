//! Error type shared by the emuctl session, input, capture and provisioning
//! layers.
//!
//! A failed screenshot is deliberately *not* represented here: capture is
//! instrumentation, so the extractor reports it as `Ok(None)` and lets the
//! caller decide whether to continue.

use std::path::PathBuf;
use std::time::Duration;

use emuctl_core::{InputError, ProtocolError};
use thiserror::Error;

use crate::infrastructure::storage::config::ConfigError;

pub type Result<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The monitor could not be reached after every connection attempt.
    #[error("failed to connect to monitor at {addr} after {attempts} attempt(s): {source}")]
    Connection {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on the established control channel.
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command was issued after the session was disconnected.
    #[error("session is not connected")]
    NotConnected,

    /// The command could not be encoded for the monitor.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The key event violates the guest's timing constraints.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A validated screenshot could not be written to disk.
    #[error("could not write screenshot to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait elapsed without its completion signal.
    #[error("step {step} saw no completion signal within {waited:?}")]
    Timeout { step: String, waited: Duration },

    /// The screen hash did not change across a step that should change it.
    #[error("step {step} produced no detectable screen change")]
    NoScreenChange { step: String },

    /// The run was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// The emulator process could not be started or never opened its port.
    #[error("emulator bootstrap failed: {0}")]
    Bootstrap(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
