//! # emuctl-core
//!
//! Shared library for emuctl containing the monitor command vocabulary, the
//! screenshot extraction strategies, key names, and the provisioning state
//! model.
//!
//! It has zero dependencies on sockets, processes, or async runtimes: every
//! type here can be exercised from a plain `#[test]`.
//!
//! # Architecture overview (for beginners)
//!
//! emuctl drives an emulator through its *monitor*: a line-oriented text
//! console reachable over TCP.  The monitor accepts commands such as
//! `sysbus.keyboard Press Down` or `sysbus.memlcd TakeScreenshot` and answers
//! with free-form text.  There is no framing, no request id, and no
//! acknowledgement.
//!
//! This crate (`emuctl-core`) is the pure foundation.  It defines:
//!
//! - **`protocol`** – How commands become bytes on the wire, and how an image
//!   is dug out of an unframed text response.
//!
//! - **`image`** – The PNG signature check and the content hash used to detect
//!   whether the emulated screen changed between two captures.
//!
//! - **`keymap`** – The named scancodes the emulated keyboard understands.
//!
//! - **`input`** – Key events with an emulated hold time that must stay under
//!   the guest's debounce threshold, plus the three injection payloads.
//!
//! - **`provisioning`** – The forward-only state machine of the first-boot
//!   storage initialisation flow.

pub mod image;
pub mod input;
pub mod keymap;
pub mod protocol;
pub mod provisioning;

// Re-export the most-used types at the crate root so callers can write
// `emuctl_core::MonitorCommand` instead of the full module path.
pub use image::{ContentHash, Screenshot, PNG_SIGNATURE};
pub use input::{InjectionPayload, InputError, KeyEvent, DEBOUNCE_THRESHOLD};
pub use keymap::{KeyName, KeyNameError};
pub use protocol::command::{MonitorCommand, ProtocolError};
pub use protocol::extract::{ExtractionError, ExtractionPattern, ImageExtractor};
pub use provisioning::ProvisioningState;
