//! Application layer: the operations emuctl performs against a monitor.
//!
//! Dependency order, bottom to top:
//!
//! - `session`      – connection, machine selection, raw command channel.
//! - `timed_input`  – key presses synchronised with the emulated clock, and
//!   keyboard-queue injections.
//! - `screenshot`   – framebuffer capture, validation, change detection.
//! - `provisioning` – the first-boot storage flow and menu navigation, built
//!   from the two layers above.

pub mod provisioning;
pub mod screenshot;
pub mod session;
pub mod timed_input;
