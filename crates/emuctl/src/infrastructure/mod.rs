//! Infrastructure layer: everything that touches sockets, processes or files.
//!
//! - `network`   – control channel to the emulator monitor (TCP + test fake).
//! - `bootstrap` – launching the emulator and waiting for its monitor port.
//! - `storage`   – TOML configuration file.

pub mod bootstrap;
pub mod network;
pub mod storage;
