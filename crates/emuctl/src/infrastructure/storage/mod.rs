//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file named on the
//! command line, falls back to defaults when it does not exist yet, and turns
//! the on-disk schema into the plain runtime structs the application layer
//! takes as constructor arguments.

pub mod config;
