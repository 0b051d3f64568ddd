//! Monitor protocol: command encoding and response image extraction.

pub mod command;
pub mod extract;
