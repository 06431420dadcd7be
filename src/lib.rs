//! Sendfile Library
//!
//! Single-file transfer over TCP with fixed-width decimal size fields

pub mod cli;
pub mod client;
pub mod framing;
pub mod logger;
pub mod net;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod server;
pub mod size_field;
