//! OP25 to DVMProject FNE voice traffic gateway
//!
//! Receives decoded P25 voice frames from an off-board OP25 receiver over a
//! local UDP channel and delivers them to a DVMProject FNE as an
//! authenticated repeater peer: RTP-framed LDU1/LDU2 voice with grant-demand
//! and terminating TDUs at call boundaries.

pub mod app;
pub mod call;
pub mod config;
pub mod error;
pub mod fne;
pub mod ingress;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
