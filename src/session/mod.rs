//! Session pool module
//!
//! This module owns the proxy-bound HTTP sessions and their circuit control:
//! - One `Session` per configured circuit, exclusively owned by one shard
//! - Rate-limited identity rotation
//! - Control-port signalling for the anonymizing daemon

mod control;
mod pool;

pub use control::{CircuitControl, ControlError, NoControl, TorControl};
pub use pool::{ClientSettings, Session, SessionPool};

use thiserror::Error;

/// Errors raised while building or rotating sessions
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid proxy URL: {0}")]
    InvalidProxy(String),

    #[error("No circuit {index} in a pool of {size}")]
    UnknownCircuit { index: usize, size: usize },
}
