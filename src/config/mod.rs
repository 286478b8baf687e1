//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use golfrecs_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Pool size: {}", config.circuits.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CircuitConfig, Config, HarvestConfig, OutputConfig, TorConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
