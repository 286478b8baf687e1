//! Output module for statistics and run reports
//!
//! This module handles:
//! - Loading and printing store statistics (`--stats`)
//! - Printing the report of a finished pipeline run

mod report;
pub mod stats;

pub use report::print_run_report;
pub use stats::{load_statistics, print_statistics, StoreStatistics};
