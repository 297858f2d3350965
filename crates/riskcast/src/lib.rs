//! Command-line front end for `riskcast_core`: file formats, reports and
//! subcommand dispatch.

pub mod cli;
pub mod commands;
mod logging;
pub mod report;
pub mod storage;

pub use logging::init_logging;
