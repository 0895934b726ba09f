//! Sysgraph command-line front end
//!
//! - `cli`: clap argument definitions
//! - `config`: layered `SysgraphConfig`
//! - `commands`: `diagnose`, `rules` and `check-snapshot`
//! - `report`: text and JSON rendering
//! - `logging`: tracing subscriber setup

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod report;

pub use cli::{Cli, Command};
pub use config::{ConfigError, SysgraphConfig};
pub use report::ReportFormat;
