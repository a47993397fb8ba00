//! # nsk CLI
//!
//! Experiment files, network construction and run summaries behind the
//! `nsk` binary.

pub mod commands;
pub mod config;
pub mod error;
pub mod network;

pub use commands::NskCli;
pub use config::ExperimentConfig;
pub use error::{CliError, CliResult};
