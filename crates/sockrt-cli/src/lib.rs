//! sockrt CLI library
//!
//! A command-line stand-in for the windowing layer: request lines go into
//! the runtime router and every script the runtime evaluates is printed.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{CommandDispatcher, Request};
pub use config::{AppConfig, CliSettings};
pub use error::{CliError, Result};
