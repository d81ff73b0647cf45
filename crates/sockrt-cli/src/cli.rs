//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read request lines from stdin and print every evaluated script
    Serve,
    /// Send a single request and print its reply
    Invoke {
        /// Request URI, e.g. ipc://ping?seq=1
        uri: String,
        /// File whose bytes are attached as the request body
        #[arg(short, long)]
        body_file: Option<String>,
        /// How long to wait for the reply (in milliseconds)
        #[arg(short, long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}
