//! Command-line interface for keyword_relay.
//!
//! Provides the server, import, refill and inspection commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
