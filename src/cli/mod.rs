//! CLI module for wavediff - command-line interface and subcommands.
//!
//! Each subcommand maps onto one coordinator operation.

pub mod commands;

pub use commands::Cli;
