//! CLI module for chartsmith - command-line interface and subcommands.
//!
//! Provides catalog browsing, a one-turn conversation entry point, and history.

pub mod commands;

pub use commands::Cli;
