//! CLI module for calbot - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for the tool server,
//! interactive chat, manual tool calls and agent registration.

pub mod commands;

pub use commands::Cli;
