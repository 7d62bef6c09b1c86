//! Calbot - calendar tools for a conversational agent
//!
//! Calbot exposes calendar operations (availability lookup and event
//! creation against Microsoft Graph) as tools, serves them over a
//! newline-delimited JSON transport, and drives agent runs that call them.

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod ipc;
pub mod tools;

pub use error::{CalbotError, Result};
