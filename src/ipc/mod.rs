//! IPC Layer - line-oriented tool transport
//!
//! This module provides:
//! - Message types for requests and responses
//! - The tool server (stdio or Unix socket)
//! - The tool client used by the run driver
//! - Newline-delimited JSON codec

pub mod client;
pub mod codec;
pub mod messages;
pub mod server;

pub use client::{ToolClient, ToolClientConfig};
pub use codec::{Frame, NdJsonCodec};
pub use messages::{ErrorCode, Methods, ProtocolError, ToolRequest, ToolResponse};
pub use server::{ToolServer, ToolServerConfig, serve_connection};
