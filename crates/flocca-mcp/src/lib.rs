//! MCP (Model Context Protocol) tool dispatch shell.
//!
//! Implements the newline-delimited JSON-RPC 2.0 transport and the
//! `initialize` / `tools/list` / `tools/call` method triad over a single
//! [`flocca_core::Connector`]. One process serves one connector.

pub mod protocol;
pub mod server;
pub mod transport;

pub use server::{ToolServer, UnknownMethodPolicy};
