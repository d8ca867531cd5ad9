//! Core traits, types, and error handling for flocca-tools.
//!
//! Every connector crate builds on the abstractions defined here: the
//! [`Connector`] trait, the tool call envelope, the shared error taxonomy,
//! and the session configuration primitives.

pub mod config;
pub mod error;
pub mod retry;
pub mod tool;

pub use config::{DeploymentMode, ProxySettings, SessionState};
pub use error::{Error, Result};
pub use tool::{normalize_tool_name, Connector, ToolContent, ToolDefinition, ToolResult};
