//! Session configuration primitives.
//!
//! Connectors are configured from environment variables at process start and
//! reconfigured at runtime through their `configure` tool. Configuration is
//! held behind [`SessionState`], which hands out immutable snapshots so an
//! in-flight tool call never observes a half-written config.

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Read a non-empty environment variable.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Strip trailing slashes from a base URL.
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Cross-cutting proxy mode: when `FLOCCA_PROXY_URL` and `FLOCCA_USER_ID`
/// are both set, outbound calls go through the local proxy with a
/// user-identifying header instead of direct vendor credentials.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub url: String,
    pub user_id: String,
}

impl ProxySettings {
    /// Header carrying the user identity in proxy mode.
    pub const USER_HEADER: &'static str = "X-Flocca-User-ID";

    pub fn from_env() -> Option<Self> {
        let url = env_var("FLOCCA_PROXY_URL")?;
        let user_id = env_var("FLOCCA_USER_ID")?;
        Some(Self {
            url: normalize_base_url(&url),
            user_id,
        })
    }
}

/// Cloud-hosted vs self-hosted API shape.
///
/// Determines the order in which REST path/version candidates are tried by
/// connectors whose vendor exposes different shapes per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Cloud,
    Server,
}

impl DeploymentMode {
    /// Parse a mode string, defaulting to cloud for anything unrecognized.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "server" | "self-hosted" | "selfhosted" | "datacenter" => Self::Server,
            _ => Self::Cloud,
        }
    }

    pub fn from_env(var: &str) -> Self {
        env_var(var).map(|v| Self::parse(&v)).unwrap_or_default()
    }
}

/// Copy-on-write session configuration holder.
///
/// Readers take an `Arc` snapshot; `configure` handlers build and verify a
/// candidate config before calling [`SessionState::replace`], so the stored
/// state is either the previous verified config or the new one, never a
/// mixture.
#[derive(Debug)]
pub struct SessionState<C> {
    inner: RwLock<Option<Arc<C>>>,
}

impl<C> Default for SessionState<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> SessionState<C> {
    pub fn new(initial: Option<C>) -> Self {
        Self {
            inner: RwLock::new(initial.map(Arc::new)),
        }
    }

    pub fn empty() -> Self {
        Self::new(None)
    }

    /// Current configuration snapshot, if any.
    pub fn snapshot(&self) -> Option<Arc<C>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Snapshot or a `NotConfigured` error with the given message.
    pub fn require(&self, message: &str) -> Result<Arc<C>> {
        self.snapshot()
            .ok_or_else(|| Error::NotConfigured(message.to_string()))
    }

    /// Atomically install a new verified configuration.
    pub fn replace(&self, config: C) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(config));
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_configured(&self) -> bool {
        self.snapshot().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_mode_parse() {
        assert_eq!(DeploymentMode::parse("cloud"), DeploymentMode::Cloud);
        assert_eq!(DeploymentMode::parse("Server"), DeploymentMode::Server);
        assert_eq!(DeploymentMode::parse("self-hosted"), DeploymentMode::Server);
        assert_eq!(DeploymentMode::parse("anything"), DeploymentMode::Cloud);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://x.example.com/"), "https://x.example.com");
        assert_eq!(normalize_base_url("https://x.example.com///"), "https://x.example.com");
        assert_eq!(normalize_base_url("https://x.example.com"), "https://x.example.com");
    }

    #[test]
    fn test_session_state_snapshot_isolation() {
        let state = SessionState::new(Some("v1".to_string()));
        let before = state.snapshot().unwrap();
        state.replace("v2".to_string());
        // The old snapshot is unaffected by the swap.
        assert_eq!(*before, "v1");
        assert_eq!(*state.snapshot().unwrap(), "v2");
    }

    #[test]
    fn test_session_state_require() {
        let state: SessionState<String> = SessionState::empty();
        let err = state.require("gadget not configured").unwrap_err();
        assert_eq!(err.code(), "NOT_CONFIGURED");
        assert!(err.to_string().contains("not configured"));

        state.replace("token".to_string());
        assert!(state.require("gadget not configured").is_ok());
    }
}
