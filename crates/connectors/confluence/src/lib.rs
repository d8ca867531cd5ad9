//! Confluence connector.
//!
//! Confluence Cloud serves its REST API under `/wiki/rest/api`, self-hosted
//! instances under `/rest/api`. The deployment mode decides which path is
//! tried first; a 404 from the first candidate falls back to the second.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, DeploymentMode, Error, ProxySettings, Result, SessionState, ToolDefinition,
    ToolResult,
};

/// Verified session configuration.
#[derive(Debug, Clone)]
pub struct ConfluenceConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub token: String,
    pub mode: DeploymentMode,
}

/// Strip a trailing `/wiki` (users paste the browser URL) and trailing
/// slashes.
pub fn normalize_confluence_url(url: &str) -> String {
    let trimmed = normalize_base_url(url);
    normalize_base_url(trimmed.trim_end_matches("/wiki"))
}

/// REST path candidates for an endpoint, in deployment-mode order.
pub fn api_path_candidates(mode: DeploymentMode, endpoint: &str) -> [String; 2] {
    let cloud = format!("/wiki/rest/api/{endpoint}");
    let server = format!("/rest/api/{endpoint}");
    match mode {
        DeploymentMode::Cloud => [cloud, server],
        DeploymentMode::Server => [server, cloud],
    }
}

enum Op {
    Configure,
    ListSpaces,
    SearchPages,
    GetPage,
    CreatePage,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "confluence_configure" => Some(Self::Configure),
            "confluence_list_spaces" => Some(Self::ListSpaces),
            "confluence_search_pages" => Some(Self::SearchPages),
            "confluence_get_page" => Some(Self::GetPage),
            "confluence_create_page" => Some(Self::CreatePage),
            _ => None,
        }
    }
}

pub struct ConfluenceConnector {
    session: SessionState<ConfluenceConfig>,
    proxy: Option<ProxySettings>,
    client: reqwest::Client,
}

impl ConfluenceConnector {
    pub fn new(initial: Option<ConfluenceConfig>, proxy: Option<ProxySettings>) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (env_var("CONFLUENCE_TOKEN"), env_var("CONFLUENCE_BASE_URL")) {
            (Some(token), Some(base_url)) => Some(ConfluenceConfig {
                base_url: normalize_confluence_url(&base_url),
                username: env_var("CONFLUENCE_USERNAME"),
                token,
                mode: DeploymentMode::from_env("CONFLUENCE_DEPLOYMENT_MODE"),
            }),
            _ => None,
        };
        Self::new(initial, ProxySettings::from_env())
    }

    fn require(&self) -> Result<std::sync::Arc<ConfluenceConfig>> {
        self.session
            .require("Confluence not configured. Call confluence_configure first.")
    }

    fn apply_headers(
        &self,
        builder: reqwest::RequestBuilder,
        cfg: &ConfluenceConfig,
    ) -> reqwest::RequestBuilder {
        if let Some(proxy) = &self.proxy {
            return builder
                .header(ProxySettings::USER_HEADER, &proxy.user_id)
                .header("Content-Type", "application/json");
        }
        let builder = builder.header("Content-Type", "application/json");
        match &cfg.username {
            Some(username) => {
                let auth = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, cfg.token));
                builder.header("Authorization", format!("Basic {auth}"))
            }
            None => builder.header("Authorization", format!("Bearer {}", cfg.token)),
        }
    }

    /// Issue a request against the candidate paths, falling back on 404.
    async fn request(
        &self,
        cfg: &ConfluenceConfig,
        method: reqwest::Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let base = match &self.proxy {
            Some(proxy) => proxy.url.clone(),
            None => cfg.base_url.clone(),
        };

        let candidates = api_path_candidates(cfg.mode, endpoint);
        let last = candidates.len() - 1;
        for (i, path) in candidates.iter().enumerate() {
            let url = format!("{base}{path}");
            debug!(%url, "confluence request");

            let mut builder = self.apply_headers(self.client.request(method.clone(), &url), cfg);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;
            let status = response.status().as_u16();

            if status == 404 && i < last {
                debug!(%path, "candidate path returned 404, trying fallback");
                continue;
            }
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v["message"].as_str().map(String::from))
                    .unwrap_or(text);
                return Err(Error::from_status(status, message));
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| Error::Http(format!("failed to parse response: {e}")));
        }
        unreachable!("candidate loop always returns on the last entry")
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            username: Option<String>,
            token: String,
            base_url: String,
            deployment_mode: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        // Build the full candidate first; the stored state is only touched
        // after verification succeeds.
        let candidate = ConfluenceConfig {
            base_url: normalize_confluence_url(&params.base_url),
            username: params
                .username
                .or_else(|| self.session.snapshot().and_then(|c| c.username.clone())),
            token: params.token,
            mode: params
                .deployment_mode
                .as_deref()
                .map(DeploymentMode::parse)
                .unwrap_or_default(),
        };

        self.request(&candidate, reqwest::Method::GET, "user/current", &[], None)
            .await?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true, "status": "authenticated" }))
    }

    async fn list_spaces(&self) -> Result<Value> {
        let cfg = self.require()?;
        let data = self
            .request(
                &cfg,
                reqwest::Method::GET,
                "space",
                &[("limit", "25".to_string())],
                None,
            )
            .await?;
        Ok(data["results"].clone())
    }

    async fn search_pages(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            cql: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let data = self
            .request(
                &cfg,
                reqwest::Method::GET,
                "content/search",
                &[("cql", params.cql), ("limit", "10".to_string())],
                None,
            )
            .await?;
        Ok(data["results"].clone())
    }

    async fn get_page(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            page_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        self.request(
            &cfg,
            reqwest::Method::GET,
            &format!("content/{}", params.page_id),
            &[("expand", "body.storage".to_string())],
            None,
        )
        .await
    }

    async fn create_page(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            space_key: String,
            title: String,
            body: Option<String>,
            parent_id: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut payload = json!({
            "title": params.title,
            "type": "page",
            "space": { "key": params.space_key },
            "body": {
                "storage": {
                    "value": params.body.unwrap_or_else(|| "<p></p>".to_string()),
                    "representation": "storage",
                }
            },
        });
        if let Some(parent_id) = params.parent_id {
            payload["ancestors"] = json!([{ "id": parent_id }]);
        }

        self.request(&cfg, reqwest::Method::POST, "content", &[], Some(&payload))
            .await
    }
}

#[async_trait]
impl Connector for ConfluenceConnector {
    fn name(&self) -> &'static str {
        "confluence"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "confluence_configure",
                "Configure Confluence",
                json!({
                    "type": "object",
                    "properties": {
                        "username": { "type": "string" },
                        "token": { "type": "string" },
                        "base_url": { "type": "string" },
                        "deployment_mode": { "type": "string", "enum": ["cloud", "server"] }
                    },
                    "required": ["token", "base_url"]
                }),
            ),
            ToolDefinition::new(
                "confluence_list_spaces",
                "List Spaces",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "confluence_search_pages",
                "Search Pages (CQL)",
                json!({
                    "type": "object",
                    "properties": { "cql": { "type": "string" } },
                    "required": ["cql"]
                }),
            ),
            ToolDefinition::new(
                "confluence_get_page",
                "Get Page",
                json!({
                    "type": "object",
                    "properties": { "page_id": { "type": "string" } },
                    "required": ["page_id"]
                }),
            ),
            ToolDefinition::new(
                "confluence_create_page",
                "Create Page",
                json!({
                    "type": "object",
                    "properties": {
                        "space_key": { "type": "string" },
                        "title": { "type": "string" },
                        "body": { "type": "string" },
                        "parent_id": { "type": "string" }
                    },
                    "required": ["space_key", "title"]
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::Configure => self.configure(arguments).await,
            Op::ListSpaces => self.list_spaces().await,
            Op::SearchPages => self.search_pages(arguments).await,
            Op::GetPage => self.get_page(arguments).await,
            Op::CreatePage => self.create_page(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Confluence Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(base_url: &str, mode: DeploymentMode) -> ConfluenceConfig {
        ConfluenceConfig {
            base_url: base_url.to_string(),
            username: Some("dev@example.com".to_string()),
            token: "secret".to_string(),
            mode,
        }
    }

    #[test]
    fn test_normalize_url_strips_wiki_suffix() {
        assert_eq!(
            normalize_confluence_url("https://conf.example.com/wiki/"),
            "https://conf.example.com"
        );
        assert_eq!(
            normalize_confluence_url("https://conf.example.com"),
            "https://conf.example.com"
        );
    }

    #[test]
    fn test_cloud_mode_tries_wiki_path_first() {
        assert_eq!(
            api_path_candidates(DeploymentMode::Cloud, "space"),
            ["/wiki/rest/api/space".to_string(), "/rest/api/space".to_string()]
        );
    }

    #[test]
    fn test_server_mode_tries_plain_path_first() {
        assert_eq!(
            api_path_candidates(DeploymentMode::Server, "space"),
            ["/rest/api/space".to_string(), "/wiki/rest/api/space".to_string()]
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_server_path_on_404() {
        let server = MockServer::start();
        let cloud = server.mock(|when, then| {
            when.method(GET).path("/wiki/rest/api/space");
            then.status(404);
        });
        let fallback = server.mock(|when, then| {
            when.method(GET).path("/rest/api/space");
            then.status(200)
                .json_body(serde_json::json!({ "results": [{ "key": "ENG" }] }));
        });

        let connector = ConfluenceConnector::new(
            Some(test_config(&server.base_url(), DeploymentMode::Cloud)),
            None,
        );
        let result = connector.call("confluence_list_spaces", Value::Null).await;

        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("ENG"));
        assert_eq!(cloud.hits(), 1);
        assert_eq!(fallback.hits(), 1);
    }

    #[tokio::test]
    async fn test_not_configured_error() {
        let connector = ConfluenceConnector::new(None, None);
        let result = connector.call("confluence_list_spaces", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().contains("not configured"));
    }

    #[tokio::test]
    async fn test_configure_is_atomic_with_verification() {
        let server = MockServer::start();
        let mut denied = server.mock(|when, then| {
            when.method(GET).path("/wiki/rest/api/user/current");
            then.status(401).json_body(serde_json::json!({ "message": "bad token" }));
        });

        let connector = ConfluenceConnector::new(None, None);
        let args = serde_json::json!({ "token": "wrong", "base_url": server.base_url() });
        let result = connector.call("confluence_configure", args).await;
        assert!(result.failed());
        // A failed verification leaves the session unset.
        let result = connector.call("confluence_list_spaces", Value::Null).await;
        assert!(result.text_content().contains("not configured"));

        denied.delete();
        server.mock(|when, then| {
            when.method(GET).path("/wiki/rest/api/user/current");
            then.status(200).json_body(serde_json::json!({ "type": "known" }));
        });

        let args = serde_json::json!({ "token": "right", "base_url": server.base_url() });
        let result = connector.call("confluence_configure", args).await;
        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("authenticated"));
    }

    #[tokio::test]
    async fn test_dotted_alias_accepted() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/wiki/rest/api/space");
            then.status(200).json_body(serde_json::json!({ "results": [] }));
        });
        let connector = ConfluenceConnector::new(
            Some(test_config(&server.base_url(), DeploymentMode::Cloud)),
            None,
        );
        let result = connector.call("confluence.listSpaces", Value::Null).await;
        assert!(!result.failed());
    }

    #[test]
    fn test_tool_names_are_normalized() {
        let connector = ConfluenceConnector::new(None, None);
        for tool in connector.tools() {
            assert!(tool
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'));
        }
    }
}
