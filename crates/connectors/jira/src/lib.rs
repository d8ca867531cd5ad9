//! Jira connector.
//!
//! Jira Cloud speaks REST API v3, self-hosted installations commonly only
//! v2. The deployment mode decides which version is tried first; a 404
//! falls back to the other.

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

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub url: String,
    pub email: String,
    pub token: String,
    pub mode: DeploymentMode,
}

/// REST API version candidates in deployment-mode order.
pub fn api_versions(mode: DeploymentMode) -> [&'static str; 2] {
    match mode {
        DeploymentMode::Cloud => ["3", "2"],
        DeploymentMode::Server => ["2", "3"],
    }
}

enum Op {
    Configure,
    SearchIssues,
    GetIssue,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "jira_configure" => Some(Self::Configure),
            "jira_search_issues" => Some(Self::SearchIssues),
            "jira_get_issue" => Some(Self::GetIssue),
            _ => None,
        }
    }
}

pub struct JiraConnector {
    session: SessionState<JiraConfig>,
    proxy: Option<ProxySettings>,
    client: reqwest::Client,
}

impl JiraConnector {
    pub fn new(initial: Option<JiraConfig>, proxy: Option<ProxySettings>) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let token = env_var("JIRA_API_TOKEN").or_else(|| env_var("JIRA_TOKEN"));
        let url = env_var("JIRA_SITE_URL").or_else(|| env_var("JIRA_URL"));
        let initial = match (env_var("JIRA_EMAIL"), token, url) {
            (Some(email), Some(token), Some(url)) => Some(JiraConfig {
                url: normalize_base_url(&url),
                email,
                token,
                mode: DeploymentMode::from_env("JIRA_DEPLOYMENT_MODE"),
            }),
            _ => None,
        };
        Self::new(initial, ProxySettings::from_env())
    }

    fn require(&self) -> Result<std::sync::Arc<JiraConfig>> {
        self.session
            .require("Jira not configured. Missing email, token, or url.")
    }

    fn apply_headers(
        &self,
        builder: reqwest::RequestBuilder,
        cfg: &JiraConfig,
    ) -> reqwest::RequestBuilder {
        let builder = builder
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(proxy) = &self.proxy {
            return builder.header(ProxySettings::USER_HEADER, &proxy.user_id);
        }
        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", cfg.email, cfg.token));
        builder.header("Authorization", format!("Basic {auth}"))
    }

    /// GET an endpoint under `/rest/api/<version>/`, trying version
    /// candidates in deployment-mode order and falling back on 404.
    async fn jira_get(
        &self,
        cfg: &JiraConfig,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let base = match &self.proxy {
            Some(proxy) => proxy.url.clone(),
            None => cfg.url.clone(),
        };

        let versions = api_versions(cfg.mode);
        let last = versions.len() - 1;
        for (i, version) in versions.iter().enumerate() {
            let url = format!("{base}/rest/api/{version}/{endpoint}");
            debug!(%url, "jira request");

            let mut builder = self.apply_headers(self.client.get(&url), cfg);
            if !query.is_empty() {
                builder = builder.query(query);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;
            let status = response.status().as_u16();

            if status == 404 && i < last {
                debug!(%version, "API version returned 404, trying fallback");
                continue;
            }
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| {
                        v["errorMessages"]
                            .as_array()
                            .map(|msgs| {
                                msgs.iter()
                                    .filter_map(Value::as_str)
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            })
                            .filter(|m| !m.is_empty())
                    })
                    .unwrap_or(text);
                return Err(Error::from_status(status, message));
            }
            return response
                .json::<Value>()
                .await
                .map_err(|e| Error::Http(format!("failed to parse response: {e}")));
        }
        unreachable!("version loop always returns on the last entry")
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            email: String,
            token: String,
            url: String,
            deployment_mode: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = JiraConfig {
            url: normalize_base_url(&params.url),
            email: params.email,
            token: params.token,
            mode: params
                .deployment_mode
                .as_deref()
                .map(DeploymentMode::parse)
                .unwrap_or_default(),
        };

        self.jira_get(&candidate, "myself", &[]).await?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true, "status": "authenticated" }))
    }

    async fn search_issues(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            jql: String,
            limit: Option<u32>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let data = self
            .jira_get(
                &cfg,
                "search",
                &[
                    ("jql", params.jql),
                    ("maxResults", params.limit.unwrap_or(10).to_string()),
                ],
            )
            .await?;
        Ok(data["issues"].clone())
    }

    async fn get_issue(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            issue_key: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        self.jira_get(&cfg, &format!("issue/{}", params.issue_key), &[])
            .await
    }
}

#[async_trait]
impl Connector for JiraConnector {
    fn name(&self) -> &'static str {
        "jira"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "jira_configure",
                "Configure Jira",
                json!({
                    "type": "object",
                    "properties": {
                        "email": { "type": "string" },
                        "token": { "type": "string" },
                        "url": { "type": "string" },
                        "deployment_mode": { "type": "string", "enum": ["cloud", "server"] }
                    },
                    "required": ["email", "token", "url"]
                }),
            ),
            ToolDefinition::new(
                "jira_search_issues",
                "Search Issues (JQL)",
                json!({
                    "type": "object",
                    "properties": {
                        "jql": { "type": "string" },
                        "limit": { "type": "number" }
                    },
                    "required": ["jql"]
                }),
            ),
            ToolDefinition::new(
                "jira_get_issue",
                "Get Issue Details",
                json!({
                    "type": "object",
                    "properties": { "issue_key": { "type": "string" } },
                    "required": ["issue_key"]
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
            Op::SearchIssues => self.search_issues(arguments).await,
            Op::GetIssue => self.get_issue(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Jira Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(base_url: &str, mode: DeploymentMode) -> JiraConfig {
        JiraConfig {
            url: base_url.to_string(),
            email: "dev@example.com".to_string(),
            token: "secret".to_string(),
            mode,
        }
    }

    #[test]
    fn test_cloud_first_version_order() {
        assert_eq!(api_versions(DeploymentMode::Cloud), ["3", "2"]);
    }

    #[test]
    fn test_server_first_version_order() {
        assert_eq!(api_versions(DeploymentMode::Server), ["2", "3"]);
    }

    #[tokio::test]
    async fn test_falls_back_from_v3_to_v2_on_404() {
        let server = MockServer::start();
        let v3 = server.mock(|when, then| {
            when.method(GET).path("/rest/api/3/issue/PROJ-1");
            then.status(404);
        });
        let v2 = server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/issue/PROJ-1");
            then.status(200)
                .json_body(serde_json::json!({ "key": "PROJ-1", "fields": {} }));
        });

        let connector = JiraConnector::new(
            Some(test_config(&server.base_url(), DeploymentMode::Cloud)),
            None,
        );
        let result = connector
            .call("jira_get_issue", serde_json::json!({ "issue_key": "PROJ-1" }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("PROJ-1"));
        assert_eq!(v3.hits(), 1);
        assert_eq!(v2.hits(), 1);
    }

    #[tokio::test]
    async fn test_server_mode_starts_with_v2() {
        let server = MockServer::start();
        let v2 = server.mock(|when, then| {
            when.method(GET).path("/rest/api/2/myself");
            then.status(200).json_body(serde_json::json!({ "name": "dev" }));
        });

        let connector = JiraConnector::new(None, None);
        let args = serde_json::json!({
            "email": "dev@example.com",
            "token": "secret",
            "url": server.base_url(),
            "deployment_mode": "server",
        });
        let result = connector.call("jira_configure", args).await;

        assert!(!result.failed(), "{}", result.text_content());
        assert_eq!(v2.hits(), 1);
    }

    #[tokio::test]
    async fn test_failed_configure_rolls_back() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/rest/api/3/myself");
            then.status(401)
                .json_body(serde_json::json!({ "errorMessages": ["bad credentials"] }));
        });
        // v2 fallback only applies to 404, so the 401 surfaces directly.

        let connector = JiraConnector::new(None, None);
        let args = serde_json::json!({
            "email": "dev@example.com",
            "token": "wrong",
            "url": server.base_url(),
        });
        let result = connector.call("jira_configure", args).await;
        assert!(result.failed());
        assert!(result.text_content().contains("bad credentials"));

        let result = connector
            .call("jira_search_issues", serde_json::json!({ "jql": "order by created" }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("not configured"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let connector = JiraConnector::new(None, None);
        let result = connector.call("jira_delete_everything", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().starts_with("Unknown tool:"));
    }
}
