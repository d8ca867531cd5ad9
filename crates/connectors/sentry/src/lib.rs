//! Sentry connector.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, Error, ProxySettings, Result, SessionState, ToolDefinition, ToolResult,
};

const DEFAULT_BASE_URL: &str = "https://sentry.io/api/0";

#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub base_url: String,
    pub token: String,
    pub org_slug: String,
}

enum Op {
    Configure,
    ListProjects,
    ListIssues,
    GetIssue,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "sentry_configure" => Some(Self::Configure),
            "sentry_list_projects" => Some(Self::ListProjects),
            "sentry_list_issues" => Some(Self::ListIssues),
            "sentry_get_issue" => Some(Self::GetIssue),
            _ => None,
        }
    }
}

pub struct SentryConnector {
    session: SessionState<SentryConfig>,
    proxy: Option<ProxySettings>,
    client: reqwest::Client,
}

impl SentryConnector {
    pub fn new(initial: Option<SentryConfig>, proxy: Option<ProxySettings>) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (env_var("SENTRY_TOKEN"), env_var("SENTRY_ORG_SLUG")) {
            (Some(token), Some(org_slug)) => Some(SentryConfig {
                base_url: env_var("SENTRY_BASE_URL")
                    .map(|u| normalize_base_url(&u))
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                token,
                org_slug,
            }),
            _ => None,
        };
        Self::new(initial, ProxySettings::from_env())
    }

    fn require(&self) -> Result<std::sync::Arc<SentryConfig>> {
        self.session.require("Sentry Setup Required")
    }

    async fn get(
        &self,
        cfg: &SentryConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let (url, builder) = match &self.proxy {
            Some(proxy) => {
                let url = format!("{}{path}", proxy.url);
                let builder = self
                    .client
                    .get(&url)
                    .header(ProxySettings::USER_HEADER, &proxy.user_id);
                (url, builder)
            }
            None => {
                let url = format!("{}{path}", cfg.base_url);
                let builder = self
                    .client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", cfg.token));
                (url, builder)
            }
        };
        debug!(%url, "sentry request");

        let mut builder = builder.header("Content-Type", "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) {
            let message = data["detail"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Sentry request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            token: String,
            org_slug: String,
            base_url: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = SentryConfig {
            base_url: params
                .base_url
                .map(|u| normalize_base_url(&u))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token: params.token,
            org_slug: params.org_slug,
        };
        self.get(
            &candidate,
            &format!("/organizations/{}/", candidate.org_slug),
            &[],
        )
        .await?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true }))
    }

    async fn list_projects(&self) -> Result<Value> {
        let cfg = self.require()?;
        let data = self
            .get(&cfg, &format!("/organizations/{}/projects/", cfg.org_slug), &[])
            .await?;
        let projects: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| {
                        json!({ "slug": p["slug"], "name": p["name"], "platform": p["platform"] })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(projects))
    }

    async fn list_issues(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_slug: String,
            query: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .get(
                &cfg,
                &format!(
                    "/projects/{}/{}/issues/",
                    cfg.org_slug, params.project_slug
                ),
                &[
                    (
                        "query",
                        params.query.unwrap_or_else(|| "is:unresolved".to_string()),
                    ),
                    ("limit", "20".to_string()),
                ],
            )
            .await?;
        let issues: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|i| {
                        json!({
                            "id": i["id"],
                            "title": i["title"],
                            "count": i["count"],
                            "userCount": i["userCount"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(issues))
    }

    async fn get_issue(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            issue_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        self.get(&cfg, &format!("/issues/{}/", params.issue_id), &[])
            .await
    }
}

#[async_trait]
impl Connector for SentryConnector {
    fn name(&self) -> &'static str {
        "sentry"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "sentry_configure",
                "Configure Sentry",
                json!({
                    "type": "object",
                    "properties": {
                        "token": { "type": "string" },
                        "org_slug": { "type": "string" },
                        "base_url": { "type": "string" }
                    },
                    "required": ["token", "org_slug"]
                }),
            ),
            ToolDefinition::new(
                "sentry_list_projects",
                "List Projects",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "sentry_list_issues",
                "List Issues",
                json!({
                    "type": "object",
                    "properties": {
                        "project_slug": { "type": "string" },
                        "query": { "type": "string" }
                    },
                    "required": ["project_slug"]
                }),
            ),
            ToolDefinition::new(
                "sentry_get_issue",
                "Get Issue Details",
                json!({
                    "type": "object",
                    "properties": { "issue_id": { "type": "string" } },
                    "required": ["issue_id"]
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
            Op::ListProjects => self.list_projects().await,
            Op::ListIssues => self.list_issues(arguments).await,
            Op::GetIssue => self.get_issue(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Sentry Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(url: &str) -> SentryConfig {
        SentryConfig {
            base_url: url.to_string(),
            token: "tok".to_string(),
            org_slug: "acme".to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_issues_defaults_to_unresolved() {
        let server = MockServer::start();
        let issues = server.mock(|when, then| {
            when.method(GET)
                .path("/projects/acme/web/issues/")
                .query_param("query", "is:unresolved")
                .query_param("limit", "20");
            then.status(200).json_body(json!([
                { "id": "1", "title": "TypeError", "count": "12", "userCount": 3, "level": "error" }
            ]));
        });

        let connector = SentryConnector::new(Some(test_config(&server.base_url())), None);
        let result = connector
            .call("sentry_list_issues", json!({ "project_slug": "web" }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload[0]["title"], "TypeError");
        assert!(payload[0].get("level").is_none());
        issues.assert();
    }

    #[tokio::test]
    async fn test_error_uses_detail_field() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/issues/42/");
            then.status(403).json_body(json!({ "detail": "You do not have permission." }));
        });

        let connector = SentryConnector::new(Some(test_config(&server.base_url())), None);
        let result = connector
            .call("sentry_get_issue", json!({ "issue_id": "42" }))
            .await;

        assert!(result.failed());
        assert!(result.text_content().contains("You do not have permission."));
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let connector = SentryConnector::new(None, None);
        let result = connector.call("sentry_list_projects", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().contains("Sentry Setup Required"));
    }
}
