//! Notion connector.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, Error, ProxySettings, Result, SessionState, ToolDefinition, ToolResult,
};

const API_BASE: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub token: String,
}

enum Op {
    Configure,
    Search,
    ListDatabases,
    QueryDatabase,
    GetPage,
    CreatePage,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "notion_configure" => Some(Self::Configure),
            "notion_search" => Some(Self::Search),
            "notion_list_databases" => Some(Self::ListDatabases),
            "notion_query_database" => Some(Self::QueryDatabase),
            "notion_get_page" => Some(Self::GetPage),
            "notion_create_page" => Some(Self::CreatePage),
            _ => None,
        }
    }
}

pub struct NotionConnector {
    session: SessionState<NotionConfig>,
    proxy: Option<ProxySettings>,
    base_url: String,
    client: reqwest::Client,
}

impl NotionConnector {
    pub fn new(
        initial: Option<NotionConfig>,
        proxy: Option<ProxySettings>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            base_url: base_url.unwrap_or_else(|| API_BASE.to_string()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;
        Self::new(
            env_var("NOTION_TOKEN").map(|token| NotionConfig { token }),
            ProxySettings::from_env(),
            None,
        )
    }

    async fn request(
        &self,
        token: Option<&str>,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = match (token, &self.proxy) {
            (Some(token), _) => Some(token.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(
                self.session
                    .require("Notion Not Configured. Config is missing.")?
                    .token
                    .clone(),
            ),
        };

        let (url, mut builder) = match &self.proxy {
            Some(proxy) => {
                let url = format!("{}{path}", proxy.url);
                let builder = self
                    .client
                    .request(method, &url)
                    .header(ProxySettings::USER_HEADER, &proxy.user_id);
                (url, builder)
            }
            None => {
                let url = format!("{}{path}", self.base_url);
                let builder = self.client.request(method, &url).header(
                    "Authorization",
                    format!("Bearer {}", token.unwrap_or_default()),
                );
                (url, builder)
            }
        };
        debug!(%url, "notion request");

        builder = builder
            .header("Notion-Version", NOTION_VERSION)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) {
            let message = data["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Notion request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            token: String,
        }
        let params: Params = parse_args(arguments)?;

        self.request(
            Some(&params.token),
            reqwest::Method::GET,
            "/v1/users/me",
            None,
        )
        .await?;

        self.session.replace(NotionConfig {
            token: params.token,
        });
        Ok(json!({ "ok": true, "status": "authenticated" }))
    }

    async fn search(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
        }
        let params: Params = parse_args(arguments)?;
        let data = self
            .request(
                None,
                reqwest::Method::POST,
                "/v1/search",
                Some(&json!({ "query": params.query, "page_size": 20 })),
            )
            .await?;
        Ok(data["results"].clone())
    }

    async fn list_databases(&self) -> Result<Value> {
        let data = self
            .request(
                None,
                reqwest::Method::POST,
                "/v1/search",
                Some(&json!({ "filter": { "value": "database", "property": "object" } })),
            )
            .await?;
        Ok(data["results"].clone())
    }

    async fn query_database(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            database_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let data = self
            .request(
                None,
                reqwest::Method::POST,
                &format!("/v1/databases/{}/query", params.database_id),
                Some(&json!({ "page_size": 50 })),
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
        self.request(
            None,
            reqwest::Method::GET,
            &format!("/v1/pages/{}", params.page_id),
            None,
        )
        .await
    }

    async fn create_page(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            parent_id: String,
            title: String,
            body: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let children = match &params.body {
            Some(body) => json!([{
                "object": "block",
                "type": "paragraph",
                "paragraph": { "rich_text": [{ "text": { "content": body } }] }
            }]),
            None => json!([]),
        };
        self.request(
            None,
            reqwest::Method::POST,
            "/v1/pages",
            Some(&json!({
                "parent": { "page_id": params.parent_id },
                "properties": { "title": [{ "text": { "content": params.title } }] },
                "children": children,
            })),
        )
        .await
    }
}

#[async_trait]
impl Connector for NotionConnector {
    fn name(&self) -> &'static str {
        "notion"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "notion_configure",
                "Configure Notion",
                json!({
                    "type": "object",
                    "properties": { "token": { "type": "string" } },
                    "required": ["token"]
                }),
            ),
            ToolDefinition::new(
                "notion_search",
                "Search pages/databases",
                json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "notion_list_databases",
                "List databases",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "notion_query_database",
                "Query Database",
                json!({
                    "type": "object",
                    "properties": { "database_id": { "type": "string" } },
                    "required": ["database_id"]
                }),
            ),
            ToolDefinition::new(
                "notion_get_page",
                "Get Page",
                json!({
                    "type": "object",
                    "properties": { "page_id": { "type": "string" } },
                    "required": ["page_id"]
                }),
            ),
            ToolDefinition::new(
                "notion_create_page",
                "Create Page",
                json!({
                    "type": "object",
                    "properties": {
                        "parent_id": { "type": "string" },
                        "title": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["parent_id", "title"]
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
            Op::Search => self.search(arguments).await,
            Op::ListDatabases => self.list_databases().await,
            Op::QueryDatabase => self.query_database(arguments).await,
            Op::GetPage => self.get_page(arguments).await,
            Op::CreatePage => self.create_page(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Notion Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_connector(server: &MockServer) -> NotionConnector {
        NotionConnector::new(
            Some(NotionConfig {
                token: "secret".to_string(),
            }),
            None,
            Some(server.base_url()),
        )
    }

    #[tokio::test]
    async fn test_search_passes_token_and_version() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1/search")
                .header("Authorization", "Bearer secret")
                .header("Notion-Version", NOTION_VERSION);
            then.status(200)
                .json_body(json!({ "results": [{ "object": "page", "id": "p1" }] }));
        });

        let result = test_connector(&server)
            .call("notion_search", json!({ "query": "roadmap" }))
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("p1"));
    }

    #[tokio::test]
    async fn test_dotted_camel_case_alias() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/search");
            then.status(200).json_body(json!({ "results": [] }));
        });
        let result = test_connector(&server)
            .call("notion.listDatabases", Value::Null)
            .await;
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_configure_rolls_back_on_bad_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/users/me");
            then.status(401).json_body(json!({ "message": "API token is invalid." }));
        });

        let connector = NotionConnector::new(None, None, Some(server.base_url()));
        let result = connector
            .call("notion_configure", json!({ "token": "bad" }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("API token is invalid"));

        let result = connector.call("notion_search", json!({ "query": "x" })).await;
        assert!(result.failed());
        assert!(result.text_content().contains("Not Configured"));
    }
}
