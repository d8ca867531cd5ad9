//! GitLab connector.
//!
//! Credentials are fixed at startup: either a `GITLAB_TOKEN` or proxy mode
//! must be present, otherwise the process refuses to start. There is no
//! `configure` tool for this connector.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use flocca_core::config::{env_var, normalize_base_url};
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, ProxySettings, Result, ToolDefinition, ToolResult};

const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";

enum Auth {
    Token(String),
    Proxy(ProxySettings),
}

enum Op {
    Health,
    ListProjects,
    GetRepositoryTree,
    GetFile,
    CreateBranch,
    CreateMergeRequest,
    ListMergeRequests,
    TriggerPipeline,
    GetPipelineStatus,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "gitlab_health" => Some(Self::Health),
            "gitlab_list_projects" => Some(Self::ListProjects),
            "gitlab_get_repository_tree" => Some(Self::GetRepositoryTree),
            "gitlab_get_file" => Some(Self::GetFile),
            "gitlab_create_branch" => Some(Self::CreateBranch),
            "gitlab_create_merge_request" => Some(Self::CreateMergeRequest),
            "gitlab_list_merge_requests" => Some(Self::ListMergeRequests),
            "gitlab_trigger_pipeline" => Some(Self::TriggerPipeline),
            "gitlab_get_pipeline_status" => Some(Self::GetPipelineStatus),
            _ => None,
        }
    }
}

pub struct GitLabConnector {
    base_url: String,
    auth: Auth,
    client: reqwest::Client,
}

impl GitLabConnector {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            auth: Auth::Token(token.into()),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_proxy(proxy: ProxySettings) -> Self {
        Self {
            base_url: format!("{}/api/v4", proxy.url),
            auth: Auth::Proxy(proxy),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the environment. Fails when neither a token nor proxy
    /// mode is available; this connector has no `configure` tool to recover
    /// with at runtime.
    pub fn from_env() -> Result<Self> {
        if let Some(proxy) = ProxySettings::from_env() {
            return Ok(Self::with_proxy(proxy));
        }
        let token = env_var("GITLAB_TOKEN")
            .ok_or_else(|| Error::Config("GITLAB_TOKEN (or Proxy) is required.".to_string()))?;
        let base_url = env_var("GITLAB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(base_url, token))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.auth {
            Auth::Token(token) => builder.header("Private-Token", token),
            Auth::Proxy(proxy) => builder.header(ProxySettings::USER_HEADER, &proxy.user_id),
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "GitLab API error response");
            return Err(Error::from_status(
                status.as_u16(),
                format!("{} - {body}", status.as_u16()),
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Http(format!("failed to parse response: {e}")))
    }

    async fn health(&self) -> Result<Value> {
        let user = self.send(self.request(reqwest::Method::GET, "/user")).await?;
        Ok(json!({ "ok": true, "user": user["username"] }))
    }

    async fn list_projects(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            search: Option<String>,
            membership_only: Option<bool>,
        }
        let params: Params = parse_args(arguments)?;

        let mut query = vec![
            ("simple", "true".to_string()),
            (
                "membership",
                params.membership_only.unwrap_or(false).to_string(),
            ),
        ];
        if let Some(search) = params.search {
            query.push(("search", search));
        }

        let data = self
            .send(self.request(reqwest::Method::GET, "/projects").query(&query))
            .await?;
        let projects: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| {
                        json!({
                            "id": p["id"],
                            "name": p["name"],
                            "path_with_namespace": p["path_with_namespace"],
                            "web_url": p["web_url"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "projects": projects }))
    }

    async fn get_repository_tree(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            r#ref: String,
            path: Option<String>,
            recursive: Option<bool>,
        }
        let params: Params = parse_args(arguments)?;

        let query = vec![
            ("ref", params.r#ref),
            ("path", params.path.unwrap_or_default()),
            ("recursive", params.recursive.unwrap_or(false).to_string()),
        ];
        self.send(
            self.request(
                reqwest::Method::GET,
                &format!("/projects/{}/repository/tree", params.project_id),
            )
            .query(&query),
        )
        .await
    }

    async fn get_file(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            r#ref: String,
            file_path: String,
        }
        let params: Params = parse_args(arguments)?;

        let encoded = urlencoding::encode(&params.file_path);
        let data = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!(
                        "/projects/{}/repository/files/{encoded}",
                        params.project_id
                    ),
                )
                .query(&[("ref", params.r#ref)]),
            )
            .await?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data["content"].as_str().unwrap_or_default())
            .map_err(|e| Error::InvalidRequest(format!("Invalid file encoding: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::InvalidRequest(format!("File is not valid UTF-8: {e}")))
    }

    async fn create_branch(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            branch_name: String,
            r#ref: String,
        }
        let params: Params = parse_args(arguments)?;

        let data = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/projects/{}/repository/branches", params.project_id),
                )
                .query(&[("branch", params.branch_name), ("ref", params.r#ref)]),
            )
            .await?;
        Ok(format!(
            "Branch created: {}",
            data["name"].as_str().unwrap_or_default()
        ))
    }

    async fn create_merge_request(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            source_branch: String,
            target_branch: String,
            title: String,
            description: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let data = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/projects/{}/merge_requests", params.project_id),
                )
                .json(&json!({
                    "source_branch": params.source_branch,
                    "target_branch": params.target_branch,
                    "title": params.title,
                    "description": params.description,
                })),
            )
            .await?;
        Ok(json!({ "id": data["id"], "iid": data["iid"], "web_url": data["web_url"] }))
    }

    async fn list_merge_requests(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            state: Option<String>,
            author_id: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;

        let mut query = vec![
            (
                "state",
                params.state.unwrap_or_else(|| "opened".to_string()),
            ),
            ("scope", "all".to_string()),
        ];
        if let Some(author_id) = params.author_id {
            query.push(("author_id", author_id.to_string()));
        }

        let data = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/projects/{}/merge_requests", params.project_id),
                )
                .query(&query),
            )
            .await?;
        let mrs: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|m| {
                        json!({
                            "iid": m["iid"],
                            "title": m["title"],
                            "web_url": m["web_url"],
                            "state": m["state"],
                            "author": m["author"]["username"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(mrs))
    }

    async fn trigger_pipeline(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            r#ref: String,
        }
        let params: Params = parse_args(arguments)?;

        let data = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/projects/{}/pipeline", params.project_id),
                )
                .query(&[("ref", params.r#ref)]),
            )
            .await?;
        Ok(json!({ "id": data["id"], "status": data["status"], "web_url": data["web_url"] }))
    }

    async fn get_pipeline_status(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: u64,
            pipeline_id: u64,
        }
        let params: Params = parse_args(arguments)?;

        let data = self
            .send(self.request(
                reqwest::Method::GET,
                &format!(
                    "/projects/{}/pipelines/{}",
                    params.project_id, params.pipeline_id
                ),
            ))
            .await?;
        Ok(json!({ "id": data["id"], "status": data["status"], "web_url": data["web_url"] }))
    }
}

#[async_trait]
impl Connector for GitLabConnector {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "gitlab_health",
                "Check connection health",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "gitlab_list_projects",
                "List accessible projects",
                json!({
                    "type": "object",
                    "properties": {
                        "search": { "type": "string" },
                        "membership_only": { "type": "boolean" }
                    }
                }),
            ),
            ToolDefinition::new(
                "gitlab_get_repository_tree",
                "List files/directories",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "ref": { "type": "string" },
                        "path": { "type": "string" },
                        "recursive": { "type": "boolean" }
                    },
                    "required": ["project_id", "ref"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_get_file",
                "Get raw file content",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "ref": { "type": "string" },
                        "file_path": { "type": "string" }
                    },
                    "required": ["project_id", "ref", "file_path"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_create_branch",
                "Create a new branch",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "branch_name": { "type": "string" },
                        "ref": { "type": "string" }
                    },
                    "required": ["project_id", "branch_name", "ref"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_create_merge_request",
                "Create a Merge Request",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "source_branch": { "type": "string" },
                        "target_branch": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["project_id", "source_branch", "target_branch", "title"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_list_merge_requests",
                "List Merge Requests",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "state": { "type": "string", "enum": ["opened", "closed", "merged", "all"] },
                        "author_id": { "type": "integer" }
                    },
                    "required": ["project_id"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_trigger_pipeline",
                "Trigger a CI pipeline",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "ref": { "type": "string" }
                    },
                    "required": ["project_id", "ref"]
                }),
            ),
            ToolDefinition::new(
                "gitlab_get_pipeline_status",
                "Get status of a pipeline",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "integer" },
                        "pipeline_id": { "type": "integer" }
                    },
                    "required": ["project_id", "pipeline_id"]
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        debug!(tool = name, "gitlab tool call");
        let result = match op {
            Op::Health => self.health().await.map(|v| ToolResult::json(&v)),
            Op::ListProjects => self
                .list_projects(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GetRepositoryTree => self
                .get_repository_tree(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GetFile => self.get_file(arguments).await.map(ToolResult::text),
            Op::CreateBranch => self.create_branch(arguments).await.map(ToolResult::text),
            Op::CreateMergeRequest => self
                .create_merge_request(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::ListMergeRequests => self
                .list_merge_requests(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::TriggerPipeline => self
                .trigger_pipeline(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GetPipelineStatus => self
                .get_pipeline_status(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
        };
        result.unwrap_or_else(|e| ToolResult::error(format!("GitLab API Error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_connector(server: &MockServer) -> GitLabConnector {
        GitLabConnector::new(server.base_url(), "test-token")
    }

    #[tokio::test]
    async fn test_health_reports_username() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/user")
                .header("Private-Token", "test-token");
            then.status(200).json_body(serde_json::json!({ "username": "dev" }));
        });

        let result = test_connector(&server).call("gitlab_health", Value::Null).await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["user"], "dev");
    }

    #[tokio::test]
    async fn test_list_projects_maps_fields() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/projects")
                .query_param("simple", "true");
            then.status(200).json_body(serde_json::json!([
                { "id": 1, "name": "api", "path_with_namespace": "org/api",
                  "web_url": "https://gitlab.com/org/api", "visibility": "private" }
            ]));
        });

        let result = test_connector(&server)
            .call("gitlab_list_projects", Value::Null)
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["projects"][0]["path_with_namespace"], "org/api");
        assert!(payload["projects"][0].get("visibility").is_none());
    }

    #[tokio::test]
    async fn test_get_file_decodes_content() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/projects/7/repository/files/README.md")
                .query_param("ref", "main");
            then.status(200).json_body(serde_json::json!({
                "file_name": "README.md",
                "content": "IyBIZWxsbw=="
            }));
        });

        let result = test_connector(&server)
            .call(
                "gitlab_get_file",
                serde_json::json!({ "project_id": 7, "ref": "main", "file_path": "README.md" }),
            )
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        assert_eq!(result.text_content(), "# Hello");
    }

    #[tokio::test]
    async fn test_api_error_includes_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/projects/7/pipeline");
            then.status(400)
                .json_body(serde_json::json!({ "message": { "base": ["Reference not found"] } }));
        });

        let result = test_connector(&server)
            .call(
                "gitlab_trigger_pipeline",
                serde_json::json!({ "project_id": 7, "ref": "ghost" }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("GitLab API Error"));
        assert!(result.text_content().contains("Reference not found"));
    }

    #[tokio::test]
    async fn test_dotted_alias() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/user");
            then.status(200).json_body(serde_json::json!({ "username": "dev" }));
        });
        let result = test_connector(&server).call("gitlab.health", Value::Null).await;
        assert!(!result.failed());
    }

    #[test]
    fn test_from_env_requires_token_or_proxy() {
        // No env manipulation here: the constructor is exercised directly.
        let err = GitLabConnector::from_env().err();
        // When the environment happens to carry a token this is a no-op.
        if let Some(e) = err {
            assert!(e.to_string().contains("GITLAB_TOKEN"));
        }
    }
}
