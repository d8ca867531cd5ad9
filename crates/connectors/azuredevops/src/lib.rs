//! Azure DevOps connector.
//!
//! Talks to the Azure DevOps REST API (`api-version=7.1-preview.1`) with a
//! PAT passed as Basic auth with an empty user. Every outbound call runs
//! under the shared rate-limit backoff, honoring `Retry-After` on 429.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::retry::{with_backoff, RetryPolicy};
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const API_VERSION: &str = "7.1-preview.1";
const ZERO_OID: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct AzureDevOpsConfig {
    pub service_url: String,
    pub project: String,
    pub token: String,
}

enum Op {
    Health,
    Configure,
    ListRepositories,
    GetRepositoryItems,
    GetFileContent,
    CreateBranch,
    CreatePullRequest,
    ListWorkItems,
    GetWorkItem,
    UpdateWorkItem,
    RunPipeline,
    GetPipelineRuns,
    GetPipelineRunStatus,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "azuredevops_health" => Some(Self::Health),
            "azuredevops_configure" => Some(Self::Configure),
            "azuredevops_list_repositories" => Some(Self::ListRepositories),
            "azuredevops_get_repository_items" => Some(Self::GetRepositoryItems),
            "azuredevops_get_file_content" => Some(Self::GetFileContent),
            "azuredevops_create_branch" => Some(Self::CreateBranch),
            "azuredevops_create_pull_request" => Some(Self::CreatePullRequest),
            "azuredevops_list_work_items" => Some(Self::ListWorkItems),
            "azuredevops_get_work_item" => Some(Self::GetWorkItem),
            "azuredevops_update_work_item" => Some(Self::UpdateWorkItem),
            "azuredevops_run_pipeline" => Some(Self::RunPipeline),
            "azuredevops_get_pipeline_runs" => Some(Self::GetPipelineRuns),
            "azuredevops_get_pipeline_run_status" => Some(Self::GetPipelineRunStatus),
            _ => None,
        }
    }
}

pub struct AzureDevOpsConnector {
    session: SessionState<AzureDevOpsConfig>,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl AzureDevOpsConnector {
    pub fn new(initial: Option<AzureDevOpsConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (
            env_var("AZURE_DEVOPS_ORG_URL"),
            env_var("AZURE_DEVOPS_PROJECT"),
            env_var("AZURE_DEVOPS_TOKEN"),
        ) {
            (Some(service_url), Some(project), Some(token)) => Some(AzureDevOpsConfig {
                service_url: normalize_base_url(&service_url),
                project,
                token,
            }),
            _ => None,
        };
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<AzureDevOpsConfig>> {
        self.session
            .require("Azure DevOps is not configured. Call azuredevops_configure first.")
    }

    fn auth_header(token: &str) -> String {
        // PAT: Basic auth with empty user
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{token}"));
        format!("Basic {encoded}")
    }

    fn project_url(cfg: &AzureDevOpsConfig, path: &str) -> String {
        format!("{}/{}/{}", cfg.service_url, cfg.project, path)
    }

    fn org_url(cfg: &AzureDevOpsConfig, path: &str) -> String {
        format!("{}/{}", cfg.service_url, path)
    }

    /// One HTTP attempt. 429 is classified as `RATE_LIMITED` with the
    /// server's `Retry-After` so the backoff wrapper can honor it.
    async fn send_once(
        &self,
        cfg: &AzureDevOpsConfig,
        method: &reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        content_type: &str,
    ) -> Result<Value> {
        debug!(%url, "azure devops request");

        let mut builder = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json")
            .header("Authorization", Self::auth_header(&cfg.token))
            .query(&[("api-version", API_VERSION)]);
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", content_type)
                .body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(Error::rate_limited(
                "Azure DevOps request failed (429)",
                retry_after,
            ));
        }
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(Error::from_status(
                status.as_u16(),
                format!("Azure DevOps request failed ({}): {details}", status.as_u16()),
            ));
        }

        let is_json = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);
        if is_json {
            response
                .json::<Value>()
                .await
                .map_err(|e| Error::Http(format!("failed to parse response: {e}")))
        } else {
            Ok(Value::String(response.text().await.unwrap_or_default()))
        }
    }

    async fn ado_fetch(
        &self,
        cfg: &AzureDevOpsConfig,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        self.ado_fetch_with_content_type(cfg, method, url, query, body, "application/json")
            .await
    }

    async fn ado_fetch_with_content_type(
        &self,
        cfg: &AzureDevOpsConfig,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        content_type: &str,
    ) -> Result<Value> {
        with_backoff(&self.retry, || {
            self.send_once(cfg, &method, url, query, body, content_type)
        })
        .await
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            service_url: String,
            project: String,
            token: String,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = AzureDevOpsConfig {
            service_url: normalize_base_url(&params.service_url),
            project: params.project,
            token: params.token,
        };

        let url = Self::project_url(&candidate, "_apis/projects");
        self.ado_fetch(&candidate, reqwest::Method::GET, &url, &[], None)
            .await
            .map_err(|e| match e {
                Error::Auth(_) => Error::Auth("Azure DevOps token validation failed".to_string()),
                other => other,
            })?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true }))
    }

    async fn list_repositories(&self) -> Result<Value> {
        let cfg = self.require()?;
        let url = Self::project_url(&cfg, "_apis/git/repositories");
        let data = self
            .ado_fetch(&cfg, reqwest::Method::GET, &url, &[], None)
            .await?;
        let repos: Vec<Value> = data["value"]
            .as_array()
            .map(|v| {
                v.iter()
                    .map(|r| {
                        json!({
                            "id": r["id"],
                            "name": r["name"],
                            "webUrl": r["webUrl"],
                            "remoteUrl": r["remoteUrl"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "repositories": repos }))
    }

    async fn get_repository_items(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            repository_id: String,
            path: Option<String>,
            #[serde(rename = "recursionLevel")]
            recursion_level: Option<String>,
            version: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut query = vec![
            ("scopePath", params.path.unwrap_or_else(|| "/".to_string())),
            (
                "recursionLevel",
                params
                    .recursion_level
                    .unwrap_or_else(|| "oneLevel".to_string()),
            ),
            ("includeContent", "false".to_string()),
        ];
        if let Some(version) = params.version {
            query.push(("versionDescriptor.version", version));
        }

        let url = Self::project_url(
            &cfg,
            &format!("_apis/git/repositories/{}/items", params.repository_id),
        );
        let data = self
            .ado_fetch(&cfg, reqwest::Method::GET, &url, &query, None)
            .await?;
        Ok(json!({ "items": data["value"].as_array().cloned().unwrap_or_default() }))
    }

    async fn get_file_content(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            repository_id: String,
            path: String,
            version: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut query = vec![
            ("path", params.path),
            ("includeContent", "true".to_string()),
        ];
        if let Some(version) = params.version {
            query.push(("versionDescriptor.version", version));
        }

        let url = Self::project_url(
            &cfg,
            &format!("_apis/git/repositories/{}/items", params.repository_id),
        );
        let data = self
            .ado_fetch(&cfg, reqwest::Method::GET, &url, &query, None)
            .await?;
        Ok(json!({ "content": data["content"].as_str().unwrap_or_default() }))
    }

    async fn create_branch(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            repository_id: String,
            source_branch: String,
            new_branch: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let refs_url = Self::project_url(
            &cfg,
            &format!("_apis/git/repositories/{}/refs", params.repository_id),
        );
        let refs = self
            .ado_fetch(
                &cfg,
                reqwest::Method::GET,
                &refs_url,
                &[("filter", format!("heads/{}", params.source_branch))],
                None,
            )
            .await?;
        let base_oid = refs["value"][0]["objectId"]
            .as_str()
            .ok_or_else(|| Error::NotFound("Source branch not found".to_string()))?
            .to_string();

        let payload = json!([{
            "name": format!("refs/heads/{}", params.new_branch),
            "oldObjectId": ZERO_OID,
            "newObjectId": base_oid,
        }]);
        self.ado_fetch(&cfg, reqwest::Method::POST, &refs_url, &[], Some(&payload))
            .await?;
        Ok(json!({ "ok": true }))
    }

    async fn create_pull_request(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            repository_id: String,
            source_branch: String,
            target_branch: String,
            title: String,
            description: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let url = Self::project_url(
            &cfg,
            &format!(
                "_apis/git/repositories/{}/pullrequests",
                params.repository_id
            ),
        );
        let payload = json!({
            "sourceRefName": format!("refs/heads/{}", params.source_branch),
            "targetRefName": format!("refs/heads/{}", params.target_branch),
            "title": params.title,
            "description": params.description.unwrap_or_default(),
        });
        let pr = self
            .ado_fetch(&cfg, reqwest::Method::POST, &url, &[], Some(&payload))
            .await?;
        Ok(json!({
            "id": pr["pullRequestId"],
            "webUrl": pr["_links"]["web"]["href"],
            "title": pr["title"],
            "description": pr["description"],
        }))
    }

    async fn list_work_items(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            wiql: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let url = Self::org_url(&cfg, "_apis/wit/wiql");
        let payload = json!({ "query": params.wiql });
        let data = self
            .ado_fetch(&cfg, reqwest::Method::POST, &url, &[], Some(&payload))
            .await?;
        let ids: Vec<Value> = data["workItems"]
            .as_array()
            .map(|items| items.iter().map(|w| w["id"].clone()).collect())
            .unwrap_or_default();
        Ok(json!({ "ids": ids }))
    }

    async fn get_work_item(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            id: u64,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let url = Self::org_url(&cfg, &format!("_apis/wit/workitems/{}", params.id));
        self.ado_fetch(&cfg, reqwest::Method::GET, &url, &[], None)
            .await
    }

    async fn update_work_item(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            id: u64,
            fields: serde_json::Map<String, Value>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let operations: Vec<Value> = params
            .fields
            .iter()
            .map(|(field, value)| {
                json!({ "op": "add", "path": format!("/fields/{field}"), "value": value })
            })
            .collect();

        let url = Self::org_url(&cfg, &format!("_apis/wit/workitems/{}", params.id));
        self.ado_fetch_with_content_type(
            &cfg,
            reqwest::Method::PATCH,
            &url,
            &[],
            Some(&Value::Array(operations)),
            "application/json-patch+json",
        )
        .await
    }

    async fn run_pipeline(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            pipeline_id: u64,
            branch: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let url = Self::project_url(&cfg, &format!("_apis/pipelines/{}/runs", params.pipeline_id));
        let payload = json!({
            "resources": {
                "repositories": {
                    "self": { "refName": format!("refs/heads/{}", params.branch) }
                }
            }
        });
        let data = self
            .ado_fetch(&cfg, reqwest::Method::POST, &url, &[], Some(&payload))
            .await?;
        Ok(json!({ "runId": data["id"], "state": data["state"] }))
    }

    async fn get_pipeline_runs(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            pipeline_id: u64,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let url = Self::project_url(&cfg, &format!("_apis/pipelines/{}/runs", params.pipeline_id));
        let data = self
            .ado_fetch(&cfg, reqwest::Method::GET, &url, &[], None)
            .await?;
        Ok(json!({ "runs": data["value"].as_array().cloned().unwrap_or_default() }))
    }

    async fn get_pipeline_run_status(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            pipeline_id: u64,
            run_id: u64,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let url = Self::project_url(
            &cfg,
            &format!("_apis/pipelines/{}/runs/{}", params.pipeline_id, params.run_id),
        );
        let data = self
            .ado_fetch(&cfg, reqwest::Method::GET, &url, &[], None)
            .await?;
        Ok(json!({ "state": data["state"], "result": data["result"] }))
    }
}

#[async_trait]
impl Connector for AzureDevOpsConnector {
    fn name(&self) -> &'static str {
        "azuredevops"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let empty = json!({ "type": "object", "properties": {}, "additionalProperties": false });
        vec![
            ToolDefinition::new(
                "azuredevops_health",
                "Health check for Azure DevOps MCP server.",
                empty.clone(),
            ),
            ToolDefinition::new(
                "azuredevops_configure",
                "Configure Azure DevOps connection for this session.",
                json!({
                    "type": "object",
                    "properties": {
                        "service_url": { "type": "string" },
                        "project": { "type": "string" },
                        "token": { "type": "string" }
                    },
                    "required": ["service_url", "project", "token"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_list_repositories",
                "List repositories in the configured project.",
                empty.clone(),
            ),
            ToolDefinition::new(
                "azuredevops_get_repository_items",
                "List files/folders within a repository path.",
                json!({
                    "type": "object",
                    "properties": {
                        "repository_id": { "type": "string" },
                        "path": { "type": "string", "default": "/" },
                        "recursionLevel": { "type": "string", "enum": ["none", "oneLevel", "full"] },
                        "version": { "type": "string", "description": "Branch or commit (optional)" }
                    },
                    "required": ["repository_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_get_file_content",
                "Get file contents from a repository.",
                json!({
                    "type": "object",
                    "properties": {
                        "repository_id": { "type": "string" },
                        "path": { "type": "string" },
                        "version": { "type": "string" }
                    },
                    "required": ["repository_id", "path"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_create_branch",
                "Create a new branch from a target branch.",
                json!({
                    "type": "object",
                    "properties": {
                        "repository_id": { "type": "string" },
                        "source_branch": { "type": "string" },
                        "new_branch": { "type": "string" }
                    },
                    "required": ["repository_id", "source_branch", "new_branch"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_create_pull_request",
                "Create a pull request.",
                json!({
                    "type": "object",
                    "properties": {
                        "repository_id": { "type": "string" },
                        "source_branch": { "type": "string" },
                        "target_branch": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["repository_id", "source_branch", "target_branch", "title"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_list_work_items",
                "List work items using a WIQL query.",
                json!({
                    "type": "object",
                    "properties": { "wiql": { "type": "string" } },
                    "required": ["wiql"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_get_work_item",
                "Get a work item by ID.",
                json!({
                    "type": "object",
                    "properties": { "id": { "type": "number" } },
                    "required": ["id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_update_work_item",
                "Update work item fields (atomic).",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "number" },
                        "fields": { "type": "object", "description": "Key-value map of fields to update" }
                    },
                    "required": ["id", "fields"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_run_pipeline",
                "Trigger a pipeline run for a given branch.",
                json!({
                    "type": "object",
                    "properties": {
                        "pipeline_id": { "type": "number" },
                        "branch": { "type": "string" }
                    },
                    "required": ["pipeline_id", "branch"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_get_pipeline_runs",
                "List pipeline runs.",
                json!({
                    "type": "object",
                    "properties": { "pipeline_id": { "type": "number" } },
                    "required": ["pipeline_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "azuredevops_get_pipeline_run_status",
                "Get status of a pipeline run.",
                json!({
                    "type": "object",
                    "properties": {
                        "pipeline_id": { "type": "number" },
                        "run_id": { "type": "number" }
                    },
                    "required": ["pipeline_id", "run_id"],
                    "additionalProperties": false
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::Health => Ok(json!({ "ok": true })),
            Op::Configure => self.configure(arguments).await,
            Op::ListRepositories => self.list_repositories().await,
            Op::GetRepositoryItems => self.get_repository_items(arguments).await,
            Op::GetFileContent => self.get_file_content(arguments).await,
            Op::CreateBranch => self.create_branch(arguments).await,
            Op::CreatePullRequest => self.create_pull_request(arguments).await,
            Op::ListWorkItems => self.list_work_items(arguments).await,
            Op::GetWorkItem => self.get_work_item(arguments).await,
            Op::UpdateWorkItem => self.update_work_item(arguments).await,
            Op::RunPipeline => self.run_pipeline(arguments).await,
            Op::GetPipelineRuns => self.get_pipeline_runs(arguments).await,
            Op::GetPipelineRunStatus => self.get_pipeline_run_status(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::structured_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(base_url: &str) -> AzureDevOpsConfig {
        AzureDevOpsConfig {
            service_url: base_url.to_string(),
            project: "proj".to_string(),
            token: "pat".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retries_on_429_honoring_retry_after() {
        let server = MockServer::start();
        let throttled = server.mock(|when, then| {
            when.method(GET).path("/proj/_apis/git/repositories");
            then.status(429)
                .header("Retry-After", "0")
                .body("too many requests");
        });

        let connector = AzureDevOpsConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call("azuredevops_list_repositories", Value::Null)
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "RATE_LIMITED");
        // initial attempt + 3 retries
        assert_eq!(throttled.hits(), 4);
    }

    #[tokio::test]
    async fn test_list_repositories_shapes_output() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/proj/_apis/git/repositories")
                .query_param("api-version", API_VERSION);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                "value": [
                    { "id": "r1", "name": "api", "webUrl": "https://dev.azure.com/r1", "remoteUrl": "git@r1", "extra": "dropped" }
                ]
            }));
        });

        let connector = AzureDevOpsConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call("azuredevops_list_repositories", Value::Null)
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["repositories"][0]["name"], "api");
        assert!(payload["repositories"][0].get("extra").is_none());
    }

    #[tokio::test]
    async fn test_create_branch_missing_source() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/proj/_apis/git/repositories/r1/refs");
            then.status(200).json_body(serde_json::json!({ "value": [] }));
        });

        let connector = AzureDevOpsConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call(
                "azuredevops_create_branch",
                serde_json::json!({
                    "repository_id": "r1",
                    "source_branch": "ghost",
                    "new_branch": "feature"
                }),
            )
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_not_configured() {
        let connector = AzureDevOpsConnector::new(None);
        let result = connector
            .call("azuredevops_list_repositories", Value::Null)
            .await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_health_needs_no_config() {
        let connector = AzureDevOpsConnector::new(None);
        let result = connector.call("azuredevops_health", Value::Null).await;
        assert!(!result.failed());
        assert!(result.text_content().contains("ok"));
    }
}
