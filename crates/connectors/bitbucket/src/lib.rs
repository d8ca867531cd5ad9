//! Bitbucket connector.
//!
//! Cloud and Server expose different REST shapes under different paths.
//! Rather than a deployment-mode flag, the mode is inferred from the
//! service URL: `api.bitbucket.org` means Cloud, anything else is treated
//! as a Server installation where the workspace acts as the project key.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, Error, ProxySettings, Result, SessionState, ToolDefinition, ToolResult,
};

const DEFAULT_SERVICE_URL: &str = "https://api.bitbucket.org/2.0";

#[derive(Debug, Clone)]
pub struct BitbucketConfig {
    pub service_url: String,
    pub username: String,
    pub password: String,
    pub workspace: Option<String>,
}

impl BitbucketConfig {
    pub fn is_cloud(&self) -> bool {
        self.service_url.contains("api.bitbucket.org")
    }

    fn repo_path(&self, workspace: &str, repo: &str) -> String {
        if self.is_cloud() {
            format!("/repositories/{workspace}/{repo}")
        } else {
            format!("/projects/{workspace}/repos/{repo}")
        }
    }
}

enum Op {
    Configure,
    ListRepositories,
    ListBranches,
    GetRepositoryTree,
    GetFileContent,
    CreateBranch,
    CreatePullRequest,
    ListPullRequests,
    RunPipeline,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "bitbucket_configure" => Some(Self::Configure),
            "bitbucket_list_repositories" => Some(Self::ListRepositories),
            "bitbucket_list_branches" => Some(Self::ListBranches),
            "bitbucket_get_repository_tree" => Some(Self::GetRepositoryTree),
            "bitbucket_get_file_content" => Some(Self::GetFileContent),
            "bitbucket_create_branch" => Some(Self::CreateBranch),
            "bitbucket_create_pull_request" => Some(Self::CreatePullRequest),
            "bitbucket_list_pull_requests" => Some(Self::ListPullRequests),
            "bitbucket_run_pipeline" => Some(Self::RunPipeline),
            _ => None,
        }
    }
}

pub struct BitbucketConnector {
    session: SessionState<BitbucketConfig>,
    proxy: Option<ProxySettings>,
    client: reqwest::Client,
}

impl BitbucketConnector {
    pub fn new(initial: Option<BitbucketConfig>, proxy: Option<ProxySettings>) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (env_var("BITBUCKET_USERNAME"), env_var("BITBUCKET_PASSWORD")) {
            (Some(username), Some(password)) => Some(BitbucketConfig {
                service_url: env_var("BITBUCKET_SERVICE_URL")
                    .map(|u| normalize_base_url(&u))
                    .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
                username,
                password,
                workspace: env_var("BITBUCKET_WORKSPACE"),
            }),
            _ => None,
        };
        Self::new(initial, ProxySettings::from_env())
    }

    fn require(&self) -> Result<std::sync::Arc<BitbucketConfig>> {
        self.session.require(
            "Bitbucket credentials not configured. Use bitbucket_configure or set BITBUCKET_USERNAME/PASSWORD.",
        )
    }

    fn workspace(cfg: &BitbucketConfig, requested: Option<String>) -> Result<String> {
        requested
            .or_else(|| cfg.workspace.clone())
            .ok_or_else(|| Error::InvalidRequest("workspace is required".to_string()))
    }

    fn builder(&self, cfg: &BitbucketConfig, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        match &self.proxy {
            Some(proxy) => self
                .client
                .request(method, format!("{}{path}", proxy.url))
                .header(ProxySettings::USER_HEADER, &proxy.user_id)
                .header("Content-Type", "application/json"),
            None => {
                let auth = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", cfg.username, cfg.password));
                self.client
                    .request(method, format!("{}{path}", cfg.service_url))
                    .header("Authorization", format!("Basic {auth}"))
                    .header("Content-Type", "application/json")
            }
        }
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, format!("{status} - {body}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Http(format!("failed to parse response: {e}")))
    }

    async fn send_text(&self, builder: reqwest::RequestBuilder) -> Result<String> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, format!("{status} - {body}")));
        }
        response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct AuthParams {
            username: Option<String>,
            password: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            service_url: Option<String>,
            #[serde(default)]
            auth: AuthParams,
            workspace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let previous = self.session.snapshot();
        let candidate = BitbucketConfig {
            service_url: params
                .service_url
                .map(|u| normalize_base_url(&u))
                .or_else(|| previous.as_ref().map(|p| p.service_url.clone()))
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            username: params
                .auth
                .username
                .or_else(|| previous.as_ref().map(|p| p.username.clone()))
                .ok_or_else(|| Error::InvalidRequest("auth.username is required".to_string()))?,
            password: params
                .auth
                .password
                .or_else(|| previous.as_ref().map(|p| p.password.clone()))
                .ok_or_else(|| Error::InvalidRequest("auth.password is required".to_string()))?,
            workspace: params
                .workspace
                .or_else(|| previous.as_ref().and_then(|p| p.workspace.clone())),
        };

        let verify_path = if candidate.is_cloud() {
            "/user".to_string()
        } else {
            format!("/users/{}", candidate.username)
        };
        self.send_json(self.builder(&candidate, reqwest::Method::GET, &verify_path))
            .await
            .map_err(|e| Error::Auth(format!("Auth Verification Failed: {e}")))?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true, "status": "verified" }))
    }

    async fn list_repositories(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            workspace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;

        let path = if cfg.is_cloud() {
            format!("/repositories/{workspace}")
        } else {
            format!("/projects/{workspace}/repos")
        };
        let data = self
            .send_json(
                self.builder(&cfg, reqwest::Method::GET, &path)
                    .query(&[("role", "member")]),
            )
            .await?;
        let repos: Vec<Value> = data["values"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.get("uuid").filter(|v| !v.is_null()).unwrap_or(&r["id"]),
                            "name": r["name"],
                            "slug": r["slug"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(repos))
    }

    async fn list_branches(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;

        let base = cfg.repo_path(&workspace, &params.repo_slug);
        let path = if cfg.is_cloud() {
            format!("{base}/refs/branches")
        } else {
            format!("{base}/branches")
        };
        let data = self
            .send_json(self.builder(&cfg, reqwest::Method::GET, &path))
            .await?;
        let branches: Vec<Value> = data["values"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .map(|b| {
                        json!({
                            "name": b.get("name").filter(|v| !v.is_null()).unwrap_or(&b["displayId"]),
                            "target": b["target"].get("hash").filter(|v| !v.is_null()).unwrap_or(&b["latestCommit"]),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(branches))
    }

    async fn get_repository_tree(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            branch: Option<String>,
            path: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;
        let base = cfg.repo_path(&workspace, &params.repo_slug);

        if cfg.is_cloud() {
            let commit = params.branch.unwrap_or_else(|| "HEAD".to_string());
            let path = params.path.unwrap_or_default();
            let data = self
                .send_json(self.builder(
                    &cfg,
                    reqwest::Method::GET,
                    &format!("{base}/src/{commit}/{path}"),
                ))
                .await?;
            Ok(data["values"].as_array().cloned().unwrap_or_default().into())
        } else {
            let mut builder = self.builder(
                &cfg,
                reqwest::Method::GET,
                &format!("{base}/browse/{}", params.path.unwrap_or_default()),
            );
            if let Some(branch) = params.branch {
                builder = builder.query(&[("at", branch)]);
            }
            let data = self.send_json(builder).await?;
            Ok(data["children"]["values"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into())
        }
    }

    async fn get_file_content(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            path: String,
            branch: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;

        if cfg.is_cloud() {
            let commit = params.branch.unwrap_or_else(|| "HEAD".to_string());
            let path = format!(
                "{}/src/{commit}/{}",
                cfg.repo_path(&workspace, &params.repo_slug),
                params.path
            );
            self.send_text(self.builder(&cfg, reqwest::Method::GET, &path))
                .await
        } else {
            let path = format!(
                "/projects/{workspace}/repos/{}/raw/{}",
                params.repo_slug, params.path
            );
            let mut builder = self.builder(&cfg, reqwest::Method::GET, &path);
            if let Some(branch) = params.branch {
                builder = builder.query(&[("at", branch)]);
            }
            self.send_text(builder).await
        }
    }

    async fn create_branch(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            name: String,
            from_branch: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        if !cfg.is_cloud() {
            return Err(Error::InvalidRequest(
                "Branch creation implementation limited to Cloud for MVP.".to_string(),
            ));
        }
        let workspace = Self::workspace(&cfg, params.workspace)?;

        let data = self
            .send_json(
                self.builder(
                    &cfg,
                    reqwest::Method::POST,
                    &format!(
                        "{}/refs/branches",
                        cfg.repo_path(&workspace, &params.repo_slug)
                    ),
                )
                .json(&json!({
                    "name": params.name,
                    "target": { "hash": params.from_branch },
                })),
            )
            .await?;
        Ok(format!(
            "Branch created: {}",
            data["name"].as_str().unwrap_or_default()
        ))
    }

    async fn create_pull_request(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            title: String,
            description: Option<String>,
            source_branch: String,
            target_branch: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;

        let base = cfg.repo_path(&workspace, &params.repo_slug);
        let path = if cfg.is_cloud() {
            format!("{base}/pullrequests")
        } else {
            format!("{base}/pull-requests")
        };
        let data = self
            .send_json(self.builder(&cfg, reqwest::Method::POST, &path).json(&json!({
                "title": params.title,
                "description": params.description,
                "source": { "branch": { "name": params.source_branch } },
                "destination": { "branch": { "name": params.target_branch } },
            })))
            .await?;

        let link = if data["links"]["html"]["href"].is_null() {
            data["link"]["url"].clone()
        } else {
            data["links"]["html"]["href"].clone()
        };
        Ok(json!({ "id": data["id"], "link": link, "title": data["title"] }))
    }

    async fn list_pull_requests(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            state: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let workspace = Self::workspace(&cfg, params.workspace)?;

        let base = cfg.repo_path(&workspace, &params.repo_slug);
        let path = if cfg.is_cloud() {
            format!("{base}/pullrequests")
        } else {
            format!("{base}/pull-requests")
        };
        let data = self
            .send_json(
                self.builder(&cfg, reqwest::Method::GET, &path).query(&[(
                    "state",
                    params.state.unwrap_or_else(|| "OPEN".to_string()),
                )]),
            )
            .await?;
        let prs: Vec<Value> = data["values"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .map(|p| {
                        json!({
                            "id": p["id"],
                            "title": p["title"],
                            "state": p["state"],
                            "author": p["author"]["display_name"],
                            "url": p["links"]["html"]["href"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(prs))
    }

    async fn run_pipeline(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace: Option<String>,
            repo_slug: String,
            branch: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        if !cfg.is_cloud() {
            return Err(Error::InvalidRequest(
                "Pipelines only supported on Bitbucket Cloud".to_string(),
            ));
        }
        let workspace = Self::workspace(&cfg, params.workspace)?;

        self.send_json(
            self.builder(
                &cfg,
                reqwest::Method::POST,
                &format!("{}/pipelines", cfg.repo_path(&workspace, &params.repo_slug)),
            )
            .json(&json!({
                "target": {
                    "ref_type": "branch",
                    "type": "pipeline_ref_target",
                    "ref_name": params.branch,
                }
            })),
        )
        .await
    }
}

#[async_trait]
impl Connector for BitbucketConnector {
    fn name(&self) -> &'static str {
        "bitbucket"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let repo_args = json!({
            "type": "object",
            "properties": {
                "workspace": { "type": "string" },
                "repo_slug": { "type": "string" }
            },
            "required": ["repo_slug"]
        });
        vec![
            ToolDefinition::new(
                "bitbucket_configure",
                "Configure Bitbucket connection",
                json!({
                    "type": "object",
                    "properties": {
                        "service_url": { "type": "string" },
                        "auth": {
                            "type": "object",
                            "properties": {
                                "username": { "type": "string" },
                                "password": { "type": "string" }
                            }
                        },
                        "workspace": { "type": "string" }
                    }
                }),
            ),
            ToolDefinition::new(
                "bitbucket_list_repositories",
                "List repositories in a workspace/project",
                json!({
                    "type": "object",
                    "properties": { "workspace": { "type": "string" } }
                }),
            ),
            ToolDefinition::new("bitbucket_list_branches", "List branches", repo_args.clone()),
            ToolDefinition::new(
                "bitbucket_get_repository_tree",
                "List files/directories at a path",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "branch": { "type": "string" },
                        "path": { "type": "string" }
                    },
                    "required": ["repo_slug"]
                }),
            ),
            ToolDefinition::new(
                "bitbucket_get_file_content",
                "Get raw file content",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "path": { "type": "string" },
                        "branch": { "type": "string" }
                    },
                    "required": ["repo_slug", "path"]
                }),
            ),
            ToolDefinition::new(
                "bitbucket_create_branch",
                "Create a branch (Cloud only)",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "name": { "type": "string" },
                        "from_branch": { "type": "string" }
                    },
                    "required": ["repo_slug", "name", "from_branch"]
                }),
            ),
            ToolDefinition::new(
                "bitbucket_create_pull_request",
                "Create a pull request",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "source_branch": { "type": "string" },
                        "target_branch": { "type": "string" }
                    },
                    "required": ["repo_slug", "title", "source_branch", "target_branch"]
                }),
            ),
            ToolDefinition::new(
                "bitbucket_list_pull_requests",
                "List pull requests",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "state": { "type": "string" }
                    },
                    "required": ["repo_slug"]
                }),
            ),
            ToolDefinition::new(
                "bitbucket_run_pipeline",
                "Trigger a pipeline (Cloud only)",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace": { "type": "string" },
                        "repo_slug": { "type": "string" },
                        "branch": { "type": "string" }
                    },
                    "required": ["repo_slug", "branch"]
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        debug!(tool = name, "bitbucket tool call");
        let result = match op {
            Op::Configure => self.configure(arguments).await.map(|v| ToolResult::json(&v)),
            Op::ListRepositories => self
                .list_repositories(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::ListBranches => self
                .list_branches(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GetRepositoryTree => self
                .get_repository_tree(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GetFileContent => self.get_file_content(arguments).await.map(ToolResult::text),
            Op::CreateBranch => self.create_branch(arguments).await.map(ToolResult::text),
            Op::CreatePullRequest => self
                .create_pull_request(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::ListPullRequests => self
                .list_pull_requests(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::RunPipeline => self.run_pipeline(arguments).await.map(|v| ToolResult::json(&v)),
        };
        result.unwrap_or_else(|e| ToolResult::error(format!("Bitbucket API Error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn cloud_config(url: &str) -> BitbucketConfig {
        BitbucketConfig {
            service_url: format!("{url}/api.bitbucket.org"),
            username: "dev".to_string(),
            password: "app-pass".to_string(),
            workspace: Some("acme".to_string()),
        }
    }

    fn server_config(url: &str) -> BitbucketConfig {
        BitbucketConfig {
            service_url: url.to_string(),
            username: "dev".to_string(),
            password: "app-pass".to_string(),
            workspace: Some("ACME".to_string()),
        }
    }

    #[test]
    fn test_cloud_detection_by_url() {
        assert!(cloud_config("https://x").is_cloud());
        assert!(!server_config("https://bitbucket.internal").is_cloud());
    }

    #[test]
    fn test_repo_path_shapes() {
        let cloud = cloud_config("https://x");
        assert_eq!(cloud.repo_path("acme", "web"), "/repositories/acme/web");
        let server = server_config("https://bitbucket.internal");
        assert_eq!(server.repo_path("ACME", "web"), "/projects/ACME/repos/web");
    }

    #[tokio::test]
    async fn test_server_mode_uses_project_paths() {
        let server = MockServer::start();
        let repos = server.mock(|when, then| {
            when.method(GET).path("/projects/ACME/repos");
            then.status(200).json_body(json!({
                "values": [{ "id": 7, "name": "web", "slug": "web" }]
            }));
        });

        let connector =
            BitbucketConnector::new(Some(server_config(&server.base_url())), None);
        let result = connector
            .call("bitbucket_list_repositories", Value::Null)
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload[0]["slug"], "web");
        repos.assert();
    }

    #[tokio::test]
    async fn test_pipeline_rejected_on_server() {
        let connector =
            BitbucketConnector::new(Some(server_config("https://bitbucket.internal")), None);
        let result = connector
            .call(
                "bitbucket_run_pipeline",
                json!({ "repo_slug": "web", "branch": "main" }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("only supported on Bitbucket Cloud"));
    }

    #[tokio::test]
    async fn test_configure_requires_credentials() {
        let connector = BitbucketConnector::new(None, None);
        let result = connector
            .call("bitbucket_configure", json!({ "workspace": "acme" }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("auth.username is required"));
    }
}
