//! GitHub connector.
//!
//! Mixes remote REST operations (search, issues, pull requests) with local
//! `git` subprocess operations (add, commit, push) the way the host
//! workflows expect: stage and commit locally, then open the PR remotely.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, Error, ProxySettings, Result, SessionState, ToolDefinition, ToolResult,
};

const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "flocca-tools";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
}

enum Op {
    SearchRepositories,
    ReadFile,
    CreateIssue,
    CreatePullRequest,
    MergePullRequest,
    GitAdd,
    GitCommit,
    GitPush,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "search_repositories" => Some(Self::SearchRepositories),
            "read_file" => Some(Self::ReadFile),
            "create_issue" => Some(Self::CreateIssue),
            "create_pull_request" => Some(Self::CreatePullRequest),
            "merge_pull_request" => Some(Self::MergePullRequest),
            "git_add" => Some(Self::GitAdd),
            "git_commit" => Some(Self::GitCommit),
            "git_push" => Some(Self::GitPush),
            _ => None,
        }
    }
}

pub struct GitHubConnector {
    session: SessionState<GitHubConfig>,
    proxy: Option<ProxySettings>,
    base_url: String,
    client: reqwest::Client,
}

impl GitHubConnector {
    pub fn new(
        initial: Option<GitHubConfig>,
        proxy: Option<ProxySettings>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            base_url: base_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let token = env_var("GITHUB_PERSONAL_ACCESS_TOKEN").or_else(|| env_var("GITHUB_TOKEN"));
        Self::new(
            token.map(|token| GitHubConfig { token }),
            ProxySettings::from_env(),
            env_var("GITHUB_API_URL"),
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        if let Some(proxy) = &self.proxy {
            let url = format!("{}{path}", proxy.url);
            return Ok(self
                .client
                .request(method, url)
                .header(ProxySettings::USER_HEADER, &proxy.user_id)
                .header("Accept", "application/vnd.github+json"));
        }

        let cfg = self
            .session
            .require("GitHub Not Configured. token missing.")?;
        let url = format!("{}{path}", self.base_url);
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or(text);
            return Err(Error::from_status(status.as_u16(), message));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Http(format!("failed to parse response: {e}")))
    }

    async fn search_repositories(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            page: Option<u32>,
            per_page: Option<u32>,
        }
        let params: Params = parse_args(arguments)?;

        let builder = self
            .request(reqwest::Method::GET, "/search/repositories")?
            .query(&[
                ("q", params.query),
                ("page", params.page.unwrap_or(1).to_string()),
                ("per_page", params.per_page.unwrap_or(10).to_string()),
            ]);
        let data = self.send(builder).await?;

        let repos: Vec<Value> = data["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|r| {
                        json!({
                            "name": r["name"],
                            "full_name": r["full_name"],
                            "html_url": r["html_url"],
                            "description": r["description"],
                            "stars": r["stargazers_count"],
                            "language": r["language"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(repos))
    }

    async fn read_file(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            owner: String,
            repo: String,
            path: String,
            r#ref: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let mut builder = self.request(
            reqwest::Method::GET,
            &format!(
                "/repos/{}/{}/contents/{}",
                params.owner, params.repo, params.path
            ),
        )?;
        if let Some(reference) = params.r#ref {
            builder = builder.query(&[("ref", reference)]);
        }
        let data = self.send(builder).await?;

        if data.is_array() {
            return Err(Error::InvalidRequest(
                "Path is a directory, not a file.".to_string(),
            ));
        }
        if data["type"] != "file" {
            return Err(Error::InvalidRequest("Target is not a file.".to_string()));
        }

        // GitHub wraps the base64 payload across lines.
        let raw: String = data["content"]
            .as_str()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| Error::InvalidRequest(format!("Invalid file encoding: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| Error::InvalidRequest(format!("File is not valid UTF-8: {e}")))
    }

    async fn create_issue(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            owner: String,
            repo: String,
            title: String,
            body: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{}/issues", params.owner, params.repo),
            )?
            .json(&json!({ "title": params.title, "body": params.body }));
        let data = self.send(builder).await?;
        Ok(json!({ "number": data["number"], "html_url": data["html_url"] }))
    }

    async fn create_pull_request(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            owner: String,
            repo: String,
            title: String,
            head: String,
            base: String,
            body: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/{}/pulls", params.owner, params.repo),
            )?
            .json(&json!({
                "title": params.title,
                "head": params.head,
                "base": params.base,
                "body": params.body,
            }));
        let data = self.send(builder).await?;
        Ok(json!({ "number": data["number"], "html_url": data["html_url"] }))
    }

    async fn merge_pull_request(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            owner: String,
            repo: String,
            pull_number: u64,
            merge_method: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let builder = self
            .request(
                reqwest::Method::PUT,
                &format!(
                    "/repos/{}/{}/pulls/{}/merge",
                    params.owner, params.repo, params.pull_number
                ),
            )?
            .json(&json!({
                "merge_method": params.merge_method.unwrap_or_else(|| "merge".to_string()),
            }));
        let data = self.send(builder).await?;
        Ok(json!({ "merged": data["merged"], "message": data["message"] }))
    }

    async fn git_add(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            files: Vec<String>,
        }
        let params: Params = parse_args(arguments)?;
        if params.files.is_empty() {
            return Err(Error::InvalidRequest(
                "files must contain at least one path".to_string(),
            ));
        }

        let mut args = vec!["add".to_string()];
        args.extend(params.files.iter().cloned());
        run_git(&args).await?;
        Ok(format!("Successfully staged: {}", params.files.join(" ")))
    }

    async fn git_commit(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            message: String,
        }
        let params: Params = parse_args(arguments)?;
        run_git(&["commit".to_string(), "-m".to_string(), params.message.clone()]).await?;
        Ok(format!("Committed with message: {}", params.message))
    }

    async fn git_push(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize, Default)]
        struct Params {
            remote: Option<String>,
            branch: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let remote = params.remote.unwrap_or_else(|| "origin".to_string());

        let mut args = vec!["push".to_string(), remote.clone()];
        if let Some(branch) = &params.branch {
            args.push(branch.clone());
        }
        run_git(&args).await?;
        Ok(match params.branch {
            Some(branch) => format!("Pushed to {remote} {branch}"),
            None => format!("Pushed to {remote}"),
        })
    }
}

/// Run a local git command, returning stdout on success.
async fn run_git(args: &[String]) -> Result<String> {
    debug!(?args, "running git");
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Subprocess(format!("failed to spawn git: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Subprocess(if stderr.is_empty() {
            "git command failed".to_string()
        } else {
            stderr
        }));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[async_trait]
impl Connector for GitHubConnector {
    fn name(&self) -> &'static str {
        "github"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "search_repositories",
                "Search GitHub Repositories",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "page": { "type": "number" },
                        "per_page": { "type": "number" }
                    },
                    "required": ["query"]
                }),
            ),
            ToolDefinition::new(
                "read_file",
                "Read file content",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": { "type": "string" },
                        "repo": { "type": "string" },
                        "path": { "type": "string" },
                        "ref": { "type": "string" }
                    },
                    "required": ["owner", "repo", "path"]
                }),
            ),
            ToolDefinition::new(
                "create_issue",
                "Create an Issue",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": { "type": "string" },
                        "repo": { "type": "string" },
                        "title": { "type": "string" },
                        "body": { "type": "string" }
                    },
                    "required": ["owner", "repo", "title"]
                }),
            ),
            ToolDefinition::new(
                "create_pull_request",
                "Create a Pull Request",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": { "type": "string" },
                        "repo": { "type": "string" },
                        "title": { "type": "string" },
                        "head": { "type": "string", "description": "The name of the branch where your changes are implemented." },
                        "base": { "type": "string", "description": "The name of the branch you want the changes pulled into." },
                        "body": { "type": "string" }
                    },
                    "required": ["owner", "repo", "title", "head", "base"]
                }),
            ),
            ToolDefinition::new(
                "merge_pull_request",
                "Merge a Pull Request",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": { "type": "string" },
                        "repo": { "type": "string" },
                        "pull_number": { "type": "number" },
                        "merge_method": { "type": "string", "enum": ["merge", "squash", "rebase"] }
                    },
                    "required": ["owner", "repo", "pull_number"]
                }),
            ),
            ToolDefinition::new(
                "git_add",
                "Stage files for commit (git add)",
                json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "List of files to add, or [\".\"] for all"
                        }
                    },
                    "required": ["files"]
                }),
            ),
            ToolDefinition::new(
                "git_commit",
                "Commit staged changes (git commit)",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            ),
            ToolDefinition::new(
                "git_push",
                "Push changes to remote (git push)",
                json!({
                    "type": "object",
                    "properties": {
                        "remote": { "type": "string", "default": "origin" },
                        "branch": { "type": "string" }
                    }
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::SearchRepositories => self
                .search_repositories(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::ReadFile => self.read_file(arguments).await.map(ToolResult::text),
            Op::CreateIssue => self.create_issue(arguments).await.map(|v| ToolResult::json(&v)),
            Op::CreatePullRequest => self
                .create_pull_request(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::MergePullRequest => self
                .merge_pull_request(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
            Op::GitAdd => self.git_add(arguments).await.map(ToolResult::text),
            Op::GitCommit => self.git_commit(arguments).await.map(ToolResult::text),
            Op::GitPush => self.git_push(arguments).await.map(ToolResult::text),
        };
        result.unwrap_or_else(|e| ToolResult::error(format!("GitHub Error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_connector(server: &MockServer) -> GitHubConnector {
        GitHubConnector::new(
            Some(GitHubConfig {
                token: "test-token".to_string(),
            }),
            None,
            Some(server.base_url()),
        )
    }

    #[tokio::test]
    async fn test_search_repositories_maps_fields() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/search/repositories")
                .query_param("q", "rust mcp")
                .header("Authorization", "Bearer test-token");
            then.status(200).json_body(serde_json::json!({
                "items": [{
                    "name": "flocca",
                    "full_name": "flocca/flocca",
                    "html_url": "https://github.com/flocca/flocca",
                    "description": "tools",
                    "stargazers_count": 42,
                    "language": "Rust",
                    "private": false
                }]
            }));
        });

        let connector = test_connector(&server);
        let result = connector
            .call("search_repositories", serde_json::json!({ "query": "rust mcp" }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let repos: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(repos[0]["full_name"], "flocca/flocca");
        assert_eq!(repos[0]["stars"], 42);
        assert!(repos[0].get("private").is_none());
    }

    #[tokio::test]
    async fn test_read_file_decodes_base64() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/o/r/contents/src/lib.rs");
            then.status(200).json_body(serde_json::json!({
                "type": "file",
                "encoding": "base64",
                "content": "aGVsbG8g\nd29ybGQ=\n"
            }));
        });

        let connector = test_connector(&server);
        let result = connector
            .call(
                "read_file",
                serde_json::json!({ "owner": "o", "repo": "r", "path": "src/lib.rs" }),
            )
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        assert_eq!(result.text_content(), "hello world");
    }

    #[tokio::test]
    async fn test_read_file_rejects_directories() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/o/r/contents/src");
            then.status(200).json_body(serde_json::json!([{ "type": "dir" }]));
        });

        let connector = test_connector(&server);
        let result = connector
            .call(
                "read_file",
                serde_json::json!({ "owner": "o", "repo": "r", "path": "src" }),
            )
            .await;

        assert!(result.failed());
        assert!(result.text_content().contains("directory"));
    }

    #[tokio::test]
    async fn test_unconfigured_rest_call() {
        let connector = GitHubConnector::new(None, None, None);
        let result = connector
            .call("search_repositories", serde_json::json!({ "query": "x" }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Not Configured"));
    }

    #[tokio::test]
    async fn test_git_add_requires_files() {
        let connector = GitHubConnector::new(None, None, None);
        let result = connector
            .call("git_add", serde_json::json!({ "files": [] }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("at least one path"));
    }

    #[tokio::test]
    async fn test_api_error_surfaces_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/repos/o/r/issues");
            then.status(422)
                .json_body(serde_json::json!({ "message": "Validation Failed" }));
        });

        let connector = test_connector(&server);
        let result = connector
            .call(
                "create_issue",
                serde_json::json!({ "owner": "o", "repo": "r", "title": "t" }),
            )
            .await;

        assert!(result.failed());
        assert!(result.text_content().contains("Validation Failed"));
    }
}
