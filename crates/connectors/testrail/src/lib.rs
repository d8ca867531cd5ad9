//! TestRail connector.
//!
//! TestRail routes everything through `index.php?/api/v2/...`, so paths
//! here are query-string fragments rather than clean REST segments.
//! Result statuses are mapped from names to TestRail's numeric ids.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

#[derive(Debug, Clone)]
pub struct TestRailConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub project_id: u64,
    pub suite_id: Option<u64>,
    pub run_defaults: Option<Value>,
}

/// TestRail's numeric status ids.
pub fn status_id(status: &str) -> Option<u64> {
    match status {
        "passed" => Some(1),
        "blocked" => Some(2),
        "untested" => Some(3),
        "retest" => Some(4),
        "failed" => Some(5),
        _ => None,
    }
}

enum Op {
    Health,
    Configure,
    ListTestCases,
    GetTestCase,
    CreateTestCase,
    CreateTestRun,
    CloseTestRun,
    AddTestResult,
    MapAutomatedResults,
    SearchCases,
    SearchRuns,
    ListTestPlans,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "testrail_health" => Some(Self::Health),
            "testrail_configure" => Some(Self::Configure),
            "testrail_list_test_cases" => Some(Self::ListTestCases),
            "testrail_get_test_case" => Some(Self::GetTestCase),
            "testrail_create_test_case" => Some(Self::CreateTestCase),
            "testrail_create_test_run" => Some(Self::CreateTestRun),
            "testrail_close_test_run" => Some(Self::CloseTestRun),
            "testrail_add_test_result" => Some(Self::AddTestResult),
            "testrail_map_automated_results" => Some(Self::MapAutomatedResults),
            "testrail_search_cases" => Some(Self::SearchCases),
            "testrail_search_runs" => Some(Self::SearchRuns),
            "testrail_list_test_plans" => Some(Self::ListTestPlans),
            _ => None,
        }
    }
}

#[derive(Deserialize, Default)]
struct ListCasesParams {
    suite_id: Option<u64>,
    section_id: Option<u64>,
    limit: Option<u64>,
    offset: Option<u64>,
}

pub struct TestRailConnector {
    session: SessionState<TestRailConfig>,
    client: reqwest::Client,
}

impl TestRailConnector {
    pub fn new(initial: Option<TestRailConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (
            env_var("TESTRAIL_BASE_URL"),
            env_var("TESTRAIL_USERNAME"),
            env_var("TESTRAIL_API_KEY"),
            env_var("TESTRAIL_PROJECT_ID").and_then(|v| v.parse().ok()),
        ) {
            (Some(base_url), Some(username), Some(api_key), Some(project_id)) => {
                Some(TestRailConfig {
                    base_url: normalize_base_url(&base_url),
                    username,
                    api_key,
                    project_id,
                    suite_id: env_var("TESTRAIL_SUITE_ID").and_then(|v| v.parse().ok()),
                    run_defaults: None,
                })
            }
            _ => None,
        };
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<TestRailConfig>> {
        self.session
            .require("TestRail is not configured. Call testrail_configure first.")
    }

    /// `path` is the `index.php?/api/v2/...` fragment, extra query pairs are
    /// appended with `&`.
    async fn trl_fetch(
        &self,
        cfg: &TestRailConfig,
        method: reqwest::Method,
        path: &str,
        extra_query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let mut url = format!("{}/{path}", cfg.base_url);
        for (key, value) in extra_query {
            url.push_str(&format!("&{key}={value}"));
        }
        debug!(%url, "testrail request");

        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", cfg.username, cfg.api_key));
        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Basic {auth}"))
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
            let message = data["error"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(Error::from_status(status, message));
        }
        if let Some(error) = data["error"].as_str() {
            return Err(Error::Api {
                status,
                message: error.to_string(),
            });
        }
        Ok(data)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct AuthParams {
            username: String,
            api_key: String,
        }
        #[derive(Deserialize)]
        struct Params {
            base_url: String,
            auth: AuthParams,
            project_id: u64,
            suite_id: Option<u64>,
            run_defaults: Option<Value>,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = TestRailConfig {
            base_url: normalize_base_url(&params.base_url),
            username: params.auth.username,
            api_key: params.auth.api_key,
            project_id: params.project_id,
            suite_id: params.suite_id,
            run_defaults: params.run_defaults,
        };

        let projects = self
            .trl_fetch(
                &candidate,
                reqwest::Method::GET,
                "index.php?/api/v2/get_projects",
                &[],
                None,
            )
            .await
            .map_err(|_| Error::Auth("Authentication failed".to_string()))?;
        let found = projects
            .as_array()
            .is_some_and(|list| list.iter().any(|p| p["id"] == candidate.project_id));
        if !found {
            return Err(Error::NotFound(
                "Project not found or inaccessible".to_string(),
            ));
        }

        self.session.replace(candidate);
        Ok(json!({ "ok": true }))
    }

    async fn list_cases_raw(&self, params: &ListCasesParams) -> Result<Vec<Value>> {
        let cfg = self.require()?;

        let mut query = Vec::new();
        if let Some(suite_id) = params.suite_id.or(cfg.suite_id) {
            query.push(("suite_id", suite_id.to_string()));
        }
        if let Some(section_id) = params.section_id {
            query.push(("section_id", section_id.to_string()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = params.offset {
            query.push(("offset", offset.to_string()));
        }

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("index.php?/api/v2/get_cases/{}", cfg.project_id),
                &query,
                None,
            )
            .await?;
        Ok(data
            .as_array()
            .map(|cases| {
                cases
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c["id"],
                            "title": c["title"],
                            "type_id": c["type_id"],
                            "priority_id": c["priority_id"],
                            "section_id": c["section_id"],
                            "custom_automation_type": c["custom_automation_type"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_test_case(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            case_id: u64,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("index.php?/api/v2/get_case/{}", params.case_id),
                &[],
                None,
            )
            .await?;
        let custom_fields: serde_json::Map<String, Value> = data
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| k.starts_with("custom_"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({
            "id": data["id"],
            "title": data["title"],
            "custom_preconds": data["custom_preconds"],
            "custom_steps": data["custom_steps"],
            "custom_expected": data["custom_expected"],
            "custom_automation_type": data["custom_automation_type"],
            "custom_fields": custom_fields,
        }))
    }

    async fn create_test_case(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            suite_id: Option<u64>,
            section_id: u64,
            title: String,
            custom_steps: Option<Vec<String>>,
            custom_expected: Option<String>,
            fields: Option<serde_json::Map<String, Value>>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut payload = json!({ "title": params.title });
        if let Some(steps) = params.custom_steps {
            payload["custom_steps"] = json!(steps);
        }
        if let Some(expected) = params.custom_expected {
            payload["custom_expected"] = json!(expected);
        }
        if let Some(suite_id) = params.suite_id {
            payload["suite_id"] = json!(suite_id);
        }
        if let Some(fields) = params.fields {
            for (key, value) in fields {
                payload[key] = value;
            }
        }

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("index.php?/api/v2/add_case/{}", params.section_id),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(json!({ "id": data["id"], "url": data["url"] }))
    }

    async fn create_test_run(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            case_ids: Option<Vec<u64>>,
            description: Option<String>,
            include_all: Option<bool>,
            suite_id: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut payload = json!({
            "name": params.name,
            "include_all": params.include_all.unwrap_or(false),
        });
        if let Some(case_ids) = params.case_ids {
            payload["case_ids"] = json!(case_ids);
        }
        if let Some(description) = params.description {
            payload["description"] = json!(description);
        }
        if let Some(suite_id) = params.suite_id {
            payload["suite_id"] = json!(suite_id);
        }
        if let Some(Value::Object(defaults)) = cfg.run_defaults.clone() {
            for (key, value) in defaults {
                payload[key] = value;
            }
        }

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("index.php?/api/v2/add_run/{}", cfg.project_id),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(json!({ "id": data["id"], "url": data["url"] }))
    }

    async fn close_test_run(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            run_id: u64,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("index.php?/api/v2/close_run/{}", params.run_id),
                &[],
                None,
            )
            .await?;
        Ok(json!({ "id": data["id"], "is_completed": data["is_completed"] }))
    }

    async fn add_test_result(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            test_id: u64,
            status: String,
            comment: Option<String>,
            elapsed: Option<String>,
            defects: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let status = status_id(&params.status)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown status: {}", params.status)))?;
        let mut payload = json!({ "status_id": status });
        if let Some(comment) = params.comment {
            payload["comment"] = json!(comment);
        }
        if let Some(elapsed) = params.elapsed {
            payload["elapsed"] = json!(elapsed);
        }
        if let Some(defects) = params.defects {
            payload["defects"] = json!(defects);
        }

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("index.php?/api/v2/add_result/{}", params.test_id),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(json!({ "id": data["id"], "status_id": data["status_id"] }))
    }

    async fn map_automated_results(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct ResultEntry {
            case_id: u64,
            status: String,
            comment: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            run_id: u64,
            results: Vec<ResultEntry>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut results = Vec::new();
        for entry in &params.results {
            let status = status_id(&entry.status).ok_or_else(|| {
                Error::InvalidRequest(format!("Unknown status: {}", entry.status))
            })?;
            results.push(json!({
                "case_id": entry.case_id,
                "status_id": status,
                "comment": entry.comment,
            }));
        }

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("index.php?/api/v2/add_results_for_cases/{}", params.run_id),
                &[],
                Some(&json!({ "results": results })),
            )
            .await?;
        Ok(json!({ "count": data.as_array().map(Vec::len).unwrap_or(0) }))
    }

    async fn search_cases(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            suite_id: Option<u64>,
            text: Option<String>,
            section_id: Option<u64>,
            priority_id: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;

        let mut cases = self
            .list_cases_raw(&ListCasesParams {
                suite_id: params.suite_id,
                ..ListCasesParams::default()
            })
            .await?;
        if let Some(text) = &params.text {
            let needle = text.to_lowercase();
            cases.retain(|c| {
                c["title"]
                    .as_str()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            });
        }
        if let Some(section_id) = params.section_id {
            cases.retain(|c| c["section_id"] == section_id);
        }
        if let Some(priority_id) = params.priority_id {
            cases.retain(|c| c["priority_id"] == priority_id);
        }
        Ok(json!({ "cases": cases }))
    }

    async fn search_runs(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            name: Option<String>,
            is_completed: Option<bool>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("index.php?/api/v2/get_runs/{}", cfg.project_id),
                &[],
                None,
            )
            .await?;
        let mut runs = data.as_array().cloned().unwrap_or_default();
        if let Some(name) = &params.name {
            let needle = name.to_lowercase();
            runs.retain(|r| {
                r["name"]
                    .as_str()
                    .is_some_and(|n| n.to_lowercase().contains(&needle))
            });
        }
        if let Some(is_completed) = params.is_completed {
            runs.retain(|r| r["is_completed"].as_bool().unwrap_or(false) == is_completed);
        }
        Ok(json!({ "runs": runs }))
    }

    async fn list_test_plans(&self) -> Result<Value> {
        let cfg = self.require()?;
        let data = self
            .trl_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("index.php?/api/v2/get_plans/{}", cfg.project_id),
                &[],
                None,
            )
            .await?;
        Ok(json!({ "plans": data.as_array().cloned().unwrap_or_default() }))
    }
}

#[async_trait]
impl Connector for TestRailConnector {
    fn name(&self) -> &'static str {
        "testrail"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "testrail_health",
                "Health check for TestRail MCP server.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            ),
            ToolDefinition::new(
                "testrail_configure",
                "Configure TestRail connection for this session.",
                json!({
                    "type": "object",
                    "properties": {
                        "base_url": { "type": "string" },
                        "auth": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["apikey"], "default": "apikey" },
                                "username": { "type": "string" },
                                "api_key": { "type": "string" }
                            },
                            "required": ["username", "api_key"]
                        },
                        "project_id": { "type": "number" },
                        "suite_id": { "type": "number" },
                        "run_defaults": { "type": "object" }
                    },
                    "required": ["base_url", "auth", "project_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_list_test_cases",
                "List TestRail test cases with optional suite/section filters.",
                json!({
                    "type": "object",
                    "properties": {
                        "suite_id": { "type": "number" },
                        "section_id": { "type": "number" },
                        "limit": { "type": "number" },
                        "offset": { "type": "number" }
                    },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_get_test_case",
                "Get full details for a TestRail case.",
                json!({
                    "type": "object",
                    "properties": { "case_id": { "type": "number" } },
                    "required": ["case_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_create_test_case",
                "Create a new TestRail case.",
                json!({
                    "type": "object",
                    "properties": {
                        "suite_id": { "type": "number" },
                        "section_id": { "type": "number" },
                        "title": { "type": "string" },
                        "custom_steps": { "type": "array", "items": { "type": "string" } },
                        "custom_expected": { "type": "string" },
                        "fields": { "type": "object" }
                    },
                    "required": ["section_id", "title"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_create_test_run",
                "Create a test run.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "case_ids": { "type": "array", "items": { "type": "number" } },
                        "description": { "type": "string" },
                        "include_all": { "type": "boolean" },
                        "suite_id": { "type": "number" }
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_close_test_run",
                "Close a test run.",
                json!({
                    "type": "object",
                    "properties": { "run_id": { "type": "number" } },
                    "required": ["run_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_add_test_result",
                "Add a test result to a test.",
                json!({
                    "type": "object",
                    "properties": {
                        "test_id": { "type": "number" },
                        "status": { "type": "string", "enum": ["passed", "failed", "blocked", "retest"] },
                        "comment": { "type": "string" },
                        "elapsed": { "type": "string" },
                        "defects": { "type": "string" }
                    },
                    "required": ["test_id", "status"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_map_automated_results",
                "Map automated test results to TestRail cases and post in batch.",
                json!({
                    "type": "object",
                    "properties": {
                        "run_id": { "type": "number" },
                        "results": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "case_id": { "type": "number" },
                                    "status": { "type": "string", "enum": ["passed", "failed", "blocked", "retest"] },
                                    "comment": { "type": "string" }
                                },
                                "required": ["case_id", "status"]
                            }
                        }
                    },
                    "required": ["run_id", "results"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_search_cases",
                "Search cases by title, section, or priority (simple filter).",
                json!({
                    "type": "object",
                    "properties": {
                        "suite_id": { "type": "number" },
                        "text": { "type": "string" },
                        "section_id": { "type": "number" },
                        "priority_id": { "type": "number" }
                    },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_search_runs",
                "Search runs by name/completion (simple filter).",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "is_completed": { "type": "boolean" }
                    },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "testrail_list_test_plans",
                "List test plans.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
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
            Op::ListTestCases => match parse_args::<ListCasesParams>(arguments) {
                Ok(params) => self
                    .list_cases_raw(&params)
                    .await
                    .map(|cases| json!({ "cases": cases })),
                Err(e) => Err(e),
            },
            Op::GetTestCase => self.get_test_case(arguments).await,
            Op::CreateTestCase => self.create_test_case(arguments).await,
            Op::CreateTestRun => self.create_test_run(arguments).await,
            Op::CloseTestRun => self.close_test_run(arguments).await,
            Op::AddTestResult => self.add_test_result(arguments).await,
            Op::MapAutomatedResults => self.map_automated_results(arguments).await,
            Op::SearchCases => self.search_cases(arguments).await,
            Op::SearchRuns => self.search_runs(arguments).await,
            Op::ListTestPlans => self.list_test_plans().await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::vendor_error(&e, "TESTRAIL_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(url: &str) -> TestRailConfig {
        TestRailConfig {
            base_url: url.to_string(),
            username: "qa@example.com".to_string(),
            api_key: "key".to_string(),
            project_id: 3,
            suite_id: None,
            run_defaults: None,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_id("passed"), Some(1));
        assert_eq!(status_id("failed"), Some(5));
        assert_eq!(status_id("retest"), Some(4));
        assert_eq!(status_id("bogus"), None);
    }

    #[tokio::test]
    async fn test_add_result_maps_status_name() {
        let server = MockServer::start();
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/index.php")
                .body_includes("\"status_id\":5");
            then.status(200).json_body(json!({ "id": 99, "status_id": 5 }));
        });

        let connector = TestRailConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call(
                "testrail_add_test_result",
                json!({ "test_id": 12, "status": "failed", "comment": "boom" }),
            )
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        add.assert();
    }

    #[tokio::test]
    async fn test_unknown_status_rejected_before_request() {
        let connector = TestRailConnector::new(Some(test_config("http://localhost:1")));
        let result = connector
            .call(
                "testrail_add_test_result",
                json!({ "test_id": 12, "status": "exploded" }),
            )
            .await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_configure_checks_project_visibility() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/index.php");
            then.status(200).json_body(json!([{ "id": 1 }, { "id": 2 }]));
        });

        let connector = TestRailConnector::new(None);
        let result = connector
            .call(
                "testrail_configure",
                json!({
                    "base_url": server.base_url(),
                    "auth": { "username": "qa@example.com", "api_key": "key" },
                    "project_id": 3
                }),
            )
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_FOUND");
        // Still unconfigured after the failed verification.
        let result = connector.call("testrail_list_test_plans", Value::Null).await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }
}
