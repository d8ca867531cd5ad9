//! Zephyr Scale (cloud) connector.
//!
//! Configuration verifies two things: the Jira identity behind the token
//! and that Zephyr Scale is actually available on the site. A `read_only`
//! flag in the session blocks every mutating tool with `READ_ONLY_MODE`.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const MAX_BATCH_RESULTS: usize = 500;
const MAX_ATTACHMENT_SIZE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ZephyrConfig {
    pub site_url: String,
    pub token: String,
    pub jira_project_key: String,
    pub zephyr_project_key: String,
    pub default_folder_id: Option<String>,
    pub read_only: bool,
    pub identity: String,
}

enum Op {
    Health,
    Configure,
    GetContext,
    ListFolders,
    SearchTestCases,
    GetTestCase,
    CreateTestCase,
    UpdateTestCase,
    CreateTestCycle,
    AddTestsToCycle,
    ListTestExecutions,
    UpdateExecutionStatus,
    PublishAutomationResults,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "zephyr_health" => Some(Self::Health),
            "zephyr_configure" => Some(Self::Configure),
            "zephyr_get_context" => Some(Self::GetContext),
            "zephyr_list_folders" => Some(Self::ListFolders),
            "zephyr_search_test_cases" => Some(Self::SearchTestCases),
            "zephyr_get_test_case" => Some(Self::GetTestCase),
            "zephyr_create_test_case" => Some(Self::CreateTestCase),
            "zephyr_update_test_case" => Some(Self::UpdateTestCase),
            "zephyr_create_test_cycle" => Some(Self::CreateTestCycle),
            "zephyr_add_tests_to_cycle" => Some(Self::AddTestsToCycle),
            "zephyr_list_test_executions" => Some(Self::ListTestExecutions),
            "zephyr_update_execution_status" => Some(Self::UpdateExecutionStatus),
            "zephyr_publish_automation_results" => Some(Self::PublishAutomationResults),
            _ => None,
        }
    }

    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::CreateTestCase
                | Self::UpdateTestCase
                | Self::CreateTestCycle
                | Self::AddTestsToCycle
                | Self::UpdateExecutionStatus
                | Self::PublishAutomationResults
        )
    }
}

#[derive(Deserialize)]
struct StepInput {
    action: Option<String>,
    data: Option<String>,
    expected: Option<String>,
}

fn test_script(steps: &[StepInput]) -> Value {
    let steps: Vec<Value> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            json!({
                "index": i + 1,
                "action": s.action,
                "data": s.data,
                "expectedResult": s.expected,
            })
        })
        .collect();
    json!({ "type": "STEP_BY_STEP", "steps": steps })
}

pub struct ZephyrConnector {
    session: SessionState<ZephyrConfig>,
    client: reqwest::Client,
}

impl ZephyrConnector {
    pub fn new(initial: Option<ZephyrConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (
            env_var("ZEPHYR_SITE_URL"),
            env_var("ZEPHYR_TOKEN"),
            env_var("ZEPHYR_JIRA_PROJECT_KEY"),
        ) {
            (Some(site_url), Some(token), Some(project_key)) => Some(ZephyrConfig {
                site_url: normalize_base_url(&site_url),
                token,
                jira_project_key: project_key.clone(),
                zephyr_project_key: project_key,
                default_folder_id: None,
                read_only: false,
                identity: "env".to_string(),
            }),
            _ => None,
        };
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<ZephyrConfig>> {
        self.session
            .require("Zephyr not configured. Call zephyr_configure first.")
    }

    async fn zephyr_fetch(
        &self,
        cfg: &ZephyrConfig,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{path}", cfg.site_url);
        debug!(%url, "zephyr request");

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .header("Content-Type", "application/json");
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
        let data = response.json::<Value>().await.unwrap_or(json!({}));

        if !(200..300).contains(&status) || !data["error"].is_null() || !data["errors"].is_null() {
            let detail = if data["error"].is_null() {
                &data["errors"]
            } else {
                &data["error"]
            };
            let message = detail["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Zephyr request failed ({status})"));
            return Err(Error::from_status(status.max(400), message));
        }
        Ok(data)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct AuthParams {
            access_token: String,
        }
        #[derive(Deserialize)]
        struct JiraParams {
            project_key: String,
        }
        #[derive(Deserialize, Default)]
        struct ZephyrParams {
            default_test_project_key: Option<String>,
            default_folder_id: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            site_url: String,
            auth: AuthParams,
            jira: JiraParams,
            #[serde(default)]
            zephyr: ZephyrParams,
            #[serde(default)]
            read_only: bool,
        }
        let params: Params = parse_args(arguments)?;

        let mut candidate = ZephyrConfig {
            site_url: normalize_base_url(&params.site_url),
            token: params.auth.access_token,
            jira_project_key: params.jira.project_key.clone(),
            zephyr_project_key: params
                .zephyr
                .default_test_project_key
                .unwrap_or(params.jira.project_key),
            default_folder_id: params.zephyr.default_folder_id,
            read_only: params.read_only,
            identity: String::new(),
        };

        // Jira identity check.
        let me = self
            .zephyr_fetch(
                &candidate,
                reqwest::Method::GET,
                "/rest/api/3/myself",
                &[],
                None,
            )
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;
        candidate.identity = me["accountId"]
            .as_str()
            .map(|id| format!("account:{id}"))
            .or_else(|| me["emailAddress"].as_str().map(String::from))
            .unwrap_or_else(|| "unknown".to_string());

        // Zephyr Scale capability probe.
        self.zephyr_fetch(
            &candidate,
            reqwest::Method::GET,
            "/rest/atm/1.0/testproject",
            &[],
            None,
        )
        .await
        .map_err(|_| {
            Error::InvalidRequest(
                "Zephyr Scale not available or token lacks permission".to_string(),
            )
        })?;

        let identity = candidate.identity.clone();
        self.session.replace(candidate);
        Ok(json!({ "ok": true, "identity": identity, "product": "zephyr_scale" }))
    }

    async fn get_context(&self) -> Result<Value> {
        let cfg = self.require()?;
        let projects = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::GET,
                "/rest/atm/1.0/testproject",
                &[],
                None,
            )
            .await?;
        let test_projects = if projects["values"].is_array() {
            projects["values"].clone()
        } else {
            projects
        };
        Ok(json!({
            "jira_project_key": cfg.jira_project_key,
            "zephyr_product": "zephyr_scale",
            "test_projects": test_projects,
        }))
    }

    async fn list_folders(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            project_key: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let project = params
            .project_key
            .unwrap_or_else(|| cfg.zephyr_project_key.clone());
        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::GET,
                "/rest/atm/1.0/folder/testcase",
                &[("projectKey", project), ("maxResults", "500".to_string())],
                None,
            )
            .await?;
        let folders = if data["values"].is_array() {
            data["values"].clone()
        } else {
            data
        };
        Ok(json!({ "folders": folders }))
    }

    async fn search_test_cases(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            folder_id: Option<String>,
            project_key: Option<String>,
            limit: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let project = params
            .project_key
            .unwrap_or_else(|| cfg.zephyr_project_key.clone());
        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::POST,
                "/rest/atm/1.0/testcase/search",
                &[],
                Some(&json!({
                    "projectKey": project,
                    "query": params.query,
                    "folderId": params.folder_id,
                    "maxResults": params.limit.unwrap_or(50),
                })),
            )
            .await?;
        Ok(json!({ "results": data["values"].as_array().cloned().unwrap_or_default() }))
    }

    async fn get_test_case(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            key: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        self.zephyr_fetch(
            &cfg,
            reqwest::Method::GET,
            &format!("/rest/atm/1.0/testcase/{}", params.key),
            &[],
            None,
        )
        .await
    }

    async fn create_test_case(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Links {
            jira_issue_keys: Option<Vec<String>>,
        }
        #[derive(Deserialize)]
        struct Params {
            title: String,
            objective: Option<String>,
            precondition: Option<String>,
            steps: Option<Vec<StepInput>>,
            labels: Option<Vec<String>>,
            folder_id: Option<String>,
            #[serde(default)]
            links: Links,
            project_key: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut payload = json!({
            "projectKey": params
                .project_key
                .unwrap_or_else(|| cfg.zephyr_project_key.clone()),
            "name": params.title,
            "objective": params.objective,
            "precondition": params.precondition,
            "labels": params.labels,
            "folderId": params.folder_id.or_else(|| cfg.default_folder_id.clone()),
        });
        if let Some(steps) = &params.steps {
            payload["testScript"] = test_script(steps);
        }
        if let Some(issues) = params.links.jira_issue_keys {
            payload["links"] = json!({ "issues": issues });
        }

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::POST,
                "/rest/atm/1.0/testcase",
                &[],
                Some(&payload),
            )
            .await?;
        Ok(json!({ "key": data["key"], "self": data["self"] }))
    }

    async fn update_test_case(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Links {
            jira_issue_keys: Option<Vec<String>>,
        }
        #[derive(Deserialize)]
        struct Params {
            key: String,
            title: Option<String>,
            objective: Option<String>,
            precondition: Option<String>,
            steps: Option<Vec<StepInput>>,
            labels: Option<Vec<String>>,
            folder_id: Option<String>,
            #[serde(default)]
            links: Links,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut payload = json!({});
        if let Some(title) = params.title {
            payload["name"] = json!(title);
        }
        if let Some(objective) = params.objective {
            payload["objective"] = json!(objective);
        }
        if let Some(precondition) = params.precondition {
            payload["precondition"] = json!(precondition);
        }
        if let Some(labels) = params.labels {
            payload["labels"] = json!(labels);
        }
        if let Some(folder_id) = params.folder_id {
            payload["folderId"] = json!(folder_id);
        }
        if let Some(steps) = &params.steps {
            payload["testScript"] = test_script(steps);
        }
        if let Some(issues) = params.links.jira_issue_keys {
            payload["links"] = json!({ "issues": issues });
        }

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::PUT,
                &format!("/rest/atm/1.0/testcase/{}", params.key),
                &[],
                Some(&payload),
            )
            .await?;
        Ok(json!({ "key": data["key"], "self": data["self"] }))
    }

    async fn create_test_cycle(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            project_key: Option<String>,
            folder_id: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::POST,
                "/rest/atm/1.0/testrun",
                &[],
                Some(&json!({
                    "name": params.name,
                    "projectKey": params
                        .project_key
                        .unwrap_or_else(|| cfg.zephyr_project_key.clone()),
                    "folderId": params.folder_id,
                })),
            )
            .await?;
        Ok(json!({ "key": data["key"], "self": data["self"] }))
    }

    async fn add_tests_to_cycle(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            cycle_key: String,
            test_case_keys: Vec<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let additions: Vec<Value> = params
            .test_case_keys
            .iter()
            .map(|k| json!({ "testCaseKey": k }))
            .collect();
        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("/rest/atm/1.0/testrun/{}/testcase", params.cycle_key),
                &[],
                Some(&json!({ "additions": additions })),
            )
            .await?;
        Ok(json!({ "ok": true, "added": params.test_case_keys.len(), "result": data }))
    }

    async fn list_test_executions(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            cycle_key: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::GET,
                "/rest/atm/1.0/testrun/testexecution",
                &[
                    ("testRunKey", params.cycle_key),
                    ("maxResults", "200".to_string()),
                ],
                None,
            )
            .await?;
        Ok(json!({ "executions": data["values"].as_array().cloned().unwrap_or_default() }))
    }

    async fn update_execution_status(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Attachment {
            name: String,
            content_type: String,
            data_base64: String,
        }
        #[derive(Deserialize, Default)]
        struct Evidence {
            attachments: Option<Vec<Attachment>>,
        }
        #[derive(Deserialize)]
        struct Params {
            execution_id: String,
            status: String,
            comment: Option<String>,
            #[serde(default)]
            evidence: Evidence,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::PUT,
                &format!("/rest/atm/1.0/testexecution/{}", params.execution_id),
                &[],
                Some(&json!({ "status": params.status, "comment": params.comment })),
            )
            .await?;

        if let Some(attachments) = params.evidence.attachments {
            for attachment in attachments {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(attachment.data_base64.as_bytes())
                    .map_err(|e| {
                        Error::InvalidRequest(format!("Invalid attachment encoding: {e}"))
                    })?;
                if bytes.len() > MAX_ATTACHMENT_SIZE_BYTES {
                    return Err(Error::InvalidRequest("Attachment too large".to_string()));
                }
                let url = format!(
                    "{}/rest/atm/1.0/testexecution/{}/attachment",
                    cfg.site_url, params.execution_id
                );
                self.client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", cfg.token))
                    .header("Content-Type", &attachment.content_type)
                    .body(bytes)
                    .send()
                    .await
                    .map_err(|e| Error::Http(e.to_string()))?;
                debug!(name = %attachment.name, "uploaded evidence attachment");
            }
        }
        Ok(json!({ "execution": data }))
    }

    async fn publish_automation_results(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Cycle {
            name: Option<String>,
            create_if_missing: Option<bool>,
        }
        #[derive(Deserialize)]
        struct ResultEntry {
            external_test_id: String,
            status: String,
            duration_ms: Option<u64>,
            comment: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            cycle: Cycle,
            results: Vec<ResultEntry>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        if params.results.len() > MAX_BATCH_RESULTS {
            return Err(Error::InvalidRequest("Batch too large".to_string()));
        }

        let mut cycle_key = Value::Null;
        if let (Some(name), Some(true)) = (&params.cycle.name, params.cycle.create_if_missing) {
            let created = self
                .zephyr_fetch(
                    &cfg,
                    reqwest::Method::POST,
                    "/rest/atm/1.0/testrun",
                    &[],
                    Some(&json!({ "name": name, "projectKey": cfg.zephyr_project_key })),
                )
                .await?;
            cycle_key = created["key"].clone();
        }

        let now = chrono::Utc::now().to_rfc3339();
        let executions: Vec<Value> = params
            .results
            .iter()
            .map(|r| {
                json!({
                    "testCaseKey": r.external_test_id,
                    "statusName": r.status,
                    "comment": r.comment,
                    "actualEndDate": now,
                    "executionTime": r.duration_ms,
                })
            })
            .collect();

        let data = self
            .zephyr_fetch(
                &cfg,
                reqwest::Method::POST,
                "/rest/atm/1.0/automation/execution",
                &[],
                Some(&json!({ "testCycleKey": cycle_key, "executions": executions })),
            )
            .await?;
        Ok(json!({ "summary": data }))
    }
}

#[async_trait]
impl Connector for ZephyrConnector {
    fn name(&self) -> &'static str {
        "zephyr"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let empty = json!({ "type": "object", "properties": {}, "additionalProperties": false });
        vec![
            ToolDefinition::new("zephyr_health", "Health check for Zephyr MCP server.", empty.clone()),
            ToolDefinition::new(
                "zephyr_configure",
                "Configure Zephyr Scale cloud session.",
                json!({
                    "type": "object",
                    "properties": {
                        "deployment": { "type": "string", "enum": ["cloud"] },
                        "site_url": { "type": "string" },
                        "auth": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["atlassian_oauth"] },
                                "access_token": { "type": "string" }
                            },
                            "required": ["access_token"]
                        },
                        "jira": {
                            "type": "object",
                            "properties": { "project_key": { "type": "string" } },
                            "required": ["project_key"]
                        },
                        "zephyr": {
                            "type": "object",
                            "properties": {
                                "default_test_project_key": { "type": "string" },
                                "default_folder_id": { "type": "string" }
                            }
                        },
                        "read_only": { "type": "boolean" }
                    },
                    "required": ["site_url", "auth", "jira"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("zephyr_get_context", "Return Zephyr/Jira context.", empty),
            ToolDefinition::new(
                "zephyr_list_folders",
                "List Zephyr test case folders.",
                json!({
                    "type": "object",
                    "properties": { "project_key": { "type": "string" } },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_search_test_cases",
                "Search Zephyr test cases.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "folder_id": { "type": "string" },
                        "project_key": { "type": "string" },
                        "limit": { "type": "number" }
                    },
                    "required": ["query"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_get_test_case",
                "Get a test case by key.",
                json!({
                    "type": "object",
                    "properties": { "key": { "type": "string" } },
                    "required": ["key"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_create_test_case",
                "Create a test case.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "objective": { "type": "string" },
                        "precondition": { "type": "string" },
                        "steps": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "action": { "type": "string" },
                                    "data": { "type": "string" },
                                    "expected": { "type": "string" }
                                }
                            }
                        },
                        "labels": { "type": "array", "items": { "type": "string" } },
                        "folder_id": { "type": "string" },
                        "links": {
                            "type": "object",
                            "properties": {
                                "jira_issue_keys": { "type": "array", "items": { "type": "string" } }
                            }
                        },
                        "project_key": { "type": "string" }
                    },
                    "required": ["title"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_update_test_case",
                "Update a test case (partial allowed).",
                json!({
                    "type": "object",
                    "properties": {
                        "key": { "type": "string" },
                        "title": { "type": "string" },
                        "objective": { "type": "string" },
                        "precondition": { "type": "string" },
                        "steps": { "type": "array", "items": { "type": "object" } },
                        "labels": { "type": "array", "items": { "type": "string" } },
                        "folder_id": { "type": "string" }
                    },
                    "required": ["key"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_create_test_cycle",
                "Create a test cycle (test run).",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "project_key": { "type": "string" },
                        "folder_id": { "type": "string" }
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_add_tests_to_cycle",
                "Add test cases to a cycle (test run).",
                json!({
                    "type": "object",
                    "properties": {
                        "cycle_key": { "type": "string" },
                        "test_case_keys": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["cycle_key", "test_case_keys"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_list_test_executions",
                "List test executions for a cycle.",
                json!({
                    "type": "object",
                    "properties": { "cycle_key": { "type": "string" } },
                    "required": ["cycle_key"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_update_execution_status",
                "Update execution status with optional comment and attachments.",
                json!({
                    "type": "object",
                    "properties": {
                        "execution_id": { "type": "string" },
                        "status": { "type": "string", "enum": ["PASS", "FAIL", "BLOCKED", "UNEXECUTED", "IN_PROGRESS"] },
                        "comment": { "type": "string" },
                        "evidence": {
                            "type": "object",
                            "properties": {
                                "attachments": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "properties": {
                                            "name": { "type": "string" },
                                            "content_type": { "type": "string" },
                                            "data_base64": { "type": "string" }
                                        },
                                        "required": ["name", "content_type", "data_base64"]
                                    }
                                }
                            }
                        }
                    },
                    "required": ["execution_id", "status"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "zephyr_publish_automation_results",
                "Publish automation results (batch).",
                json!({
                    "type": "object",
                    "properties": {
                        "cycle": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "create_if_missing": { "type": "boolean" }
                            }
                        },
                        "results": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "external_test_id": { "type": "string" },
                                    "status": { "type": "string" },
                                    "duration_ms": { "type": "number" },
                                    "comment": { "type": "string" }
                                },
                                "required": ["external_test_id", "status"]
                            }
                        }
                    },
                    "required": ["results"],
                    "additionalProperties": false
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };

        // Mutating tools respect the session's read_only flag.
        if op.mutates() {
            if let Some(cfg) = self.session.snapshot() {
                if cfg.read_only {
                    return ToolResult::structured_error(&Error::ReadOnly);
                }
            }
        }

        let result = match op {
            Op::Health => self.require().map(|cfg| {
                json!({
                    "ok": true,
                    "product": "zephyr_scale",
                    "cloud": true,
                    "project_key": cfg.zephyr_project_key,
                    "identity": cfg.identity,
                })
            }),
            Op::Configure => self.configure(arguments).await,
            Op::GetContext => self.get_context().await,
            Op::ListFolders => self.list_folders(arguments).await,
            Op::SearchTestCases => self.search_test_cases(arguments).await,
            Op::GetTestCase => self.get_test_case(arguments).await,
            Op::CreateTestCase => self.create_test_case(arguments).await,
            Op::UpdateTestCase => self.update_test_case(arguments).await,
            Op::CreateTestCycle => self.create_test_cycle(arguments).await,
            Op::AddTestsToCycle => self.add_tests_to_cycle(arguments).await,
            Op::ListTestExecutions => self.list_test_executions(arguments).await,
            Op::UpdateExecutionStatus => self.update_execution_status(arguments).await,
            Op::PublishAutomationResults => self.publish_automation_results(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::vendor_error(&e, "ZEPHYR_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_only_config() -> ZephyrConfig {
        ZephyrConfig {
            site_url: "https://example.atlassian.net".to_string(),
            token: "tok".to_string(),
            jira_project_key: "QA".to_string(),
            zephyr_project_key: "QA".to_string(),
            default_folder_id: None,
            read_only: true,
            identity: "account:1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_read_only_blocks_mutations() {
        let connector = ZephyrConnector::new(Some(read_only_config()));
        let result = connector
            .call("zephyr_create_test_case", json!({ "title": "Login works" }))
            .await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "READ_ONLY_MODE");
    }

    #[tokio::test]
    async fn test_read_only_allows_reads() {
        // Health is read-only and needs no network.
        let connector = ZephyrConnector::new(Some(read_only_config()));
        let result = connector.call("zephyr_health", Value::Null).await;
        assert!(!result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["project_key"], "QA");
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let mut config = read_only_config();
        config.read_only = false;
        let connector = ZephyrConnector::new(Some(config));

        let results: Vec<Value> = (0..=MAX_BATCH_RESULTS)
            .map(|i| json!({ "external_test_id": format!("T{i}"), "status": "PASS" }))
            .collect();
        let result = connector
            .call(
                "zephyr_publish_automation_results",
                json!({ "results": results }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Batch too large"));
    }

    #[tokio::test]
    async fn test_unconfigured_health() {
        let connector = ZephyrConnector::new(None);
        let result = connector.call("zephyr_health", Value::Null).await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }

    #[test]
    fn test_step_indexing() {
        let steps = vec![
            StepInput {
                action: Some("open page".to_string()),
                data: None,
                expected: Some("page loads".to_string()),
            },
            StepInput {
                action: Some("click login".to_string()),
                data: None,
                expected: None,
            },
        ];
        let script = test_script(&steps);
        assert_eq!(script["type"], "STEP_BY_STEP");
        assert_eq!(script["steps"][0]["index"], 1);
        assert_eq!(script["steps"][1]["index"], 2);
        assert_eq!(script["steps"][1]["action"], "click login");
    }
}
