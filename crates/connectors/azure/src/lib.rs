//! Azure connector.
//!
//! Speaks to Azure Resource Manager directly with a static bearer token
//! (the session holds the token, a tenant and a subscription; no SDK
//! credential chain). Log Analytics queries go to their own endpoint.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const ARM_BASE: &str = "https://management.azure.com";
const LOGS_BASE: &str = "https://api.loganalytics.io";

const ARM_API_VERSION: &str = "2021-04-01";
const COMPUTE_API_VERSION: &str = "2023-07-01";
const WEB_API_VERSION: &str = "2022-03-01";
const AKS_API_VERSION: &str = "2023-08-01";
const METRICS_API_VERSION: &str = "2018-01-01";

#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub tenant_id: Option<String>,
    pub subscription_id: String,
    pub token: String,
}

enum Op {
    Configure,
    ListResourceGroups,
    ListResources,
    VmList,
    VmStart,
    VmStop,
    VmRestart,
    AppListWebApps,
    AppRestartWebApp,
    FunctionsList,
    AksListClusters,
    AksGetKubeAccessToken,
    MonitorQueryMetrics,
    LogsQuery,
    IncidentSummarize,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "azure_configure" => Some(Self::Configure),
            "azure_list_resource_groups" => Some(Self::ListResourceGroups),
            "azure_list_resources" => Some(Self::ListResources),
            "azure_vm_list" => Some(Self::VmList),
            "azure_vm_start" => Some(Self::VmStart),
            "azure_vm_stop" => Some(Self::VmStop),
            "azure_vm_restart" => Some(Self::VmRestart),
            "azure_app_list_web_apps" => Some(Self::AppListWebApps),
            "azure_app_restart_web_app" => Some(Self::AppRestartWebApp),
            "azure_functions_list" => Some(Self::FunctionsList),
            "azure_aks_list_clusters" => Some(Self::AksListClusters),
            "azure_aks_get_kube_access_token" => Some(Self::AksGetKubeAccessToken),
            "azure_monitor_query_metrics" => Some(Self::MonitorQueryMetrics),
            "azure_logs_query" => Some(Self::LogsQuery),
            "azure_incident_summarize" => Some(Self::IncidentSummarize),
            _ => None,
        }
    }
}

#[derive(Deserialize, Default)]
struct RgParams {
    resource_group: Option<String>,
}

#[derive(Deserialize)]
struct NamedParams {
    name: String,
    resource_group: String,
}

pub struct AzureConnector {
    session: SessionState<AzureConfig>,
    arm_base: String,
    logs_base: String,
    client: reqwest::Client,
}

impl AzureConnector {
    pub fn new(
        initial: Option<AzureConfig>,
        arm_base: Option<String>,
        logs_base: Option<String>,
    ) -> Self {
        Self {
            session: SessionState::new(initial),
            arm_base: arm_base.unwrap_or_else(|| ARM_BASE.to_string()),
            logs_base: logs_base.unwrap_or_else(|| LOGS_BASE.to_string()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (env_var("AZURE_SUBSCRIPTION_ID"), env_var("AZURE_ACCESS_TOKEN")) {
            (Some(subscription_id), Some(token)) => Some(AzureConfig {
                tenant_id: env_var("AZURE_TENANT_ID"),
                subscription_id,
                token,
            }),
            _ => None,
        };
        Self::new(initial, None, None)
    }

    fn require(&self) -> Result<std::sync::Arc<AzureConfig>> {
        self.session
            .require("Azure Not Configured. Call azure_configure.")
    }

    async fn arm(
        &self,
        cfg: &AzureConfig,
        method: reqwest::Method,
        path: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{path}", self.arm_base);
        debug!(%url, "azure request");

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .header("Content-Type", "application/json")
            .query(&[("api-version", api_version)]);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        if status == 202 || status == 204 {
            return Ok(json!({}));
        }
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) {
            let message = data["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Azure request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    fn sub_path(cfg: &AzureConfig, rest: &str) -> String {
        format!("/subscriptions/{}{rest}", cfg.subscription_id)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            tenant_id: Option<String>,
            subscription_id: String,
            token: String,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = AzureConfig {
            tenant_id: params.tenant_id,
            subscription_id: params.subscription_id,
            token: params.token,
        };
        // Verify by listing resource groups (lightweight).
        self.arm(
            &candidate,
            reqwest::Method::GET,
            &Self::sub_path(&candidate, "/resourcegroups"),
            ARM_API_VERSION,
            None,
        )
        .await?;

        let subscription = candidate.subscription_id.clone();
        self.session.replace(candidate);
        Ok(json!({ "ok": true, "subscription": subscription, "verified": true }))
    }

    async fn list_resource_groups(&self) -> Result<Value> {
        let cfg = self.require()?;
        let data = self
            .arm(
                &cfg,
                reqwest::Method::GET,
                &Self::sub_path(&cfg, "/resourcegroups"),
                ARM_API_VERSION,
                None,
            )
            .await?;
        let groups: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|rg| {
                        json!({
                            "name": rg["name"],
                            "location": rg["location"],
                            "state": rg["properties"]["provisioningState"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "resource_groups": groups }))
    }

    async fn list_resources(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            resource_group: Option<String>,
            type_filter: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = match &params.resource_group {
            Some(rg) => Self::sub_path(&cfg, &format!("/resourceGroups/{rg}/resources")),
            None => Self::sub_path(&cfg, "/resources"),
        };
        let data = self
            .arm(&cfg, reqwest::Method::GET, &path, ARM_API_VERSION, None)
            .await?;
        let resources: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter(|r| match &params.type_filter {
                        Some(filter) => r["type"] == filter.as_str(),
                        None => true,
                    })
                    .map(|r| {
                        json!({
                            "name": r["name"],
                            "type": r["type"],
                            "location": r["location"],
                            "id": r["id"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "resources": resources }))
    }

    async fn vm_list(&self, arguments: Value) -> Result<Value> {
        let params: RgParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = match &params.resource_group {
            Some(rg) => Self::sub_path(
                &cfg,
                &format!("/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines"),
            ),
            None => Self::sub_path(&cfg, "/providers/Microsoft.Compute/virtualMachines"),
        };
        let data = self
            .arm(&cfg, reqwest::Method::GET, &path, COMPUTE_API_VERSION, None)
            .await?;
        let vms: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|vm| {
                        json!({
                            "name": vm["name"],
                            "id": vm["id"],
                            "location": vm["location"],
                            "size": vm["properties"]["hardwareProfile"]["vmSize"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "vms": vms }))
    }

    async fn vm_action(&self, arguments: Value, action: &str, status: &str) -> Result<Value> {
        let params: NamedParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = Self::sub_path(
            &cfg,
            &format!(
                "/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}/{action}",
                params.resource_group, params.name
            ),
        );
        self.arm(&cfg, reqwest::Method::POST, &path, COMPUTE_API_VERSION, None)
            .await?;
        Ok(json!({ "status": status }))
    }

    async fn app_list_web_apps(&self, arguments: Value) -> Result<Value> {
        let params: RgParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = match &params.resource_group {
            Some(rg) => Self::sub_path(
                &cfg,
                &format!("/resourceGroups/{rg}/providers/Microsoft.Web/sites"),
            ),
            None => Self::sub_path(&cfg, "/providers/Microsoft.Web/sites"),
        };
        let data = self
            .arm(&cfg, reqwest::Method::GET, &path, WEB_API_VERSION, None)
            .await?;
        let apps: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|app| {
                        json!({
                            "name": app["name"],
                            "state": app["properties"]["state"],
                            "defaultHostName": app["properties"]["defaultHostName"],
                            "kind": app["kind"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "apps": apps }))
    }

    async fn app_restart_web_app(&self, arguments: Value) -> Result<Value> {
        let params: NamedParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = Self::sub_path(
            &cfg,
            &format!(
                "/resourceGroups/{}/providers/Microsoft.Web/sites/{}/restart",
                params.resource_group, params.name
            ),
        );
        self.arm(&cfg, reqwest::Method::POST, &path, WEB_API_VERSION, None)
            .await?;
        Ok(json!({ "status": "restarted" }))
    }

    async fn functions_list(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            function_app: String,
            resource_group: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = Self::sub_path(
            &cfg,
            &format!(
                "/resourceGroups/{}/providers/Microsoft.Web/sites/{}/functions",
                params.resource_group, params.function_app
            ),
        );
        let data = self
            .arm(&cfg, reqwest::Method::GET, &path, WEB_API_VERSION, None)
            .await?;
        let functions: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|f| json!({ "name": f["name"], "id": f["id"] }))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "functions": functions }))
    }

    async fn aks_list_clusters(&self, arguments: Value) -> Result<Value> {
        let params: RgParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = match &params.resource_group {
            Some(rg) => Self::sub_path(
                &cfg,
                &format!(
                    "/resourceGroups/{rg}/providers/Microsoft.ContainerService/managedClusters"
                ),
            ),
            None => {
                Self::sub_path(&cfg, "/providers/Microsoft.ContainerService/managedClusters")
            }
        };
        let data = self
            .arm(&cfg, reqwest::Method::GET, &path, AKS_API_VERSION, None)
            .await?;
        let clusters: Vec<Value> = data["value"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|c| {
                        json!({
                            "name": c["name"],
                            "version": c["properties"]["kubernetesVersion"],
                            "state": c["properties"]["provisioningState"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "clusters": clusters }))
    }

    async fn aks_get_kube_access_token(&self, arguments: Value) -> Result<Value> {
        let params: NamedParams = parse_args(arguments)?;
        let cfg = self.require()?;

        let path = Self::sub_path(
            &cfg,
            &format!(
                "/resourceGroups/{}/providers/Microsoft.ContainerService/managedClusters/{}/listClusterUserCredential",
                params.resource_group, params.name
            ),
        );
        let data = self
            .arm(&cfg, reqwest::Method::POST, &path, AKS_API_VERSION, None)
            .await?;
        let encoded = data["kubeconfigs"][0]["value"]
            .as_str()
            .ok_or_else(|| Error::NotFound("No kubeconfigs found".to_string()))?;
        let kubeconfig = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| Error::InvalidRequest("Invalid kubeconfig encoding".to_string()))?;

        let preview: String = kubeconfig.chars().take(50).collect();
        Ok(json!({
            "kubeconfig_preview": format!("{preview}..."),
            "full_kubeconfig": kubeconfig,
        }))
    }

    async fn monitor_query_metrics(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            resource_id: String,
            metric_names: Option<Vec<String>>,
            time_range: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let url = format!(
            "{}{}/providers/Microsoft.Insights/metrics",
            self.arm_base, params.resource_id
        );
        let mut query = vec![
            ("api-version", METRICS_API_VERSION.to_string()),
            (
                "timespan",
                params.time_range.unwrap_or_else(|| "PT1H".to_string()),
            ),
        ];
        if let Some(names) = params.metric_names {
            query.push(("metricnames", names.join(",")));
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) {
            let message = data["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Azure request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    async fn logs_query(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            workspace_id: String,
            query: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let url = format!(
            "{}/v1/workspaces/{}/query",
            self.logs_base, params.workspace_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .json(&json!({ "query": params.query, "timespan": "P1D" }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) {
            let message = data["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Log Analytics request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data["tables"].clone())
    }

    async fn incident_summarize(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            resource_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .arm(
                &cfg,
                reqwest::Method::GET,
                &params.resource_id,
                ARM_API_VERSION,
                None,
            )
            .await?;
        let status = data["tags"]["status"]
            .as_str()
            .unwrap_or("Unknown - Check provisioningState");
        Ok(json!({
            "id": data["id"],
            "name": data["name"],
            "type": data["type"],
            "status": status,
            "provisioningState": data["properties"]["provisioningState"],
        }))
    }
}

#[async_trait]
impl Connector for AzureConnector {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let rg_optional = json!({
            "type": "object",
            "properties": { "resource_group": { "type": "string" } }
        });
        let named = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "resource_group": { "type": "string" }
            },
            "required": ["name", "resource_group"]
        });
        vec![
            ToolDefinition::new(
                "azure_configure",
                "Configure Azure Session",
                json!({
                    "type": "object",
                    "properties": {
                        "tenant_id": { "type": "string" },
                        "subscription_id": { "type": "string" },
                        "token": { "type": "string" }
                    },
                    "required": ["token", "subscription_id"]
                }),
            ),
            ToolDefinition::new(
                "azure_list_resource_groups",
                "List Resource Groups",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "azure_list_resources",
                "List Resources",
                json!({
                    "type": "object",
                    "properties": {
                        "resource_group": { "type": "string" },
                        "type_filter": { "type": "string" }
                    }
                }),
            ),
            ToolDefinition::new("azure_vm_list", "List VMs", rg_optional.clone()),
            ToolDefinition::new("azure_vm_start", "Start VM", named.clone()),
            ToolDefinition::new("azure_vm_stop", "Stop (deallocate) VM", named.clone()),
            ToolDefinition::new("azure_vm_restart", "Restart VM", named.clone()),
            ToolDefinition::new("azure_app_list_web_apps", "List Web Apps", rg_optional.clone()),
            ToolDefinition::new("azure_app_restart_web_app", "Restart Web App", named.clone()),
            ToolDefinition::new(
                "azure_functions_list",
                "List Functions",
                json!({
                    "type": "object",
                    "properties": {
                        "function_app": { "type": "string" },
                        "resource_group": { "type": "string" }
                    },
                    "required": ["function_app", "resource_group"]
                }),
            ),
            ToolDefinition::new("azure_aks_list_clusters", "List AKS Clusters", rg_optional),
            ToolDefinition::new("azure_aks_get_kube_access_token", "Get AKS Credentials", named),
            ToolDefinition::new(
                "azure_monitor_query_metrics",
                "Query Metrics",
                json!({
                    "type": "object",
                    "properties": {
                        "resource_id": { "type": "string" },
                        "metric_names": { "type": "array", "items": { "type": "string" } },
                        "time_range": { "type": "string" }
                    },
                    "required": ["resource_id"]
                }),
            ),
            ToolDefinition::new(
                "azure_logs_query",
                "Query Logs (KQL)",
                json!({
                    "type": "object",
                    "properties": {
                        "workspace_id": { "type": "string" },
                        "query": { "type": "string" }
                    },
                    "required": ["workspace_id", "query"]
                }),
            ),
            ToolDefinition::new(
                "azure_incident_summarize",
                "Summarize Health",
                json!({
                    "type": "object",
                    "properties": { "resource_id": { "type": "string" } },
                    "required": ["resource_id"]
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
            Op::ListResourceGroups => self.list_resource_groups().await,
            Op::ListResources => self.list_resources(arguments).await,
            Op::VmList => self.vm_list(arguments).await,
            Op::VmStart => self.vm_action(arguments, "start", "started").await,
            Op::VmStop => {
                self.vm_action(arguments, "deallocate", "stopped/deallocated")
                    .await
            }
            Op::VmRestart => self.vm_action(arguments, "restart", "restarted").await,
            Op::AppListWebApps => self.app_list_web_apps(arguments).await,
            Op::AppRestartWebApp => self.app_restart_web_app(arguments).await,
            Op::FunctionsList => self.functions_list(arguments).await,
            Op::AksListClusters => self.aks_list_clusters(arguments).await,
            Op::AksGetKubeAccessToken => self.aks_get_kube_access_token(arguments).await,
            Op::MonitorQueryMetrics => self.monitor_query_metrics(arguments).await,
            Op::LogsQuery => self.logs_query(arguments).await,
            Op::IncidentSummarize => self.incident_summarize(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Azure API Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_connector(server: &MockServer) -> AzureConnector {
        AzureConnector::new(
            Some(AzureConfig {
                tenant_id: None,
                subscription_id: "sub-1".to_string(),
                token: "tok".to_string(),
            }),
            Some(server.base_url()),
            Some(server.base_url()),
        )
    }

    #[tokio::test]
    async fn test_list_resource_groups_shapes_output() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/subscriptions/sub-1/resourcegroups")
                .query_param("api-version", ARM_API_VERSION)
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!({
                "value": [{
                    "name": "prod-rg",
                    "location": "westeurope",
                    "properties": { "provisioningState": "Succeeded" }
                }]
            }));
        });

        let result = test_connector(&server)
            .call("azure_list_resource_groups", Value::Null)
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["resource_groups"][0]["name"], "prod-rg");
        assert_eq!(payload["resource_groups"][0]["state"], "Succeeded");
    }

    #[tokio::test]
    async fn test_vm_stop_deallocates() {
        let server = MockServer::start();
        let deallocate = server.mock(|when, then| {
            when.method(POST).path(
                "/subscriptions/sub-1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1/deallocate",
            );
            then.status(202);
        });

        let result = test_connector(&server)
            .call(
                "azure_vm_stop",
                json!({ "name": "vm1", "resource_group": "rg" }),
            )
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("stopped/deallocated"));
        deallocate.assert();
    }

    #[tokio::test]
    async fn test_dotted_vm_alias() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/subscriptions/sub-1/providers/Microsoft.Compute/virtualMachines");
            then.status(200).json_body(json!({ "value": [] }));
        });
        let result = test_connector(&server).call("azure.vm.list", Value::Null).await;
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_configure_rolls_back_on_auth_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/subscriptions/sub-2/resourcegroups");
            then.status(401)
                .json_body(json!({ "error": { "message": "InvalidAuthenticationToken" } }));
        });

        let connector = AzureConnector::new(None, Some(server.base_url()), None);
        let result = connector
            .call(
                "azure_configure",
                json!({ "subscription_id": "sub-2", "token": "bad" }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("InvalidAuthenticationToken"));

        let result = connector.call("azure_vm_list", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().contains("Not Configured"));
    }
}
