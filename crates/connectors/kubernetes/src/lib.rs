//! Kubernetes connector.
//!
//! Talks to the API server REST endpoints directly with a bearer token.
//! Without CA data the TLS verification is skipped, matching how the
//! session is typically bootstrapped from a service-account token.
//! Manifest application is read-then-patch-or-create per document.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub api_server: String,
    pub token: String,
    pub ca_data: Option<String>,
    pub namespace: String,
}

/// REST path for a namespaced resource collection.
pub fn resource_path(api_version: &str, kind: &str, namespace: &str) -> Result<String> {
    let plural = match kind.to_lowercase().as_str() {
        "pod" => "pods",
        "service" => "services",
        "deployment" => "deployments",
        "configmap" => "configmaps",
        "secret" => "secrets",
        "job" => "jobs",
        other => {
            return Err(Error::InvalidRequest(format!(
                "Unsupported kind for simple operations: {other}"
            )))
        }
    };
    let prefix = if api_version == "v1" {
        "/api/v1".to_string()
    } else {
        format!("/apis/{api_version}")
    };
    Ok(format!("{prefix}/namespaces/{namespace}/{plural}"))
}

fn kind_api_version(kind: &str) -> Result<&'static str> {
    match kind.to_lowercase().as_str() {
        "pod" | "service" | "configmap" | "secret" => Ok("v1"),
        "deployment" => Ok("apps/v1"),
        "job" => Ok("batch/v1"),
        other => Err(Error::InvalidRequest(format!(
            "Unsupported kind for simple operations: {other}"
        ))),
    }
}

enum Op {
    Health,
    Configure,
    ListNamespaces,
    ListPods,
    GetResource,
    GetPodLogs,
    ApplyManifest,
    DeleteResource,
    ScaleDeployment,
    GetDeploymentStatus,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "kubernetes_health" => Some(Self::Health),
            "kubernetes_configure" => Some(Self::Configure),
            "kubernetes_list_namespaces" => Some(Self::ListNamespaces),
            "kubernetes_list_pods" => Some(Self::ListPods),
            "kubernetes_get_resource" => Some(Self::GetResource),
            "kubernetes_get_pod_logs" => Some(Self::GetPodLogs),
            "kubernetes_apply_manifest" => Some(Self::ApplyManifest),
            "kubernetes_delete_resource" => Some(Self::DeleteResource),
            "kubernetes_scale_deployment" => Some(Self::ScaleDeployment),
            "kubernetes_get_deployment_status" => Some(Self::GetDeploymentStatus),
            _ => None,
        }
    }
}

pub struct KubernetesConnector {
    session: SessionState<KubernetesConfig>,
}

impl KubernetesConnector {
    pub fn new(initial: Option<KubernetesConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = match (env_var("K8S_API_SERVER"), env_var("K8S_TOKEN")) {
            (Some(api_server), Some(token)) => Some(KubernetesConfig {
                api_server: normalize_base_url(&api_server),
                token,
                ca_data: env_var("K8S_CA_DATA"),
                namespace: env_var("K8S_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            }),
            _ => None,
        };
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<KubernetesConfig>> {
        self.session
            .require("Kubernetes not configured. Call kubernetes_configure first.")
    }

    fn http_client(cfg: &KubernetesConfig) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        match &cfg.ca_data {
            Some(ca_data) => {
                let pem = base64::engine::general_purpose::STANDARD
                    .decode(ca_data)
                    .map_err(|e| Error::Config(format!("Invalid CA data: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| Error::Config(format!("Invalid CA certificate: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            None => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
    }

    async fn api(
        &self,
        cfg: &KubernetesConfig,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        content_type: &str,
    ) -> Result<Value> {
        let url = format!("{}{path}", cfg.api_server);
        debug!(%url, "kubernetes request");

        let mut builder = Self::http_client(cfg)?
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", cfg.token))
            .header("Accept", "application/json");
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
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        if !(200..300).contains(&status) {
            let message = data["message"]
                .as_str()
                .map(|m| format!("{status} - {m}"))
                .unwrap_or_else(|| format!("Kubernetes request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct AuthParams {
            token: Option<String>,
            ca: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            api_server: Option<String>,
            #[serde(default)]
            auth: AuthParams,
            default_namespace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;

        let previous = self.session.snapshot();
        let candidate = KubernetesConfig {
            api_server: params
                .api_server
                .map(|u| normalize_base_url(&u))
                .or_else(|| previous.as_ref().map(|p| p.api_server.clone()))
                .ok_or_else(|| Error::InvalidRequest("api_server is required".to_string()))?,
            token: params
                .auth
                .token
                .or_else(|| previous.as_ref().map(|p| p.token.clone()))
                .ok_or_else(|| Error::InvalidRequest("auth.token is required".to_string()))?,
            ca_data: params
                .auth
                .ca
                .or_else(|| previous.as_ref().and_then(|p| p.ca_data.clone())),
            namespace: params
                .default_namespace
                .or_else(|| previous.as_ref().map(|p| p.namespace.clone()))
                .unwrap_or_else(|| "default".to_string()),
        };

        self.api(&candidate, reqwest::Method::GET, "/api", &[], None, "application/json")
            .await
            .map_err(|e| Error::Auth(format!("Verification Failed: {e}")))?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true, "message": "Kubernetes configuration updated and verified." }))
    }

    fn namespace(cfg: &KubernetesConfig, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| cfg.namespace.clone())
    }

    async fn list_namespaces(&self) -> Result<Value> {
        let cfg = self.require()?;
        let data = self
            .api(
                &cfg,
                reqwest::Method::GET,
                "/api/v1/namespaces",
                &[],
                None,
                "application/json",
            )
            .await?;
        let namespaces: Vec<Value> = data["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|n| {
                        json!({
                            "name": n["metadata"]["name"],
                            "status": n["status"]["phase"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(namespaces))
    }

    async fn list_pods(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            namespace: Option<String>,
            label_selector: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let mut query = Vec::new();
        if let Some(selector) = params.label_selector {
            query.push(("labelSelector", selector));
        }
        let data = self
            .api(
                &cfg,
                reqwest::Method::GET,
                &format!("/api/v1/namespaces/{namespace}/pods"),
                &query,
                None,
                "application/json",
            )
            .await?;
        let pods: Vec<Value> = data["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|p| {
                        json!({
                            "name": p["metadata"]["name"],
                            "phase": p["status"]["phase"],
                            "node": p["spec"]["nodeName"],
                            "ip": p["status"]["podIP"],
                            "startTime": p["status"]["startTime"],
                            "labels": p["metadata"]["labels"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Value::Array(pods))
    }

    async fn get_resource(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            kind: String,
            name: String,
            namespace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let api_version = kind_api_version(&params.kind)?;
        let path = format!(
            "{}/{}",
            resource_path(api_version, &params.kind, &namespace)?,
            params.name
        );
        self.api(&cfg, reqwest::Method::GET, &path, &[], None, "application/json")
            .await
    }

    async fn get_pod_logs(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            namespace: Option<String>,
            container: Option<String>,
            tail_lines: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let mut query = vec![(
            "tailLines",
            params.tail_lines.unwrap_or(100).to_string(),
        )];
        if let Some(container) = params.container {
            query.push(("container", container));
        }
        let data = self
            .api(
                &cfg,
                reqwest::Method::GET,
                &format!("/api/v1/namespaces/{namespace}/pods/{}/log", params.name),
                &query,
                None,
                "application/json",
            )
            .await?;
        Ok(match data {
            Value::String(logs) => logs,
            other => other.to_string(),
        })
    }

    async fn apply_manifest(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            manifest: String,
            namespace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let default_namespace = Self::namespace(&cfg, params.namespace);

        let mut specs = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&params.manifest) {
            match Value::deserialize(document) {
                Ok(Value::Null) => continue,
                Ok(spec) => specs.push(spec),
                Err(e) => return Err(Error::InvalidRequest(format!("Invalid manifest: {e}"))),
            };
        }

        let mut results = Vec::new();
        for spec in specs {
            let kind = spec["kind"]
                .as_str()
                .ok_or_else(|| Error::InvalidRequest("Manifest missing kind".to_string()))?
                .to_string();
            let api_version = spec["apiVersion"].as_str().unwrap_or("v1").to_string();
            let name = spec["metadata"]["name"]
                .as_str()
                .ok_or_else(|| Error::InvalidRequest("Manifest missing metadata.name".to_string()))?
                .to_string();
            let namespace = spec["metadata"]["namespace"]
                .as_str()
                .unwrap_or(&default_namespace)
                .to_string();

            let collection = resource_path(&api_version, &kind, &namespace)?;
            let item = format!("{collection}/{name}");

            // Read first to decide create vs patch.
            let exists = self
                .api(&cfg, reqwest::Method::GET, &item, &[], None, "application/json")
                .await;
            match exists {
                Ok(_) => {
                    self.api(
                        &cfg,
                        reqwest::Method::PATCH,
                        &item,
                        &[],
                        Some(&spec),
                        "application/merge-patch+json",
                    )
                    .await?;
                    results.push(format!("Updated {kind}/{name}"));
                }
                Err(Error::NotFound(_)) => {
                    self.api(
                        &cfg,
                        reqwest::Method::POST,
                        &collection,
                        &[],
                        Some(&spec),
                        "application/json",
                    )
                    .await?;
                    results.push(format!("Created {kind}/{name}"));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(results.join("\n"))
    }

    async fn delete_resource(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            kind: String,
            name: String,
            namespace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let api_version = kind_api_version(&params.kind)?;
        let path = format!(
            "{}/{}",
            resource_path(api_version, &params.kind, &namespace)?,
            params.name
        );
        self.api(&cfg, reqwest::Method::DELETE, &path, &[], None, "application/json")
            .await?;
        Ok(format!("Deleted {}/{}", params.kind, params.name))
    }

    async fn scale_deployment(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            namespace: Option<String>,
            replicas: u32,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let path = format!(
            "/apis/apps/v1/namespaces/{namespace}/deployments/{}",
            params.name
        );

        // Read, mutate replicas, replace.
        let mut deployment = self
            .api(&cfg, reqwest::Method::GET, &path, &[], None, "application/json")
            .await?;
        deployment["spec"]["replicas"] = json!(params.replicas);
        self.api(
            &cfg,
            reqwest::Method::PUT,
            &path,
            &[],
            Some(&deployment),
            "application/json",
        )
        .await?;
        Ok(format!(
            "Scaled {} to {} replicas.",
            params.name, params.replicas
        ))
    }

    async fn get_deployment_status(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            namespace: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let namespace = Self::namespace(&cfg, params.namespace);
        let data = self
            .api(
                &cfg,
                reqwest::Method::GET,
                &format!(
                    "/apis/apps/v1/namespaces/{namespace}/deployments/{}",
                    params.name
                ),
                &[],
                None,
                "application/json",
            )
            .await?;
        Ok(json!({
            "readyReplicas": data["status"]["readyReplicas"],
            "updatedReplicas": data["status"]["updatedReplicas"],
            "availableReplicas": data["status"]["availableReplicas"],
            "conditions": data["status"]["conditions"],
        }))
    }
}

#[async_trait]
impl Connector for KubernetesConnector {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "kubernetes_health",
                "Check connection health",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "kubernetes_configure",
                "Configure Cluster Connection",
                json!({
                    "type": "object",
                    "properties": {
                        "api_server": { "type": "string" },
                        "auth": { "type": "object" },
                        "default_namespace": { "type": "string" }
                    }
                }),
            ),
            ToolDefinition::new(
                "kubernetes_list_namespaces",
                "List Namespaces",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "kubernetes_list_pods",
                "List Pods",
                json!({
                    "type": "object",
                    "properties": {
                        "namespace": { "type": "string" },
                        "label_selector": { "type": "string" }
                    }
                }),
            ),
            ToolDefinition::new(
                "kubernetes_get_resource",
                "Get Resource Spec",
                json!({
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string" },
                        "name": { "type": "string" },
                        "namespace": { "type": "string" }
                    },
                    "required": ["kind", "name"]
                }),
            ),
            ToolDefinition::new(
                "kubernetes_get_pod_logs",
                "Get Pod Logs",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "namespace": { "type": "string" },
                        "container": { "type": "string" },
                        "tail_lines": { "type": "integer" }
                    },
                    "required": ["name"]
                }),
            ),
            ToolDefinition::new(
                "kubernetes_apply_manifest",
                "Apply YAML Manifest",
                json!({
                    "type": "object",
                    "properties": {
                        "manifest": { "type": "string" },
                        "namespace": { "type": "string" }
                    },
                    "required": ["manifest"]
                }),
            ),
            ToolDefinition::new(
                "kubernetes_delete_resource",
                "Delete Resource",
                json!({
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string" },
                        "name": { "type": "string" },
                        "namespace": { "type": "string" }
                    },
                    "required": ["kind", "name"]
                }),
            ),
            ToolDefinition::new(
                "kubernetes_scale_deployment",
                "Scale Deployment",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "namespace": { "type": "string" },
                        "replicas": { "type": "integer" }
                    },
                    "required": ["name", "replicas"]
                }),
            ),
            ToolDefinition::new(
                "kubernetes_get_deployment_status",
                "Get Deployment Status",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "namespace": { "type": "string" }
                    },
                    "required": ["name"]
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::Health => Ok(ToolResult::json(&json!({ "ok": true }))),
            Op::Configure => self.configure(arguments).await.map(|v| ToolResult::json(&v)),
            Op::ListNamespaces => self.list_namespaces().await.map(|v| ToolResult::json(&v)),
            Op::ListPods => self.list_pods(arguments).await.map(|v| ToolResult::json(&v)),
            Op::GetResource => self.get_resource(arguments).await.map(|v| ToolResult::json(&v)),
            Op::GetPodLogs => self.get_pod_logs(arguments).await.map(ToolResult::text),
            Op::ApplyManifest => self.apply_manifest(arguments).await.map(ToolResult::text),
            Op::DeleteResource => self.delete_resource(arguments).await.map(ToolResult::text),
            Op::ScaleDeployment => self.scale_deployment(arguments).await.map(ToolResult::text),
            Op::GetDeploymentStatus => self
                .get_deployment_status(arguments)
                .await
                .map(|v| ToolResult::json(&v)),
        };
        result.unwrap_or_else(|e| ToolResult::error(format!("Kubernetes API Error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(url: &str) -> KubernetesConfig {
        KubernetesConfig {
            api_server: url.to_string(),
            token: "sa-token".to_string(),
            ca_data: None,
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(
            resource_path("v1", "Pod", "default").unwrap(),
            "/api/v1/namespaces/default/pods"
        );
        assert_eq!(
            resource_path("apps/v1", "Deployment", "prod").unwrap(),
            "/apis/apps/v1/namespaces/prod/deployments"
        );
        assert!(resource_path("v1", "CustomWidget", "default").is_err());
    }

    #[tokio::test]
    async fn test_list_pods_maps_fields() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/namespaces/default/pods")
                .header("Authorization", "Bearer sa-token");
            then.status(200).json_body(json!({
                "items": [{
                    "metadata": { "name": "web-1", "labels": { "app": "web" } },
                    "spec": { "nodeName": "node-a" },
                    "status": { "phase": "Running", "podIP": "10.0.0.9", "startTime": "t" }
                }]
            }));
        });

        let connector = KubernetesConnector::new(Some(test_config(&server.base_url())));
        let result = connector.call("kubernetes_list_pods", Value::Null).await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload[0]["name"], "web-1");
        assert_eq!(payload[0]["phase"], "Running");
    }

    #[tokio::test]
    async fn test_apply_manifest_creates_when_missing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/namespaces/default/configmaps/app-config");
            then.status(404).json_body(json!({ "message": "not found" }));
        });
        let create = server.mock(|when, then| {
            when.method(POST).path("/api/v1/namespaces/default/configmaps");
            then.status(201).json_body(json!({ "metadata": { "name": "app-config" } }));
        });

        let connector = KubernetesConnector::new(Some(test_config(&server.base_url())));
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app-config\ndata:\n  KEY: value\n";
        let result = connector
            .call("kubernetes_apply_manifest", json!({ "manifest": manifest }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("Created ConfigMap/app-config"));
        create.assert();
    }

    #[tokio::test]
    async fn test_apply_manifest_patches_existing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/apis/apps/v1/namespaces/default/deployments/web");
            then.status(200).json_body(json!({ "metadata": { "name": "web" } }));
        });
        let patch = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH)
                .path("/apis/apps/v1/namespaces/default/deployments/web")
                .header("Content-Type", "application/merge-patch+json");
            then.status(200).json_body(json!({ "metadata": { "name": "web" } }));
        });

        let connector = KubernetesConnector::new(Some(test_config(&server.base_url())));
        let manifest = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n";
        let result = connector
            .call("kubernetes_apply_manifest", json!({ "manifest": manifest }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("Updated Deployment/web"));
        patch.assert();
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let connector = KubernetesConnector::new(Some(test_config("http://localhost:1")));
        let result = connector
            .call(
                "kubernetes_get_resource",
                json!({ "kind": "CronTab", "name": "x" }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Unsupported kind"));
    }

    #[tokio::test]
    async fn test_not_configured() {
        let connector = KubernetesConnector::new(None);
        let result = connector.call("kubernetes_list_namespaces", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().contains("not configured"));
    }
}
