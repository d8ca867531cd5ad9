//! Observability connector (Prometheus + Grafana).
//!
//! Two independent backends behind one tool surface. Range queries are
//! guarded before any outbound call: a window over three hours, or a
//! step resolution producing more than 5000 points, is rejected as
//! `QUERY_TOO_BROAD`.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const MAX_RANGE_SECONDS: i64 = 3 * 60 * 60;
const MAX_POINTS: i64 = 5000;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKey { api_key: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub auth: Option<BackendAuth>,
}

#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    pub prometheus: Option<BackendConfig>,
    pub grafana: Option<BackendConfig>,
}

/// Parse `60s` / `5m` / `1h` style durations into seconds.
pub fn parse_duration_seconds(duration: &str) -> Option<i64> {
    let (number, unit) = duration.split_at(duration.len().checked_sub(1)?);
    let n: i64 = number.parse().ok()?;
    let factor = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604_800,
        _ => return None,
    };
    Some(n * factor)
}

/// Reject over-broad range queries before they hit the backend. Relative
/// expressions (`now-30m`) are not checked; only absolute timestamps are.
pub fn enforce_range_guard(start: &str, end: &str, step: Option<&str>) -> Result<()> {
    let (Ok(s), Ok(e)) = (
        DateTime::parse_from_rfc3339(start),
        DateTime::parse_from_rfc3339(end),
    ) else {
        return Ok(());
    };
    let diff = (e - s).num_seconds();
    if diff > MAX_RANGE_SECONDS {
        return Err(Error::QueryTooBroad(
            "QueryTooBroad: time range exceeds limit".to_string(),
        ));
    }
    if let Some(step_seconds) = step.and_then(parse_duration_seconds) {
        if step_seconds > 0 && diff / step_seconds > MAX_POINTS {
            return Err(Error::QueryTooBroad(
                "QueryTooBroad: too many points".to_string(),
            ));
        }
    }
    Ok(())
}

enum Op {
    Health,
    Configure,
    QueryPrometheus,
    QueryRange,
    ListPrometheusSeries,
    ListDashboards,
    GetDashboard,
    RenderPanelSnapshot,
    GetRecentAlerts,
    GetServiceHealthSummary,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "observability_health" => Some(Self::Health),
            "observability_configure" => Some(Self::Configure),
            "observability_query_prometheus" => Some(Self::QueryPrometheus),
            "observability_query_range" => Some(Self::QueryRange),
            "observability_list_prometheus_series" => Some(Self::ListPrometheusSeries),
            "observability_list_dashboards" => Some(Self::ListDashboards),
            "observability_get_dashboard" => Some(Self::GetDashboard),
            "observability_render_panel_snapshot" => Some(Self::RenderPanelSnapshot),
            "observability_get_recent_alerts" => Some(Self::GetRecentAlerts),
            "observability_get_service_health_summary" => Some(Self::GetServiceHealthSummary),
            _ => None,
        }
    }

    fn default_code(&self) -> &'static str {
        match self {
            Self::Health | Self::Configure => "OBS_ERROR",
            Self::ListDashboards | Self::GetDashboard | Self::RenderPanelSnapshot => {
                "GRAFANA_ERROR"
            }
            _ => "PROMETHEUS_ERROR",
        }
    }
}

pub struct ObservabilityConnector {
    session: SessionState<ObservabilityConfig>,
    client: reqwest::Client,
}

impl ObservabilityConnector {
    pub fn new(initial: Option<ObservabilityConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let prometheus = env_var("PROMETHEUS_URL").map(|url| BackendConfig {
            url,
            auth: env_var("PROMETHEUS_AUTH_TOKEN").map(|token| BackendAuth::Bearer { token }),
        });
        let grafana = env_var("GRAFANA_URL").map(|url| BackendConfig {
            url,
            auth: env_var("GRAFANA_TOKEN").map(|token| BackendAuth::Bearer { token }),
        });

        let initial = (prometheus.is_some() || grafana.is_some()).then_some(ObservabilityConfig {
            prometheus,
            grafana,
        });
        Self::new(initial)
    }

    fn auth_headers(builder: reqwest::RequestBuilder, auth: &Option<BackendAuth>) -> reqwest::RequestBuilder {
        match auth {
            Some(BackendAuth::Bearer { token }) => {
                builder.header("Authorization", format!("Bearer {token}"))
            }
            Some(BackendAuth::ApiKey { api_key }) => {
                builder.header("Authorization", format!("Bearer {api_key}"))
            }
            Some(BackendAuth::Basic { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                builder.header("Authorization", format!("Basic {encoded}"))
            }
            None => builder,
        }
    }

    fn prometheus_backend(cfg: &ObservabilityConfig) -> Result<&BackendConfig> {
        cfg.prometheus
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("Prometheus not configured".to_string()))
    }

    fn grafana_backend(cfg: &ObservabilityConfig) -> Result<&BackendConfig> {
        cfg.grafana
            .as_ref()
            .ok_or_else(|| Error::NotConfigured("Grafana not configured".to_string()))
    }

    async fn prom_fetch(
        &self,
        backend: &BackendConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = format!("{}/{path}", normalize_base_url(&backend.url));
        debug!(%url, "prometheus request");
        let mut builder = Self::auth_headers(self.client.get(&url), &backend.auth)
            .header("Content-Type", "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));
        if !(200..300).contains(&status) || data["status"] == "error" {
            let message = data["error"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Prometheus request failed ({status})"));
            return Err(Error::from_status(status.max(400), message));
        }
        Ok(data)
    }

    async fn graf_fetch(
        &self,
        backend: &BackendConfig,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = format!("{}/{path}", normalize_base_url(&backend.url));
        debug!(%url, "grafana request");
        let mut builder = Self::auth_headers(self.client.get(&url), &backend.auth)
            .header("Content-Type", "application/json");
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
            let message = data["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Grafana request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    fn normalize_prom_result(data: &Value) -> Value {
        json!({
            "result_type": data["data"]["resultType"],
            "data": data["data"]["result"].as_array().cloned().unwrap_or_default(),
        })
    }

    async fn health(&self) -> Result<Value> {
        let cfg = self
            .session
            .require("No backend configured")?;
        let mut ok = false;
        if let Some(prometheus) = &cfg.prometheus {
            self.prom_fetch(prometheus, "api/v1/status/buildinfo", &[])
                .await?;
            ok = true;
        }
        if let Some(grafana) = &cfg.grafana {
            self.graf_fetch(grafana, "api/health", &[]).await?;
            ok = true;
        }
        if !ok {
            return Err(Error::NotConfigured("No backend configured".to_string()));
        }
        Ok(json!({ "ok": true }))
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            prometheus: Option<BackendConfig>,
            grafana: Option<BackendConfig>,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = ObservabilityConfig {
            prometheus: params.prometheus,
            grafana: params.grafana,
        };
        if candidate.prometheus.is_none() && candidate.grafana.is_none() {
            return Err(Error::NotConfigured("No backend provided".to_string()));
        }

        if let Some(prometheus) = &candidate.prometheus {
            self.prom_fetch(prometheus, "api/v1/status/buildinfo", &[])
                .await?;
        }
        if let Some(grafana) = &candidate.grafana {
            self.graf_fetch(grafana, "api/health", &[]).await?;
        }

        self.session.replace(candidate);
        Ok(json!({ "ok": true }))
    }

    async fn query_prometheus(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            time: Option<String>,
            timeout: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Prometheus not configured")?;
        let backend = Self::prometheus_backend(&cfg)?;

        let mut query = vec![("query", params.query)];
        if let Some(time) = params.time {
            query.push(("time", time));
        }
        if let Some(timeout) = params.timeout {
            query.push(("timeout", timeout));
        }
        let data = self.prom_fetch(backend, "api/v1/query", &query).await?;
        Ok(Self::normalize_prom_result(&data))
    }

    async fn query_range(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
            start: String,
            end: String,
            step: String,
            timeout: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        enforce_range_guard(&params.start, &params.end, Some(&params.step))?;

        let cfg = self.session.require("Prometheus not configured")?;
        let backend = Self::prometheus_backend(&cfg)?;

        let mut query = vec![
            ("query", params.query),
            ("start", params.start),
            ("end", params.end),
            ("step", params.step),
        ];
        if let Some(timeout) = params.timeout {
            query.push(("timeout", timeout));
        }
        let data = self
            .prom_fetch(backend, "api/v1/query_range", &query)
            .await?;
        Ok(Self::normalize_prom_result(&data))
    }

    async fn list_prometheus_series(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            r#match: Vec<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Prometheus not configured")?;
        let backend = Self::prometheus_backend(&cfg)?;

        let query: Vec<(&str, String)> = params
            .r#match
            .into_iter()
            .map(|m| ("match[]", m))
            .collect();
        let data = self.prom_fetch(backend, "api/v1/series", &query).await?;
        Ok(json!({ "series": data["data"].as_array().cloned().unwrap_or_default() }))
    }

    async fn list_dashboards(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            folder: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Grafana not configured")?;
        let backend = Self::grafana_backend(&cfg)?;

        let data = self
            .graf_fetch(
                backend,
                "api/search",
                &[
                    ("type", "dash-db".to_string()),
                    ("query", params.folder.clone().unwrap_or_default()),
                ],
            )
            .await?;
        let dashboards: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|d| {
                        json!({
                            "uid": d["uid"],
                            "title": d["title"],
                            "url": d["url"],
                            "folderTitle": d["folderTitle"],
                        })
                    })
                    .filter(|d| match &params.folder {
                        Some(folder) => d["folderTitle"] == folder.as_str(),
                        None => true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "dashboards": dashboards }))
    }

    async fn get_dashboard(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            uid: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Grafana not configured")?;
        let backend = Self::grafana_backend(&cfg)?;

        let data = self
            .graf_fetch(backend, &format!("api/dashboards/uid/{}", params.uid), &[])
            .await?;
        Ok(json!({ "dashboard": data["dashboard"], "meta": data["meta"] }))
    }

    async fn render_panel_snapshot(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct TimeRange {
            from: Option<String>,
            to: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            dashboard_uid: String,
            panel_id: u64,
            #[serde(default)]
            time_range: TimeRange,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Grafana not configured")?;
        let backend = Self::grafana_backend(&cfg)?;

        let from = params.time_range.from.unwrap_or_else(|| "now-1h".to_string());
        let to = params.time_range.to.unwrap_or_else(|| "now".to_string());
        let url = format!(
            "{}/render/d-solo/{}/_panel?panelId={}&from={}&to={}",
            normalize_base_url(&backend.url),
            params.dashboard_uid,
            params.panel_id,
            urlencoding::encode(&from),
            urlencoding::encode(&to),
        );
        Ok(json!({ "url": url }))
    }

    async fn get_recent_alerts(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            state: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.session.require("Prometheus not configured")?;
        let backend = Self::prometheus_backend(&cfg)?;

        let data = self.prom_fetch(backend, "api/v1/alerts", &[]).await?;
        let mut alerts: Vec<Value> = data["data"]["alerts"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        if let Some(state) = &params.state {
            alerts.retain(|a| a["state"] == state.as_str());
        }
        if let Some(limit) = params.limit {
            alerts.truncate(limit);
        }
        let mapped: Vec<Value> = alerts
            .iter()
            .map(|a| {
                json!({
                    "name": a["labels"]["alertname"],
                    "state": a["state"],
                    "labels": a["labels"],
                    "annotations": a["annotations"],
                    "startsAt": a["startsAt"],
                    "endsAt": a["endsAt"],
                })
            })
            .collect();
        Ok(json!({ "alerts": mapped }))
    }

    async fn get_service_health_summary(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct TimeRange {
            from: Option<String>,
            to: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            service: String,
            #[serde(default)]
            time_range: TimeRange,
        }
        let params: Params = parse_args(arguments)?;

        let from = params.time_range.from.unwrap_or_else(|| "now-30m".to_string());
        let to = params.time_range.to.unwrap_or_else(|| "now".to_string());
        enforce_range_guard(&from, &to, Some("60s"))?;

        let cfg = self.session.require("Prometheus not configured")?;
        let backend = Self::prometheus_backend(&cfg)?;
        let service = &params.service;

        let error_rate_q = format!(
            "sum(rate(http_requests_total{{service=\"{service}\",status=~\"5..\"}}[5m])) / sum(rate(http_requests_total{{service=\"{service}\"}}[5m]))"
        );
        let latency_q = format!(
            "histogram_quantile(0.95, sum(rate(http_request_duration_seconds_bucket{{service=\"{service}\"}}[5m])) by (le))"
        );
        let availability_q = format!(
            "1 - sum(rate(http_requests_total{{service=\"{service}\",status=~\"5..\"}}[5m])) / sum(rate(http_requests_total{{service=\"{service}\"}}[5m]))"
        );

        let instant = |q: String| {
            let to = to.clone();
            async move {
                self.prom_fetch(
                    backend,
                    "api/v1/query",
                    &[("query", q), ("time", to)],
                )
                .await
            }
        };
        let error_rate = instant(error_rate_q).await?;
        let latency = instant(latency_q).await?;
        let availability = instant(availability_q).await?;

        fn scalar(result: &Value) -> Option<f64> {
            result["data"]["result"][0]["value"][1]
                .as_str()
                .and_then(|v| v.parse().ok())
        }

        let error_rate = scalar(&error_rate);
        let latency = scalar(&latency);
        let availability = scalar(&availability);
        let degraded =
            error_rate.is_some_and(|v| v > 0.01) || latency.is_some_and(|v| v > 1000.0);

        Ok(json!({
            "service": params.service,
            "status": if degraded { "degraded" } else { "healthy" },
            "error_rate": error_rate,
            "latency_p95_ms": latency.map(|v| v * 1000.0),
            "availability": availability,
        }))
    }
}

#[async_trait]
impl Connector for ObservabilityConnector {
    fn name(&self) -> &'static str {
        "observability"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let auth_schema = json!({
            "type": "object",
            "properties": {
                "type": { "type": "string", "enum": ["bearer", "basic", "api_key"] },
                "token": { "type": "string" },
                "username": { "type": "string" },
                "password": { "type": "string" },
                "api_key": { "type": "string" }
            }
        });
        vec![
            ToolDefinition::new(
                "observability_health",
                "Health check for observability backends.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            ),
            ToolDefinition::new(
                "observability_configure",
                "Configure Prometheus and/or Grafana backends.",
                json!({
                    "type": "object",
                    "properties": {
                        "prometheus": {
                            "type": "object",
                            "properties": { "url": { "type": "string" }, "auth": auth_schema }
                        },
                        "grafana": {
                            "type": "object",
                            "properties": { "url": { "type": "string" }, "auth": auth_schema }
                        }
                    },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_query_prometheus",
                "Run a PromQL instant query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "time": { "type": "string" },
                        "timeout": { "type": "string" }
                    },
                    "required": ["query"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_query_range",
                "Run a PromQL range query.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "start": { "type": "string" },
                        "end": { "type": "string" },
                        "step": { "type": "string" },
                        "timeout": { "type": "string" }
                    },
                    "required": ["query", "start", "end", "step"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_list_prometheus_series",
                "List Prometheus series for given matchers.",
                json!({
                    "type": "object",
                    "properties": { "match": { "type": "array", "items": { "type": "string" } } },
                    "required": ["match"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_list_dashboards",
                "List Grafana dashboards (optional folder filter).",
                json!({
                    "type": "object",
                    "properties": { "folder": { "type": "string" } },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_get_dashboard",
                "Get Grafana dashboard JSON by UID.",
                json!({
                    "type": "object",
                    "properties": { "uid": { "type": "string" } },
                    "required": ["uid"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_render_panel_snapshot",
                "Return a render URL for a Grafana panel.",
                json!({
                    "type": "object",
                    "properties": {
                        "dashboard_uid": { "type": "string" },
                        "panel_id": { "type": "number" },
                        "time_range": {
                            "type": "object",
                            "properties": { "from": { "type": "string" }, "to": { "type": "string" } }
                        }
                    },
                    "required": ["dashboard_uid", "panel_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_get_recent_alerts",
                "Fetch active/recent alerts from Prometheus/Alertmanager.",
                json!({
                    "type": "object",
                    "properties": {
                        "state": { "type": "string" },
                        "limit": { "type": "number" }
                    },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "observability_get_service_health_summary",
                "Summarize service health via Prometheus metrics.",
                json!({
                    "type": "object",
                    "properties": {
                        "service": { "type": "string" },
                        "time_range": {
                            "type": "object",
                            "properties": { "from": { "type": "string" }, "to": { "type": "string" } }
                        }
                    },
                    "required": ["service"],
                    "additionalProperties": false
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let default_code = op.default_code();
        let result = match op {
            Op::Health => self.health().await,
            Op::Configure => self.configure(arguments).await,
            Op::QueryPrometheus => self.query_prometheus(arguments).await,
            Op::QueryRange => self.query_range(arguments).await,
            Op::ListPrometheusSeries => self.list_prometheus_series(arguments).await,
            Op::ListDashboards => self.list_dashboards(arguments).await,
            Op::GetDashboard => self.get_dashboard(arguments).await,
            Op::RenderPanelSnapshot => self.render_panel_snapshot(arguments).await,
            Op::GetRecentAlerts => self.get_recent_alerts(arguments).await,
            Op::GetServiceHealthSummary => self.get_service_health_summary(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::vendor_error(&e, default_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn prom_config(url: &str) -> ObservabilityConfig {
        ObservabilityConfig {
            prometheus: Some(BackendConfig {
                url: url.to_string(),
                auth: Some(BackendAuth::Bearer {
                    token: "tok".to_string(),
                }),
            }),
            grafana: None,
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_seconds("60s"), Some(60));
        assert_eq!(parse_duration_seconds("5m"), Some(300));
        assert_eq!(parse_duration_seconds("1h"), Some(3600));
        assert_eq!(parse_duration_seconds("nope"), None);
        assert_eq!(parse_duration_seconds(""), None);
    }

    #[test]
    fn test_range_guard_rejects_wide_windows() {
        let err = enforce_range_guard(
            "2024-05-01T00:00:00Z",
            "2024-05-01T04:00:00Z",
            Some("60s"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "QUERY_TOO_BROAD");
        assert!(err.to_string().contains("time range"));
    }

    #[test]
    fn test_range_guard_rejects_too_many_points() {
        let err = enforce_range_guard(
            "2024-05-01T00:00:00Z",
            "2024-05-01T02:00:00Z",
            Some("1s"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("too many points"));
    }

    #[test]
    fn test_range_guard_allows_sane_queries_and_relative_times() {
        assert!(enforce_range_guard(
            "2024-05-01T00:00:00Z",
            "2024-05-01T01:00:00Z",
            Some("60s")
        )
        .is_ok());
        assert!(enforce_range_guard("now-30m", "now", Some("60s")).is_ok());
    }

    #[tokio::test]
    async fn test_query_range_guard_blocks_before_any_request() {
        let server = MockServer::start();
        let upstream = server.mock(|when, then| {
            when.method(GET).path("/api/v1/query_range");
            then.status(200).json_body(json!({ "status": "success" }));
        });

        let connector = ObservabilityConnector::new(Some(prom_config(&server.base_url())));
        let result = connector
            .call(
                "observability_query_range",
                json!({
                    "query": "up",
                    "start": "2024-05-01T00:00:00Z",
                    "end": "2024-05-02T00:00:00Z",
                    "step": "60s"
                }),
            )
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "QUERY_TOO_BROAD");
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn test_instant_query_normalizes_result() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/api/v1/query")
                .query_param("query", "up");
            then.status(200).json_body(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{ "metric": { "job": "api" }, "value": [1714, "1"] }]
                }
            }));
        });

        let connector = ObservabilityConnector::new(Some(prom_config(&server.base_url())));
        let result = connector
            .call("observability_query_prometheus", json!({ "query": "up" }))
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["result_type"], "vector");
        assert_eq!(payload["data"][0]["metric"]["job"], "api");
    }

    #[tokio::test]
    async fn test_prometheus_level_error_surfaces() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/query");
            then.status(200).json_body(json!({
                "status": "error",
                "error": "parse error: unexpected character"
            }));
        });

        let connector = ObservabilityConnector::new(Some(prom_config(&server.base_url())));
        let result = connector
            .call("observability_query_prometheus", json!({ "query": "up{" }))
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "PROMETHEUS_ERROR");
        assert!(payload["error"]["message"]
            .as_str()
            .unwrap()
            .contains("parse error"));
    }

    #[tokio::test]
    async fn test_configure_requires_some_backend() {
        let connector = ObservabilityConnector::new(None);
        let result = connector.call("observability_configure", json!({})).await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_grafana_tool_without_grafana_backend() {
        let server = MockServer::start();
        let connector = ObservabilityConnector::new(Some(prom_config(&server.base_url())));
        let result = connector
            .call("observability_list_dashboards", json!({}))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Grafana not configured"));
    }
}
