//! Elasticsearch/OpenSearch connector.
//!
//! Log search tools build `_search` bodies server-side so callers only
//! supply a query string and a time range. Result sizes above the
//! configured maximum are rejected as `QUERY_TOO_BROAD` before the
//! request leaves the process.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::normalize_base_url;
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const MAX_SIZE: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EsAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey { api_key: String },
}

#[derive(Debug, Clone)]
pub struct ElasticConfig {
    pub url: String,
    pub auth: Option<EsAuth>,
    pub default_indices: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TimeRange {
    from: Option<String>,
    to: Option<String>,
}

enum Op {
    Health,
    Configure,
    ListIndices,
    GetIndexStats,
    GetMappings,
    SearchLogs,
    SearchStructured,
    Aggregate,
    FindRecentErrors,
    GetLogContext,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "elastic_health" => Some(Self::Health),
            "elastic_configure" => Some(Self::Configure),
            "elastic_list_indices" => Some(Self::ListIndices),
            "elastic_get_index_stats" => Some(Self::GetIndexStats),
            "elastic_get_mappings" => Some(Self::GetMappings),
            "elastic_search_logs" => Some(Self::SearchLogs),
            "elastic_search_structured" => Some(Self::SearchStructured),
            "elastic_aggregate" => Some(Self::Aggregate),
            "elastic_find_recent_errors" => Some(Self::FindRecentErrors),
            "elastic_get_log_context" => Some(Self::GetLogContext),
            _ => None,
        }
    }
}

/// Clamp-or-reject the requested result size.
fn checked_size(requested: Option<u64>, default: u64) -> Result<u64> {
    match requested {
        Some(size) if size > MAX_SIZE => Err(Error::QueryTooBroad(
            "QueryTooBroad: size exceeds limit".to_string(),
        )),
        Some(size) => Ok(size),
        None => Ok(default),
    }
}

fn parse_hits(data: &Value) -> Value {
    let hits: Vec<Value> = data["hits"]["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .map(|h| {
                    json!({
                        "index": h["_index"],
                        "id": h["_id"],
                        "score": h["_score"],
                        "timestamp": h["_source"]["@timestamp"],
                        "source": h["_source"],
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let total = match &data["hits"]["total"] {
        Value::Object(t) => t.get("value").cloned().unwrap_or(json!(hits.len())),
        Value::Number(n) => json!(n),
        _ => json!(hits.len()),
    };
    json!({ "hits": hits, "total": total })
}

pub struct ElasticConnector {
    session: SessionState<ElasticConfig>,
    client: reqwest::Client,
}

impl ElasticConnector {
    pub fn new(initial: Option<ElasticConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = env_var("ELASTIC_URL").map(|url| {
            let auth = if let Some(api_key) = env_var("ELASTIC_API_KEY") {
                Some(EsAuth::ApiKey { api_key })
            } else {
                match (env_var("ELASTIC_USERNAME"), env_var("ELASTIC_PASSWORD")) {
                    (Some(username), Some(password)) => Some(EsAuth::Basic { username, password }),
                    _ => None,
                }
            };
            ElasticConfig {
                url,
                auth,
                default_indices: env_var("ELASTIC_INDICES")
                    .map(|raw| raw.split(',').map(str::to_string).collect()),
            }
        });
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<ElasticConfig>> {
        self.session
            .require("Elasticsearch is not configured. Call elastic_configure first.")
    }

    fn default_indices(cfg: &ElasticConfig, requested: Option<Vec<String>>) -> String {
        match requested {
            Some(indices) if !indices.is_empty() => indices.join(","),
            _ => cfg
                .default_indices
                .clone()
                .unwrap_or_else(|| vec!["*".to_string()])
                .join(","),
        }
    }

    async fn es_fetch(
        &self,
        cfg: &ElasticConfig,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}/{path}", normalize_base_url(&cfg.url));
        debug!(%url, "elasticsearch request");

        let mut builder = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json");
        builder = match &cfg.auth {
            Some(EsAuth::Basic { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                builder.header("Authorization", format!("Basic {encoded}"))
            }
            Some(EsAuth::Bearer { token }) => {
                builder.header("Authorization", format!("Bearer {token}"))
            }
            Some(EsAuth::ApiKey { api_key }) => {
                builder.header("Authorization", format!("ApiKey {api_key}"))
            }
            None => builder,
        };
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

        if !(200..300).contains(&status) || !data["error"].is_null() {
            let err = &data["error"];
            let message = err["reason"]
                .as_str()
                .or_else(|| err["type"].as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("Elasticsearch request failed ({status})"));
            return Err(Error::from_status(status.max(400), message));
        }
        Ok(data)
    }

    async fn health(&self) -> Result<Value> {
        let cfg = self.require()?;
        self.es_fetch(&cfg, reqwest::Method::GET, "_cluster/health", &[], None)
            .await?;
        Ok(json!({ "ok": true }))
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            url: String,
            auth: Option<EsAuth>,
            default_indices: Option<Vec<String>>,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = ElasticConfig {
            url: params.url,
            auth: params.auth,
            default_indices: params.default_indices,
        };
        self.es_fetch(&candidate, reqwest::Method::GET, "_cluster/health", &[], None)
            .await?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true }))
    }

    async fn list_indices(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            pattern: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let pattern = params.pattern.unwrap_or_else(|| "*".to_string());
        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("_cat/indices/{pattern}"),
                &[("format", "json".to_string())],
                None,
            )
            .await?;
        let indices: Vec<Value> = data
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|i| {
                        json!({
                            "name": i["index"],
                            "docs_count": i["docs.count"],
                            "size_bytes": i["store.size"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "indices": indices }))
    }

    async fn get_index_stats(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            indices: Vec<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("{}/_stats", params.indices.join(",")),
                &[],
                None,
            )
            .await?;
        let stats: Vec<Value> = data["indices"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(name, s)| {
                        json!({
                            "name": name,
                            "docs_count": s["total"]["docs"]["count"],
                            "size_in_bytes": s["total"]["store"]["size_in_bytes"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "stats": stats }))
    }

    async fn get_mappings(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            index: String,
            path_prefix: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("{}/_mapping", params.index),
                &[],
                None,
            )
            .await?;
        let mut mappings = data[params.index.as_str()]["mappings"].clone();
        if mappings.is_null() {
            mappings = data;
        }
        if let Some(prefix) = params.path_prefix {
            if let Some(properties) = mappings["properties"].as_object() {
                let filtered: serde_json::Map<String, Value> = properties
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                mappings = Value::Object(filtered);
            }
        }
        Ok(json!({ "mappings": mappings }))
    }

    async fn search_logs(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            indices: Option<Vec<String>>,
            query_string: String,
            #[serde(default)]
            time_range: TimeRange,
            size: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let indices = Self::default_indices(&cfg, params.indices);
        let size = checked_size(params.size, 100)?;

        let mut filter = Vec::new();
        if params.time_range.from.is_some() || params.time_range.to.is_some() {
            filter.push(json!({
                "range": {
                    "@timestamp": { "gte": params.time_range.from, "lte": params.time_range.to }
                }
            }));
        }
        let body = json!({
            "query": {
                "bool": {
                    "must": [{ "query_string": { "query": params.query_string } }],
                    "filter": filter,
                }
            },
            "size": size,
        });

        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{indices}/_search"),
                &[],
                Some(&body),
            )
            .await?;
        Ok(parse_hits(&data))
    }

    async fn search_structured(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            indices: Option<Vec<String>>,
            body: Value,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let indices = Self::default_indices(&cfg, params.indices);
        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{indices}/_search"),
                &[],
                Some(&params.body),
            )
            .await?;
        let mut parsed = parse_hits(&data);
        parsed["aggregations"] = data["aggregations"].clone();
        Ok(parsed)
    }

    async fn aggregate(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            indices: Option<Vec<String>>,
            body: Value,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let indices = Self::default_indices(&cfg, params.indices);
        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{indices}/_search"),
                &[],
                Some(&params.body),
            )
            .await?;
        Ok(json!({ "aggregations": data["aggregations"] }))
    }

    async fn find_recent_errors(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            service: String,
            #[serde(default)]
            time_range: TimeRange,
            size: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let indices = Self::default_indices(&cfg, None);
        let size = checked_size(params.size, 50)?;

        let mut filter = vec![json!({ "term": { "level.keyword": "ERROR" } })];
        if params.time_range.from.is_some() || params.time_range.to.is_some() {
            filter.push(json!({
                "range": {
                    "@timestamp": { "gte": params.time_range.from, "lte": params.time_range.to }
                }
            }));
        }
        let body = json!({
            "query": {
                "bool": {
                    "must": [{ "term": { "service.keyword": params.service } }],
                    "filter": filter,
                }
            },
            "sort": [{ "@timestamp": { "order": "desc" } }],
            "size": size,
        });

        let data = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{indices}/_search"),
                &[],
                Some(&body),
            )
            .await?;
        Ok(parse_hits(&data))
    }

    async fn get_log_context(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            index: String,
            id: String,
            before: Option<u64>,
            after: Option<u64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let doc = self
            .es_fetch(
                &cfg,
                reqwest::Method::GET,
                &format!("{}/_doc/{}", params.index, params.id),
                &[],
                None,
            )
            .await?;
        let ts = doc["_source"]["@timestamp"].clone();
        if ts.is_null() {
            return Err(Error::InvalidRequest(
                "Timestamp not found on document".to_string(),
            ));
        }

        let before_size = checked_size(params.before, 20)?;
        let after_size = checked_size(params.after, 20)?;
        let base_query = json!({
            "bool": { "filter": [{ "range": { "@timestamp": { "gte": "now-1d", "lte": "now" } } }] }
        });

        let before = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{}/_search", params.index),
                &[],
                Some(&json!({
                    "query": base_query,
                    "sort": [{ "@timestamp": { "order": "desc" } }],
                    "size": before_size,
                    "search_after": [ts],
                })),
            )
            .await?;
        let after = self
            .es_fetch(
                &cfg,
                reqwest::Method::POST,
                &format!("{}/_search", params.index),
                &[],
                Some(&json!({
                    "query": base_query,
                    "sort": [{ "@timestamp": { "order": "asc" } }],
                    "size": after_size,
                    "search_after": [ts],
                })),
            )
            .await?;

        Ok(json!({
            "target": doc["_source"],
            "before": parse_hits(&before)["hits"],
            "after": parse_hits(&after)["hits"],
        }))
    }
}

#[async_trait]
impl Connector for ElasticConnector {
    fn name(&self) -> &'static str {
        "elastic"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let time_range = json!({
            "type": "object",
            "properties": { "from": { "type": "string" }, "to": { "type": "string" } }
        });
        vec![
            ToolDefinition::new(
                "elastic_health",
                "Health check for Elastic/OpenSearch MCP server.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            ),
            ToolDefinition::new(
                "elastic_configure",
                "Configure Elasticsearch/OpenSearch connection for this session.",
                json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string" },
                        "auth": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["basic", "bearer", "api_key"] },
                                "username": { "type": "string" },
                                "password": { "type": "string" },
                                "token": { "type": "string" },
                                "api_key": { "type": "string" }
                            }
                        },
                        "default_indices": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["url"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_list_indices",
                "List indices (optionally filtered by pattern).",
                json!({
                    "type": "object",
                    "properties": { "pattern": { "type": "string" } },
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_get_index_stats",
                "Get stats for indices.",
                json!({
                    "type": "object",
                    "properties": { "indices": { "type": "array", "items": { "type": "string" } } },
                    "required": ["indices"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_get_mappings",
                "Get field mappings for an index.",
                json!({
                    "type": "object",
                    "properties": {
                        "index": { "type": "string" },
                        "path_prefix": { "type": "string" }
                    },
                    "required": ["index"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_search_logs",
                "Search logs with query_string and optional time_range.",
                json!({
                    "type": "object",
                    "properties": {
                        "indices": { "type": "array", "items": { "type": "string" } },
                        "query_string": { "type": "string" },
                        "time_range": time_range.clone(),
                        "size": { "type": "number" }
                    },
                    "required": ["query_string"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_search_structured",
                "Run a structured JSON search query.",
                json!({
                    "type": "object",
                    "properties": {
                        "indices": { "type": "array", "items": { "type": "string" } },
                        "body": { "type": "object" }
                    },
                    "required": ["body"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_aggregate",
                "Run aggregation-only queries.",
                json!({
                    "type": "object",
                    "properties": {
                        "indices": { "type": "array", "items": { "type": "string" } },
                        "body": { "type": "object" }
                    },
                    "required": ["body"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_find_recent_errors",
                "Fetch recent error-level logs for a service.",
                json!({
                    "type": "object",
                    "properties": {
                        "service": { "type": "string" },
                        "time_range": time_range,
                        "size": { "type": "number" }
                    },
                    "required": ["service"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "elastic_get_log_context",
                "Fetch a log document and surrounding context.",
                json!({
                    "type": "object",
                    "properties": {
                        "index": { "type": "string" },
                        "id": { "type": "string" },
                        "before": { "type": "number", "default": 20 },
                        "after": { "type": "number", "default": 20 }
                    },
                    "required": ["index", "id"],
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
            Op::Health => self.health().await,
            Op::Configure => self.configure(arguments).await,
            Op::ListIndices => self.list_indices(arguments).await,
            Op::GetIndexStats => self.get_index_stats(arguments).await,
            Op::GetMappings => self.get_mappings(arguments).await,
            Op::SearchLogs => self.search_logs(arguments).await,
            Op::SearchStructured => self.search_structured(arguments).await,
            Op::Aggregate => self.aggregate(arguments).await,
            Op::FindRecentErrors => self.find_recent_errors(arguments).await,
            Op::GetLogContext => self.get_log_context(arguments).await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::vendor_error(&e, "ELASTICSEARCH_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_config(url: &str) -> ElasticConfig {
        ElasticConfig {
            url: url.to_string(),
            auth: Some(EsAuth::ApiKey {
                api_key: "key".to_string(),
            }),
            default_indices: Some(vec!["logs-app".to_string()]),
        }
    }

    #[test]
    fn test_checked_size_guardrail() {
        assert_eq!(checked_size(None, 100).unwrap(), 100);
        assert_eq!(checked_size(Some(500), 100).unwrap(), 500);
        let err = checked_size(Some(MAX_SIZE + 1), 100).unwrap_err();
        assert_eq!(err.code(), "QUERY_TOO_BROAD");
    }

    #[test]
    fn test_parse_hits_total_variants() {
        let object_total = json!({
            "hits": { "total": { "value": 7 }, "hits": [
                { "_index": "logs", "_id": "1", "_score": 1.0, "_source": { "@timestamp": "t" } }
            ]}
        });
        let parsed = parse_hits(&object_total);
        assert_eq!(parsed["total"], 7);
        assert_eq!(parsed["hits"][0]["index"], "logs");

        let numeric_total = json!({ "hits": { "total": 3, "hits": [] } });
        assert_eq!(parse_hits(&numeric_total)["total"], 3);
    }

    #[tokio::test]
    async fn test_search_logs_builds_bool_query() {
        let server = MockServer::start();
        let search = server.mock(|when, then| {
            when.method(POST)
                .path("/logs-app/_search")
                .body_includes("query_string")
                .body_includes("\"size\":25");
            then.status(200).json_body(json!({
                "hits": { "total": { "value": 1 }, "hits": [
                    { "_index": "logs-app", "_id": "a", "_source": { "@timestamp": "2024-05-01T00:00:00Z", "msg": "boom" } }
                ]}
            }));
        });

        let connector = ElasticConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call(
                "elastic_search_logs",
                json!({ "query_string": "message:boom", "size": 25 }),
            )
            .await;

        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["total"], 1);
        assert_eq!(payload["hits"][0]["id"], "a");
        search.assert();
    }

    #[tokio::test]
    async fn test_size_over_limit_rejected_locally() {
        let server = MockServer::start();
        let upstream = server.mock(|when, then| {
            when.method(POST).path_includes("_search");
            then.status(200).json_body(json!({}));
        });

        let connector = ElasticConnector::new(Some(test_config(&server.base_url())));
        let result = connector
            .call(
                "elastic_search_logs",
                json!({ "query_string": "x", "size": 5000 }),
            )
            .await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "QUERY_TOO_BROAD");
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn test_es_error_body_surfaces_reason() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/_cat/indices/*");
            then.status(400).json_body(json!({
                "error": { "type": "parsing_exception", "reason": "bad pattern" }
            }));
        });

        let connector = ElasticConnector::new(Some(test_config(&server.base_url())));
        let result = connector.call("elastic_list_indices", Value::Null).await;

        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "ELASTICSEARCH_ERROR");
        assert!(payload["error"]["message"].as_str().unwrap().contains("bad pattern"));
    }

    #[tokio::test]
    async fn test_configure_rolls_back_on_unreachable_cluster() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/_cluster/health");
            then.status(401).json_body(json!({ "error": { "reason": "denied" } }));
        });

        let connector = ElasticConnector::new(None);
        let result = connector
            .call("elastic_configure", json!({ "url": server.base_url() }))
            .await;
        assert!(result.failed());

        let result = connector.call("elastic_health", Value::Null).await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }
}
