//! Figma connector.
//!
//! File and node fetches are memoized for five minutes because the QA
//! tools (frame specs, scenario suggestions, selector generation) hammer
//! the same file repeatedly. Batch operations are capped at 500 nodes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::tool::parse_args;
use flocca_core::{
    Connector, Error, ProxySettings, Result, SessionState, ToolDefinition, ToolResult,
};

const API_BASE: &str = "https://api.figma.com";
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const PAYLOAD_LIMIT_NODES: usize = 500;

#[derive(Debug, Clone)]
pub struct FigmaConfig {
    pub token: String,
    pub default_file_key: Option<String>,
}

#[derive(Default)]
struct TtlCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl TtlCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((value, stored)) = entries.get(key) {
            if stored.elapsed() < CACHE_TTL {
                return Some(value.clone());
            }
        }
        entries.remove(key);
        None
    }

    fn put(&self, key: String, value: Value) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, (value, Instant::now()));
    }
}

enum Op {
    Configure,
    Health,
    GetFileMetadata,
    ListPages,
    FindFrames,
    GetFrameSpec,
    GetComponentVariants,
    ExtractDesignTokens,
    SuggestTestScenarios,
    GenerateStableSelectors,
    ExportFrameImage,
    ExportNodeImagesBatch,
    DiffVersions,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "figma_configure" => Some(Self::Configure),
            "figma_health" => Some(Self::Health),
            "figma_get_file_metadata" => Some(Self::GetFileMetadata),
            "figma_list_pages" => Some(Self::ListPages),
            "figma_find_frames" => Some(Self::FindFrames),
            "figma_get_frame_spec" => Some(Self::GetFrameSpec),
            "figma_get_component_variants" => Some(Self::GetComponentVariants),
            "figma_extract_design_tokens" => Some(Self::ExtractDesignTokens),
            "figma_suggest_test_scenarios" => Some(Self::SuggestTestScenarios),
            "figma_generate_stable_selectors" => Some(Self::GenerateStableSelectors),
            "figma_export_frame_image" => Some(Self::ExportFrameImage),
            "figma_export_node_images_batch" => Some(Self::ExportNodeImagesBatch),
            "figma_diff_versions" => Some(Self::DiffVersions),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame analysis helpers
// ---------------------------------------------------------------------------

fn flatten_nodes<'a>(node: &'a Value, acc: &mut Vec<&'a Value>) {
    acc.push(node);
    if let Some(children) = node["children"].as_array() {
        for child in children {
            flatten_nodes(child, acc);
        }
    }
}

fn is_frame(node: &Value) -> bool {
    matches!(
        node["type"].as_str(),
        Some("FRAME") | Some("COMPONENT") | Some("INSTANCE")
    )
}

fn name_matches(node: &Value, needles: &[&str]) -> bool {
    node["name"]
        .as_str()
        .map(|name| {
            let lower = name.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
        .unwrap_or(false)
}

/// Reduce a frame subtree to the QA-relevant controls.
fn extract_frame_spec(frame: &Value) -> Value {
    let mut texts = Vec::new();
    let mut buttons = Vec::new();
    let mut toggles = Vec::new();
    let mut inputs = Vec::new();
    let mut components = Vec::new();

    let mut nodes = Vec::new();
    flatten_nodes(frame, &mut nodes);

    for node in nodes {
        if node["type"] == "TEXT" {
            if let Some(chars) = node["characters"].as_str() {
                texts.push(json!({ "id": node["id"], "text": chars, "name": node["name"] }));
                let lower = chars.to_lowercase();
                if ["required", "error", "invalid", "warning"]
                    .iter()
                    .any(|w| lower.contains(w))
                {
                    components.push(json!({
                        "id": node["id"],
                        "hint": "validation_text",
                        "text": chars,
                    }));
                }
            }
            continue;
        }
        if matches!(
            node["type"].as_str(),
            Some("FRAME") | Some("GROUP") | Some("INSTANCE") | Some("COMPONENT")
        ) {
            if name_matches(node, &["button", "cta", "submit"]) {
                buttons.push(json!({ "id": node["id"], "name": node["name"] }));
            }
            if name_matches(node, &["toggle", "switch", "checkbox"]) {
                toggles.push(json!({ "id": node["id"], "name": node["name"] }));
            }
            if name_matches(node, &["input", "field", "textbox", "email", "password"]) {
                inputs.push(json!({ "id": node["id"], "name": node["name"] }));
            }
        }
    }

    json!({
        "id": frame["id"],
        "name": frame["name"],
        "type": frame["type"],
        "inputs": inputs,
        "buttons": buttons,
        "toggles": toggles,
        "texts": texts,
        "variants": frame.get("componentPropertyReferences").cloned().unwrap_or(json!({})),
        "components": components,
    })
}

fn suggest_scenarios(spec: &Value) -> Vec<String> {
    let mut scenarios = Vec::new();
    let has_email_input = spec["inputs"]
        .as_array()
        .is_some_and(|inputs| {
            inputs.iter().any(|i| {
                i["name"]
                    .as_str()
                    .is_some_and(|n| n.to_lowercase().contains("email"))
            })
        });
    if has_email_input {
        scenarios.push("Email is required".to_string());
        scenarios.push("Invalid email shows error".to_string());
    }
    if spec["buttons"].as_array().is_some_and(|b| !b.is_empty()) {
        scenarios.push("Submit disabled until valid".to_string());
        scenarios.push("Loading prevents double submit".to_string());
    }
    scenarios.push("Keyboard navigation works".to_string());
    scenarios
}

fn generate_selectors(spec: &Value) -> Vec<Value> {
    let mut selectors = Vec::new();
    if let Some(buttons) = spec["buttons"].as_array() {
        for b in buttons {
            selectors.push(json!({ "node_id": b["id"], "strategy": "id", "value": b["id"] }));
        }
    }
    if let Some(inputs) = spec["inputs"].as_array() {
        for i in inputs {
            selectors.push(json!({ "node_id": i["id"], "strategy": "id", "value": i["id"] }));
            selectors.push(json!({ "node_id": i["id"], "strategy": "name", "value": i["name"] }));
        }
    }
    selectors
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

pub struct FigmaConnector {
    session: SessionState<FigmaConfig>,
    proxy: Option<ProxySettings>,
    base_url: String,
    client: reqwest::Client,
    files: TtlCache,
    nodes: TtlCache,
}

impl FigmaConnector {
    pub fn new(
        initial: Option<FigmaConfig>,
        proxy: Option<ProxySettings>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            session: SessionState::new(initial),
            proxy,
            base_url: base_url.unwrap_or_else(|| API_BASE.to_string()),
            client: reqwest::Client::new(),
            files: TtlCache::default(),
            nodes: TtlCache::default(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = env_var("FIGMA_TOKEN").map(|token| FigmaConfig {
            token,
            default_file_key: env_var("FIGMA_DEFAULT_FILE_KEY"),
        });
        Self::new(initial, ProxySettings::from_env(), None)
    }

    fn require(&self) -> Result<Option<std::sync::Arc<FigmaConfig>>> {
        // Proxy mode needs no local token.
        if self.proxy.is_some() {
            return Ok(self.session.snapshot());
        }
        self.session
            .require("Figma not configured. Call figma_configure first.")
            .map(Some)
    }

    async fn figma_fetch(
        &self,
        token: Option<&str>,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let (url, builder) = match &self.proxy {
            Some(proxy) => {
                let url = format!("{}{path}", proxy.url);
                let builder = self
                    .client
                    .get(&url)
                    .header(ProxySettings::USER_HEADER, &proxy.user_id)
                    .header("Content-Type", "application/json");
                (url, builder)
            }
            None => {
                let url = format!("{}{path}", self.base_url);
                let builder = self
                    .client
                    .get(&url)
                    .header("X-Figma-Token", token.unwrap_or_default());
                (url, builder)
            }
        };
        debug!(%url, "figma request");

        let builder = if query.is_empty() {
            builder
        } else {
            builder.query(query)
        };
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(json!({}));

        if !(200..300).contains(&status) || !data["err"].is_null() {
            let message = data["err"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Figma request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }

    async fn get_file(&self, cfg: Option<&FigmaConfig>, file_key: &str) -> Result<Value> {
        if let Some(cached) = self.files.get(file_key) {
            debug!(file_key, "file cache hit");
            return Ok(cached);
        }
        let data = self
            .figma_fetch(
                cfg.map(|c| c.token.as_str()),
                &format!("/v1/files/{file_key}"),
                &[("geometry", "paths".to_string())],
            )
            .await?;
        self.files.put(file_key.to_string(), data.clone());
        Ok(data)
    }

    async fn get_nodes(
        &self,
        cfg: Option<&FigmaConfig>,
        file_key: &str,
        node_ids: &[String],
    ) -> Result<Value> {
        let mut sorted = node_ids.to_vec();
        sorted.sort();
        let cache_key = format!("{file_key}:{}", sorted.join(","));
        if let Some(cached) = self.nodes.get(&cache_key) {
            debug!(file_key, "nodes cache hit");
            return Ok(cached);
        }
        let data = self
            .figma_fetch(
                cfg.map(|c| c.token.as_str()),
                &format!("/v1/files/{file_key}/nodes"),
                &[("ids", node_ids.join(","))],
            )
            .await?;
        self.nodes.put(cache_key, data.clone());
        Ok(data)
    }

    fn resolve_file_key(
        &self,
        cfg: Option<&FigmaConfig>,
        file_key: Option<String>,
    ) -> Result<String> {
        file_key
            .or_else(|| cfg.and_then(|c| c.default_file_key.clone()))
            .ok_or_else(|| Error::InvalidRequest("file_key required".to_string()))
    }

    async fn fetch_single_node(
        &self,
        cfg: Option<&FigmaConfig>,
        file_key: &str,
        node_id: &str,
    ) -> Result<Value> {
        let data = self.get_nodes(cfg, file_key, &[node_id.to_string()]).await?;
        let node = data["nodes"][node_id]["document"].clone();
        if node.is_null() {
            return Err(Error::NotFound("Node not found".to_string()));
        }
        Ok(node)
    }

    async fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Auth {
            token: String,
        }
        #[derive(Deserialize, Default)]
        struct Defaults {
            file_key: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            auth: Auth,
            #[serde(default)]
            defaults: Defaults,
        }
        let params: Params = parse_args(arguments)?;

        let candidate = FigmaConfig {
            token: params.auth.token,
            default_file_key: params.defaults.file_key,
        };
        let me = self
            .figma_fetch(Some(candidate.token.as_str()), "/v1/me", &[])
            .await?;

        self.session.replace(candidate);
        Ok(json!({ "ok": true, "user": me["user"], "scopes": me["scopes"] }))
    }

    async fn health(&self) -> Result<Value> {
        let cfg = self.require()?;
        let me = self
            .figma_fetch(cfg.as_deref().map(|c| c.token.as_str()), "/v1/me", &[])
            .await?;
        Ok(json!({ "ok": true, "user": me["user"] }))
    }

    async fn get_file_metadata(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            file_key: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let data = self.get_file(cfg.as_deref(), &file_key).await?;
        Ok(json!({
            "name": data["name"],
            "lastModified": data["lastModified"],
            "pages": pages_of(&data),
            "version": data["version"],
        }))
    }

    async fn list_pages(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            file_key: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let data = self.get_file(cfg.as_deref(), &file_key).await?;
        Ok(json!({ "pages": pages_of(&data) }))
    }

    async fn find_frames(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            query: String,
            limit: Option<usize>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let data = self.get_file(cfg.as_deref(), &file_key).await?;

        let needle = params.query.to_lowercase();
        let mut nodes = Vec::new();
        flatten_nodes(&data["document"], &mut nodes);
        let frames: Vec<Value> = nodes
            .into_iter()
            .filter(|n| is_frame(n))
            .filter(|n| {
                n["name"]
                    .as_str()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .take(params.limit.unwrap_or(50))
            .map(|n| json!({ "id": n["id"], "name": n["name"], "type": n["type"] }))
            .collect();
        Ok(json!({ "frames": frames }))
    }

    async fn get_frame_spec(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let node = self
            .fetch_single_node(cfg.as_deref(), &file_key, &params.node_id)
            .await?;
        if !is_frame(&node) {
            return Err(Error::InvalidRequest(
                "Node is not a frame/component".to_string(),
            ));
        }
        let spec = extract_frame_spec(&node);
        let control_count = ["inputs", "buttons", "toggles"]
            .iter()
            .map(|k| spec[k].as_array().map(Vec::len).unwrap_or(0))
            .sum::<usize>();
        if control_count > PAYLOAD_LIMIT_NODES {
            return Err(Error::InvalidRequest("Payload too large".to_string()));
        }
        Ok(json!({ "frame": spec }))
    }

    async fn get_component_variants(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let node = self
            .fetch_single_node(cfg.as_deref(), &file_key, &params.node_id)
            .await?;
        if node["type"] != "COMPONENT_SET" {
            return Err(Error::InvalidRequest("Not a component set".to_string()));
        }
        let variants: Vec<Value> = node["children"]
            .as_array()
            .map(|children| {
                children
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c["id"],
                            "name": c["name"],
                            "properties": c["componentProperties"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "variants": variants }))
    }

    async fn extract_design_tokens(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize, Default)]
        struct Params {
            file_key: Option<String>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let data = self.get_file(cfg.as_deref(), &file_key).await?;

        let mut colors = Vec::new();
        let mut typography = Vec::new();
        if let Some(styles) = data["styles"].as_object() {
            for (id, style) in styles {
                let entry = json!({ "id": id, "name": style["name"], "type": style["styleType"] });
                match style["styleType"].as_str() {
                    Some("FILL") => colors.push(entry),
                    Some("TEXT") => typography.push(entry),
                    _ => {}
                }
            }
        }
        Ok(json!({ "colors": colors, "typography": typography }))
    }

    async fn suggest_test_scenarios(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let node = self
            .fetch_single_node(cfg.as_deref(), &file_key, &params.node_id)
            .await?;
        let spec = extract_frame_spec(&node);
        Ok(json!({ "scenarios": suggest_scenarios(&spec) }))
    }

    async fn generate_stable_selectors(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_id: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let node = self
            .fetch_single_node(cfg.as_deref(), &file_key, &params.node_id)
            .await?;
        let spec = extract_frame_spec(&node);
        Ok(json!({ "selectors": generate_selectors(&spec) }))
    }

    async fn export_images(
        &self,
        file_key: &str,
        node_ids: &[String],
        format: Option<String>,
        scale: Option<f64>,
        cfg: Option<&FigmaConfig>,
    ) -> Result<Value> {
        let mut query = vec![
            ("ids", node_ids.join(",")),
            ("format", format.unwrap_or_else(|| "png".to_string())),
        ];
        if let Some(scale) = scale {
            query.push(("scale", scale.to_string()));
        }
        let data = self
            .figma_fetch(
                cfg.map(|c| c.token.as_str()),
                &format!("/v1/images/{file_key}"),
                &query,
            )
            .await?;
        let images: Vec<Value> = data["images"]
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(id, url)| json!({ "id": id, "url": url }))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "images": images }))
    }

    async fn export_frame_image(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_id: String,
            format: Option<String>,
            scale: Option<f64>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        self.export_images(
            &file_key,
            &[params.node_id],
            params.format,
            params.scale,
            cfg.as_deref(),
        )
        .await
    }

    async fn export_node_images_batch(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            node_ids: Vec<String>,
            format: Option<String>,
            scale: Option<f64>,
        }
        let params: Params = parse_args(arguments)?;
        if params.node_ids.len() > PAYLOAD_LIMIT_NODES {
            return Err(Error::InvalidRequest("Too many nodes requested".to_string()));
        }
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        self.export_images(
            &file_key,
            &params.node_ids,
            params.format,
            params.scale,
            cfg.as_deref(),
        )
        .await
    }

    async fn diff_versions(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_key: Option<String>,
            from_version: String,
            to_version: String,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;
        let file_key = self.resolve_file_key(cfg.as_deref(), params.file_key)?;
        let data = self
            .figma_fetch(
                cfg.as_deref().map(|c| c.token.as_str()),
                &format!("/v1/files/{file_key}/versions"),
                &[],
            )
            .await?;
        let versions = data["versions"].as_array().cloned().unwrap_or_default();
        let find = |id: &str| {
            versions
                .iter()
                .find(|v| v["id"] == id)
                .cloned()
                .unwrap_or(Value::Null)
        };
        Ok(json!({
            "from": find(&params.from_version),
            "to": find(&params.to_version),
            "changes": ["Changed frames or components not computed (placeholder)"],
        }))
    }
}

fn pages_of(file: &Value) -> Vec<Value> {
    file["document"]["children"]
        .as_array()
        .map(|pages| {
            pages
                .iter()
                .map(|p| json!({ "id": p["id"], "name": p["name"], "type": p["type"] }))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Connector for FigmaConnector {
    fn name(&self) -> &'static str {
        "figma"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let file_key_only = json!({
            "type": "object",
            "properties": { "file_key": { "type": "string" } },
            "additionalProperties": false
        });
        let node_in_file = json!({
            "type": "object",
            "properties": {
                "file_key": { "type": "string" },
                "node_id": { "type": "string" }
            },
            "required": ["node_id"],
            "additionalProperties": false
        });
        vec![
            ToolDefinition::new(
                "figma_configure",
                "Configure Figma MCP session.",
                json!({
                    "type": "object",
                    "properties": {
                        "auth": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["pat"] },
                                "token": { "type": "string" }
                            },
                            "required": ["token"]
                        },
                        "defaults": {
                            "type": "object",
                            "properties": { "file_key": { "type": "string" } }
                        }
                    },
                    "required": ["auth"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "figma_health",
                "Health check.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            ),
            ToolDefinition::new("figma_get_file_metadata", "Get Figma file metadata.", file_key_only.clone()),
            ToolDefinition::new("figma_list_pages", "List pages in a file.", file_key_only.clone()),
            ToolDefinition::new(
                "figma_find_frames",
                "Find frames by name.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_key": { "type": "string" },
                        "query": { "type": "string" },
                        "limit": { "type": "number" }
                    },
                    "required": ["query"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new("figma_get_frame_spec", "Return QA-friendly frame spec.", node_in_file.clone()),
            ToolDefinition::new("figma_get_component_variants", "List component variants.", node_in_file.clone()),
            ToolDefinition::new("figma_extract_design_tokens", "Extract color/typography tokens.", file_key_only),
            ToolDefinition::new("figma_suggest_test_scenarios", "Suggest QA scenarios for a frame.", node_in_file.clone()),
            ToolDefinition::new("figma_generate_stable_selectors", "Suggest selector strategies for Playwright.", node_in_file.clone()),
            ToolDefinition::new(
                "figma_export_frame_image",
                "Export a frame as image.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_key": { "type": "string" },
                        "node_id": { "type": "string" },
                        "format": { "type": "string" },
                        "scale": { "type": "number" }
                    },
                    "required": ["node_id"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "figma_export_node_images_batch",
                "Batch export node images.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_key": { "type": "string" },
                        "node_ids": { "type": "array", "items": { "type": "string" } },
                        "format": { "type": "string" },
                        "scale": { "type": "number" }
                    },
                    "required": ["node_ids"],
                    "additionalProperties": false
                }),
            ),
            ToolDefinition::new(
                "figma_diff_versions",
                "Diff two versions for changed nodes.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_key": { "type": "string" },
                        "from_version": { "type": "string" },
                        "to_version": { "type": "string" }
                    },
                    "required": ["from_version", "to_version"],
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
            Op::Configure => self.configure(arguments).await,
            Op::Health => self.health().await,
            Op::GetFileMetadata => self.get_file_metadata(arguments).await,
            Op::ListPages => self.list_pages(arguments).await,
            Op::FindFrames => self.find_frames(arguments).await,
            Op::GetFrameSpec => self.get_frame_spec(arguments).await,
            Op::GetComponentVariants => self.get_component_variants(arguments).await,
            Op::ExtractDesignTokens => self.extract_design_tokens(arguments).await,
            Op::SuggestTestScenarios => self.suggest_test_scenarios(arguments).await,
            Op::GenerateStableSelectors => self.generate_stable_selectors(arguments).await,
            Op::ExportFrameImage => self.export_frame_image(arguments).await,
            Op::ExportNodeImagesBatch => self.export_node_images_batch(arguments).await,
            Op::DiffVersions => self.diff_versions(arguments).await,
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

    fn test_connector(server: &MockServer) -> FigmaConnector {
        FigmaConnector::new(
            Some(FigmaConfig {
                token: "pat".to_string(),
                default_file_key: Some("FILE1".to_string()),
            }),
            None,
            Some(server.base_url()),
        )
    }

    fn file_body() -> Value {
        json!({
            "name": "Design",
            "lastModified": "2024-05-01T00:00:00Z",
            "version": "9",
            "document": {
                "id": "0:0",
                "type": "DOCUMENT",
                "children": [
                    { "id": "1:1", "name": "Page 1", "type": "CANVAS", "children": [
                        { "id": "2:1", "name": "Login Screen", "type": "FRAME", "children": [] }
                    ] }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_file_fetch_is_memoized() {
        let server = MockServer::start();
        let upstream = server.mock(|when, then| {
            when.method(GET).path("/v1/files/FILE1");
            then.status(200).json_body(file_body());
        });

        let connector = test_connector(&server);
        let first = connector.call("figma_list_pages", Value::Null).await;
        let second = connector.call("figma_list_pages", Value::Null).await;

        assert!(!first.failed());
        assert!(!second.failed());
        assert!(second.text_content().contains("Page 1"));
        // The second call is served from the TTL cache.
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn test_find_frames_matches_by_name() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/files/FILE1");
            then.status(200).json_body(file_body());
        });

        let connector = test_connector(&server);
        let result = connector
            .call("figma_find_frames", json!({ "query": "login" }))
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["frames"][0]["name"], "Login Screen");
    }

    #[tokio::test]
    async fn test_frame_spec_extraction() {
        let frame = json!({
            "id": "2:1",
            "name": "Login",
            "type": "FRAME",
            "children": [
                { "id": "3:1", "name": "Email Input", "type": "INSTANCE", "children": [] },
                { "id": "3:2", "name": "Submit Button", "type": "INSTANCE", "children": [] },
                { "id": "3:3", "name": "hint", "type": "TEXT", "characters": "Email is required" }
            ]
        });
        let spec = extract_frame_spec(&frame);
        assert_eq!(spec["inputs"][0]["name"], "Email Input");
        assert_eq!(spec["buttons"][0]["name"], "Submit Button");
        assert_eq!(spec["components"][0]["hint"], "validation_text");

        let scenarios = suggest_scenarios(&spec);
        assert!(scenarios.contains(&"Email is required".to_string()));
        assert!(scenarios.contains(&"Keyboard navigation works".to_string()));

        let selectors = generate_selectors(&spec);
        assert!(selectors.iter().any(|s| s["strategy"] == "name"));
    }

    #[tokio::test]
    async fn test_configure_failure_clears_nothing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/me");
            then.status(403).json_body(json!({ "err": "Invalid token" }));
        });

        let connector = FigmaConnector::new(None, None, Some(server.base_url()));
        let result = connector
            .call(
                "figma_configure",
                json!({ "auth": { "type": "pat", "token": "bad" } }),
            )
            .await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "AUTH_FAILED");

        let result = connector.call("figma_list_pages", Value::Null).await;
        assert!(result.failed());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload["error"]["code"], "NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn test_batch_export_node_limit() {
        let connector = FigmaConnector::new(
            Some(FigmaConfig {
                token: "pat".to_string(),
                default_file_key: Some("FILE1".to_string()),
            }),
            None,
            None,
        );
        let ids: Vec<String> = (0..=PAYLOAD_LIMIT_NODES).map(|i| format!("n{i}")).collect();
        let result = connector
            .call("figma_export_node_images_batch", json!({ "node_ids": ids }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Too many nodes"));
    }
}
