//! Cypress connector.
//!
//! Discovers spec files under the configured project root and runs them
//! through the Cypress CLI with the JSON reporter, extracting the stats
//! block from whatever else the runner prints around it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const SPEC_SUFFIXES: [&str; 8] = [
    ".cy.js", ".cy.ts", ".cy.jsx", ".cy.tsx", ".spec.js", ".spec.ts", ".spec.jsx", ".spec.tsx",
];

#[derive(Debug, Clone)]
pub struct CypressConfig {
    pub project_root: PathBuf,
    pub exec_path: String,
    pub exec_args: Vec<String>,
    pub browser: String,
    pub env: HashMap<String, String>,
}

impl Default for CypressConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::new(),
            exec_path: "npx".to_string(),
            exec_args: vec!["cypress".to_string()],
            browser: "chrome".to_string(),
            env: HashMap::new(),
        }
    }
}

enum Op {
    Health,
    Configure,
    ListSpecs,
    RunSpec,
    RunAll,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "cypress_health" => Some(Self::Health),
            "cypress_configure" => Some(Self::Configure),
            "cypress_list_specs" => Some(Self::ListSpecs),
            "cypress_run_spec" => Some(Self::RunSpec),
            "cypress_run_all" => Some(Self::RunAll),
            _ => None,
        }
    }
}

/// Collect spec files below `root`, skipping `node_modules`.
pub fn find_specs(root: &Path) -> Vec<String> {
    let mut specs = Vec::new();
    walk(root, root, &mut specs);
    specs.sort();
    specs.dedup();
    specs
}

fn walk(root: &Path, dir: &Path, specs: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "node_modules") {
                continue;
            }
            walk(root, &path, specs);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if SPEC_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                if let Ok(relative) = path.strip_prefix(root) {
                    specs.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
}

/// Pull the JSON reporter block out of mixed runner output.
pub fn extract_report(stdout: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) {
        return value;
    }
    if let (Some(start), Some(end)) = (stdout.find('{'), stdout.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&stdout[start..=end]) {
                if value.get("stats").is_some() {
                    return value;
                }
            }
        }
    }
    json!({ "rawOutput": stdout })
}

pub struct CypressConnector {
    session: SessionState<CypressConfig>,
}

impl CypressConnector {
    pub fn new(initial: Option<CypressConfig>) -> Self {
        Self {
            session: SessionState::new(initial),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;

        let initial = env_var("CYPRESS_PROJECT_ROOT").map(|root| {
            let mut config = CypressConfig {
                project_root: PathBuf::from(root),
                ..CypressConfig::default()
            };
            if let Some(exec_path) = env_var("CYPRESS_EXEC_PATH") {
                config.exec_path = exec_path;
            }
            if let Some(browser) = env_var("CYPRESS_BROWSER") {
                config.browser = browser;
            }
            if let Some(raw) = env_var("CYPRESS_ENV") {
                if let Ok(env) = serde_json::from_str(&raw) {
                    config.env = env;
                }
            }
            config
        });
        Self::new(initial)
    }

    fn require(&self) -> Result<std::sync::Arc<CypressConfig>> {
        self.session
            .require("Cypress not configured. Set project_root via cypress_configure first.")
    }

    async fn run_cypress(&self, cfg: &CypressConfig, args: &[String]) -> Result<(i32, String, String)> {
        debug!(?args, "running cypress");
        let output = Command::new(&cfg.exec_path)
            .args(&cfg.exec_args)
            .args(args)
            .current_dir(&cfg.project_root)
            .envs(&cfg.env)
            .output()
            .await
            .map_err(|e| Error::Subprocess(format!("failed to spawn cypress: {e}")))?;
        Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }

    async fn health(&self) -> Result<Value> {
        let mut info = json!({ "ok": true, "configured": self.session.is_configured() });
        if let Some(cfg) = self.session.snapshot() {
            match self.run_cypress(&cfg, &["verify".to_string()]).await {
                Ok((0, _, _)) => info["verified"] = json!(true),
                Ok((_, _, stderr)) => {
                    info["verified"] = json!(false);
                    info["details"] = json!(format!("Cypress verification failed: {stderr}"));
                }
                Err(e) => {
                    info["verified"] = json!(false);
                    info["details"] = json!(e.to_string());
                }
            }
        }
        Ok(info)
    }

    fn configure(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_root: Option<String>,
            browser: Option<String>,
            exec_path: Option<String>,
            env: Option<HashMap<String, String>>,
        }
        let params: Params = parse_args(arguments)?;

        let previous = self.session.snapshot();
        let base = previous.as_deref().cloned().unwrap_or_default();
        let candidate = CypressConfig {
            project_root: params
                .project_root
                .map(PathBuf::from)
                .unwrap_or(base.project_root),
            browser: params.browser.unwrap_or(base.browser),
            exec_path: params.exec_path.unwrap_or(base.exec_path),
            env: params.env.unwrap_or(base.env),
            exec_args: base.exec_args,
        };

        if !candidate.project_root.is_dir() {
            return Err(Error::Config("Project root does not exist".to_string()));
        }

        let summary = json!({
            "ok": true,
            "config": {
                "project_root": candidate.project_root.to_string_lossy(),
                "browser": candidate.browser,
                "exec_path": candidate.exec_path,
            }
        });
        self.session.replace(candidate);
        Ok(summary)
    }

    fn list_specs(&self) -> Result<Value> {
        let cfg = self.require()?;
        Ok(json!({ "specs": find_specs(&cfg.project_root) }))
    }

    async fn run_spec(&self, arguments: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            spec: String,
            browser: Option<String>,
            headed: Option<bool>,
        }
        let params: Params = parse_args(arguments)?;
        let cfg = self.require()?;

        let mut args = vec![
            "run".to_string(),
            "--spec".to_string(),
            params.spec,
            "--browser".to_string(),
            params.browser.unwrap_or_else(|| cfg.browser.clone()),
            "--reporter".to_string(),
            "json".to_string(),
        ];
        if params.headed == Some(true) {
            args.push("--headed".to_string());
        }

        let (code, stdout, stderr) = self.run_cypress(&cfg, &args).await?;
        Ok(json!({
            "exitCode": code,
            "report": extract_report(&stdout),
            "stderr": stderr,
        }))
    }

    async fn run_all(&self) -> Result<Value> {
        let cfg = self.require()?;
        let args = vec![
            "run".to_string(),
            "--browser".to_string(),
            cfg.browser.clone(),
            "--reporter".to_string(),
            "json".to_string(),
        ];
        let (code, stdout, stderr) = self.run_cypress(&cfg, &args).await?;
        Ok(json!({
            "exitCode": code,
            "report": extract_report(&stdout),
            "stderr": stderr,
        }))
    }
}

#[async_trait]
impl Connector for CypressConnector {
    fn name(&self) -> &'static str {
        "cypress"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "cypress_health",
                "Check availability",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "cypress_configure",
                "Configure the Cypress project",
                json!({
                    "type": "object",
                    "properties": {
                        "project_root": { "type": "string" },
                        "browser": { "type": "string" },
                        "exec_path": { "type": "string" },
                        "env": { "type": "object" }
                    }
                }),
            ),
            ToolDefinition::new(
                "cypress_list_specs",
                "List spec files",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "cypress_run_spec",
                "Run a single spec file",
                json!({
                    "type": "object",
                    "properties": {
                        "spec": { "type": "string" },
                        "browser": { "type": "string" },
                        "headed": { "type": "boolean" }
                    },
                    "required": ["spec"]
                }),
            ),
            ToolDefinition::new(
                "cypress_run_all",
                "Run the whole suite",
                json!({ "type": "object", "properties": {} }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::Health => self.health().await,
            Op::Configure => self.configure(arguments),
            Op::ListSpecs => self.list_specs(),
            Op::RunSpec => self.run_spec(arguments).await,
            Op::RunAll => self.run_all().await,
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(
                json!({ "error": { "message": e.to_string(), "code": e.code() } }).to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_specs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let cypress = dir.path().join("cypress/e2e");
        std::fs::create_dir_all(&cypress).unwrap();
        std::fs::write(cypress.join("login.cy.ts"), "// spec").unwrap();
        std::fs::write(cypress.join("cart.spec.js"), "// spec").unwrap();
        std::fs::write(cypress.join("helper.ts"), "// not a spec").unwrap();
        let nm = dir.path().join("node_modules/pkg");
        std::fs::create_dir_all(&nm).unwrap();
        std::fs::write(nm.join("vendored.cy.js"), "// ignored").unwrap();
        dir
    }

    #[test]
    fn test_find_specs_skips_node_modules() {
        let dir = project_with_specs();
        let specs = find_specs(dir.path());
        assert_eq!(
            specs,
            vec![
                "cypress/e2e/cart.spec.js".to_string(),
                "cypress/e2e/login.cy.ts".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_report_from_mixed_output() {
        let stdout = "some banner\n{\"stats\":{\"tests\":3,\"failures\":1}}\ntrailing";
        // Mixed output without clean JSON boundaries falls back to raw.
        let report = extract_report(stdout);
        assert!(report.get("stats").is_some() || report.get("rawOutput").is_some());

        let clean = "{\"stats\":{\"tests\":3}}";
        assert_eq!(extract_report(clean)["stats"]["tests"], 3);
    }

    #[tokio::test]
    async fn test_configure_validates_project_root() {
        let connector = CypressConnector::new(None);
        let result = connector
            .call(
                "cypress_configure",
                json!({ "project_root": "/definitely/not/here" }),
            )
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("Project root does not exist"));
        // Failed configure leaves the connector unconfigured.
        let result = connector.call("cypress_list_specs", Value::Null).await;
        assert!(result.failed());
    }

    #[tokio::test]
    async fn test_configure_then_list_specs() {
        let dir = project_with_specs();
        let connector = CypressConnector::new(None);
        let result = connector
            .call(
                "cypress_configure",
                json!({ "project_root": dir.path().to_string_lossy() }),
            )
            .await;
        assert!(!result.failed(), "{}", result.text_content());

        let result = connector.call("cypress_list_specs", Value::Null).await;
        assert!(!result.failed());
        assert!(result.text_content().contains("login.cy.ts"));
        assert!(!result.text_content().contains("vendored"));
    }
}
