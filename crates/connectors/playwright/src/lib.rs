//! Playwright connector.
//!
//! The smallest connector in the collection: one tool that shells out to
//! `npx playwright test` and relays the combined output. Test failures are
//! part of the report, not a tool error.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use flocca_core::{normalize_tool_name, Connector, ToolDefinition, ToolResult};

pub struct PlaywrightConnector;

impl PlaywrightConnector {
    pub fn new() -> Self {
        Self
    }

    pub fn from_env() -> Self {
        Self
    }

    async fn run_all(&self) -> ToolResult {
        debug!("running playwright test suite");
        let output = Command::new("npx").args(["playwright", "test"]).output().await;

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut text = format!("{stdout}\n{stderr}");
                if !output.status.success() && output.status.code() == Some(127) {
                    text = format!(
                        "Playwright or npx not found. Please install Node.js and run `npx playwright install`.\n{text}"
                    );
                }
                ToolResult::text(text)
            }
            Err(e) => ToolResult::text(format!(
                "Playwright or npx not found. Please install Node.js and run `npx playwright install`.\n{e}"
            )),
        }
    }
}

impl Default for PlaywrightConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for PlaywrightConnector {
    fn name(&self) -> &'static str {
        "playwright"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition::new(
            "playwright_run_all",
            "Run all Playwright tests",
            json!({ "type": "object", "properties": {} }),
        )]
    }

    async fn call(&self, name: &str, _arguments: Value) -> ToolResult {
        match normalize_tool_name(name).as_str() {
            "playwright_run_all" => self.run_all().await,
            _ => ToolResult::error(format!("Unknown tool: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tool_declared() {
        let tools = PlaywrightConnector::new().tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "playwright_run_all");
    }

    #[tokio::test]
    async fn test_dotted_alias_resolves() {
        // Only checks dispatch, not the subprocess: an unknown name must
        // not be confused with the aliased real one.
        let connector = PlaywrightConnector::new();
        let result = connector.call("playwright.runMissing", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().starts_with("Unknown tool:"));
    }
}
