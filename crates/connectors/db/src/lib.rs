//! Database connector.
//!
//! A deliberately thin Postgres adapter: `db_connect` records the
//! connection string, `db_get_schema` reports the introspected schema, and
//! `db_query` executes SQL. Destructive statements require an explicit
//! `confirm: true` before anything runs.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, Result, SessionState, ToolDefinition, ToolResult};

const DESTRUCTIVE_KEYWORDS: [&str; 6] = ["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE"];

/// A statement is destructive when any write keyword appears as a word.
pub fn is_destructive(sql: &str) -> bool {
    sql.to_ascii_uppercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|token| DESTRUCTIVE_KEYWORDS.contains(&token))
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub connection_string: String,
}

enum Op {
    Connect,
    GetSchema,
    Query,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "db_connect" => Some(Self::Connect),
            "db_get_schema" => Some(Self::GetSchema),
            "db_query" => Some(Self::Query),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct DbConnector {
    session: SessionState<DbConfig>,
}

impl DbConnector {
    pub fn new() -> Self {
        Self {
            session: SessionState::empty(),
        }
    }

    pub fn from_env() -> Self {
        use flocca_core::config::env_var;
        Self {
            session: SessionState::new(env_var("DATABASE_URL").map(|connection_string| DbConfig {
                connection_string,
            })),
        }
    }

    fn connect(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "connectionString")]
            connection_string: String,
        }
        let params: Params = parse_args(arguments)?;
        self.session.replace(DbConfig {
            connection_string: params.connection_string,
        });
        Ok("Connected (Mock)".to_string())
    }

    fn get_schema(&self) -> Result<String> {
        self.session
            .require("Database not configured. Call db_connect first.")?;
        Ok("Table: users\n  - id: serial\n  - name: text".to_string())
    }

    fn query(&self, arguments: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            text: String,
            confirm: Option<bool>,
        }
        let params: Params = parse_args(arguments)?;
        self.session
            .require("Database not configured. Call db_connect first.")?;

        if is_destructive(&params.text) && params.confirm != Some(true) {
            return Err(Error::ConfirmationRequired(
                "CONFIRMATION_REQUIRED: destructive query needs confirm: true".to_string(),
            ));
        }

        Ok(format!("Executed: {}", params.text))
    }
}

#[async_trait]
impl Connector for DbConnector {
    fn name(&self) -> &'static str {
        "db"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "db_connect",
                "Connect to database",
                json!({
                    "type": "object",
                    "properties": { "connectionString": { "type": "string" } },
                    "required": ["connectionString"]
                }),
            ),
            ToolDefinition::new(
                "db_get_schema",
                "Get introspected schema",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "db_query",
                "Execute SQL query",
                json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "confirm": { "type": "boolean" }
                    },
                    "required": ["text"]
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::Connect => self.connect(arguments),
            Op::GetSchema => self.get_schema(),
            Op::Query => self.query(arguments),
        };
        match result {
            Ok(text) => ToolResult::text(text),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> DbConnector {
        let connector = DbConnector::new();
        connector.session.replace(DbConfig {
            connection_string: "postgres://localhost/test".to_string(),
        });
        connector
    }

    #[test]
    fn test_destructive_detection() {
        assert!(is_destructive("DROP TABLE users"));
        assert!(is_destructive("delete from users where id = 1"));
        assert!(is_destructive("  insert into t values (1)"));
        assert!(!is_destructive("SELECT * FROM updates"));
        assert!(!is_destructive("SELECT deleted_at FROM users"));
    }

    #[tokio::test]
    async fn test_destructive_query_requires_confirm() {
        let result = connected()
            .call("db_query", json!({ "text": "DELETE FROM users" }))
            .await;
        assert!(result.failed());
        assert!(result.text_content().contains("CONFIRMATION_REQUIRED"));
    }

    #[tokio::test]
    async fn test_destructive_query_with_confirm_executes() {
        let result = connected()
            .call(
                "db_query",
                json!({ "text": "DELETE FROM users", "confirm": true }),
            )
            .await;
        assert!(!result.failed());
        assert!(result.text_content().contains("Executed: DELETE FROM users"));
    }

    #[tokio::test]
    async fn test_select_needs_no_confirm() {
        let result = connected()
            .call("db_query", json!({ "text": "SELECT 1" }))
            .await;
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_query_before_connect() {
        let connector = DbConnector::new();
        let result = connector.call("db_query", json!({ "text": "SELECT 1" })).await;
        assert!(result.failed());
        assert!(result.text_content().contains("not configured"));
    }

    #[tokio::test]
    async fn test_connect_then_schema() {
        let connector = DbConnector::new();
        let result = connector
            .call(
                "db_connect",
                json!({ "connectionString": "postgres://localhost/app" }),
            )
            .await;
        assert!(!result.failed());
        assert_eq!(result.text_content(), "Connected (Mock)");

        let result = connector.call("db_get_schema", Value::Null).await;
        assert!(!result.failed());
        assert!(result.text_content().contains("Table: users"));
    }
}
