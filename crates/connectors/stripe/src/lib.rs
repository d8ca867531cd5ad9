//! Stripe connector.
//!
//! Read-only payment tools. Like the GitLab connector there is no
//! `configure` tool: a secret key or proxy mode must be present at
//! startup.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use flocca_core::config::{env_var, normalize_base_url};
use flocca_core::tool::parse_args;
use flocca_core::{Connector, Error, ProxySettings, Result, ToolDefinition, ToolResult};

const API_BASE: &str = "https://api.stripe.com";

enum Auth {
    SecretKey(String),
    Proxy(ProxySettings),
}

enum Op {
    GetBalance,
    ListCustomers,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match flocca_core::normalize_tool_name(name).as_str() {
            "get_balance" => Some(Self::GetBalance),
            "list_customers" => Some(Self::ListCustomers),
            _ => None,
        }
    }
}

pub struct StripeConnector {
    base_url: String,
    auth: Auth,
    client: reqwest::Client,
}

impl StripeConnector {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            auth: Auth::SecretKey(secret_key.into()),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_proxy(proxy: ProxySettings) -> Self {
        Self {
            base_url: proxy.url.clone(),
            auth: Auth::Proxy(proxy),
            client: reqwest::Client::new(),
        }
    }

    /// Fail fast at startup when neither a key nor proxy mode exists.
    pub fn from_env() -> Result<Self> {
        if let Some(proxy) = ProxySettings::from_env() {
            return Ok(Self::with_proxy(proxy));
        }
        let key = env_var("STRIPE_SECRET_KEY").ok_or_else(|| {
            Error::Config(
                "Stripe not configured. Set STRIPE_SECRET_KEY or Connect via Flocca Vault."
                    .to_string(),
            )
        })?;
        Ok(Self::new(API_BASE, key))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "stripe request");

        let mut builder = self
            .client
            .get(&url)
            .header("Content-Type", "application/x-www-form-urlencoded");
        builder = match &self.auth {
            Auth::SecretKey(key) => builder.header("Authorization", format!("Bearer {key}")),
            Auth::Proxy(proxy) => builder.header(ProxySettings::USER_HEADER, &proxy.user_id),
        };
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
            let message = data["error"]["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("Stripe request failed ({status})"));
            return Err(Error::from_status(status, message));
        }
        Ok(data)
    }
}

#[async_trait]
impl Connector for StripeConnector {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "get_balance",
                "Retrieve current Stripe balance.",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::new(
                "list_customers",
                "List recent customers.",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "number", "description": "Number of customers to return (default 10)" }
                    }
                }),
            ),
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(op) = Op::from_name(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        let result = match op {
            Op::GetBalance => self.get("/v1/balance", &[]).await,
            Op::ListCustomers => {
                #[derive(Deserialize, Default)]
                struct Params {
                    limit: Option<u32>,
                }
                match parse_args::<Params>(arguments) {
                    Ok(params) => self
                        .get(
                            "/v1/customers",
                            &[("limit", params.limit.unwrap_or(10).to_string())],
                        )
                        .await
                        .map(|data| data["data"].clone()),
                    Err(e) => Err(e),
                }
            }
        };
        match result {
            Ok(value) => ToolResult::json(&value),
            Err(e) => ToolResult::error(format!("Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_get_balance() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/balance")
                .header("Authorization", "Bearer sk_test");
            then.status(200).json_body(json!({
                "available": [{ "amount": 12345, "currency": "usd" }]
            }));
        });

        let connector = StripeConnector::new(server.base_url(), "sk_test");
        let result = connector.call("get_balance", Value::Null).await;
        assert!(!result.failed(), "{}", result.text_content());
        assert!(result.text_content().contains("12345"));
    }

    #[tokio::test]
    async fn test_list_customers_unwraps_data() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v1/customers")
                .query_param("limit", "5");
            then.status(200).json_body(json!({
                "object": "list",
                "data": [{ "id": "cus_1", "email": "a@example.com" }]
            }));
        });

        let connector = StripeConnector::new(server.base_url(), "sk_test");
        let result = connector
            .call("list_customers", json!({ "limit": 5 }))
            .await;
        assert!(!result.failed(), "{}", result.text_content());
        let payload: Value = serde_json::from_str(result.text_content()).unwrap();
        assert_eq!(payload[0]["id"], "cus_1");
    }

    #[tokio::test]
    async fn test_stripe_error_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v1/balance");
            then.status(401).json_body(json!({
                "error": { "message": "Invalid API Key provided" }
            }));
        });

        let connector = StripeConnector::new(server.base_url(), "sk_bad");
        let result = connector.call("get_balance", Value::Null).await;
        assert!(result.failed());
        assert!(result.text_content().contains("Invalid API Key"));
    }
}
