//! Connector registry for the `flocca` launcher.
//!
//! One process serves one connector; this module maps the connector name
//! given on the command line to a constructed instance. Construction
//! reads the connector's environment variables; connectors without a
//! runtime `configure` tool (gitlab, stripe) fail fast here instead.

use std::sync::Arc;

use flocca_core::{Connector, Result};

/// Every connector this build can serve.
pub const CONNECTOR_NAMES: [&str; 20] = [
    "azure",
    "azuredevops",
    "bitbucket",
    "confluence",
    "cypress",
    "db",
    "docker",
    "elastic",
    "figma",
    "github",
    "gitlab",
    "jira",
    "kubernetes",
    "notion",
    "observability",
    "playwright",
    "sentry",
    "stripe",
    "testrail",
    "zephyr",
];

/// Build the named connector from the process environment.
pub fn build_connector(name: &str) -> Result<Arc<dyn Connector>> {
    Ok(match name {
        "azure" => Arc::new(flocca_azure::AzureConnector::from_env()),
        "azuredevops" => Arc::new(flocca_azuredevops::AzureDevOpsConnector::from_env()),
        "bitbucket" => Arc::new(flocca_bitbucket::BitbucketConnector::from_env()),
        "confluence" => Arc::new(flocca_confluence::ConfluenceConnector::from_env()),
        "cypress" => Arc::new(flocca_cypress::CypressConnector::from_env()),
        "db" => Arc::new(flocca_db::DbConnector::from_env()),
        "docker" => Arc::new(flocca_docker::DockerConnector::from_env()),
        "elastic" => Arc::new(flocca_elastic::ElasticConnector::from_env()),
        "figma" => Arc::new(flocca_figma::FigmaConnector::from_env()),
        "github" => Arc::new(flocca_github::GitHubConnector::from_env()),
        "gitlab" => Arc::new(flocca_gitlab::GitLabConnector::from_env()?),
        "jira" => Arc::new(flocca_jira::JiraConnector::from_env()),
        "kubernetes" => Arc::new(flocca_kubernetes::KubernetesConnector::from_env()),
        "notion" => Arc::new(flocca_notion::NotionConnector::from_env()),
        "observability" => Arc::new(flocca_observability::ObservabilityConnector::from_env()),
        "playwright" => Arc::new(flocca_playwright::PlaywrightConnector::from_env()),
        "sentry" => Arc::new(flocca_sentry::SentryConnector::from_env()),
        "stripe" => Arc::new(flocca_stripe::StripeConnector::from_env()?),
        "testrail" => Arc::new(flocca_testrail::TestRailConnector::from_env()),
        "zephyr" => Arc::new(flocca_zephyr::ZephyrConnector::from_env()),
        other => {
            return Err(flocca_core::Error::Config(format!(
                "Unknown connector: {other}. Run `flocca list` for the roster."
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_is_sorted_and_unique() {
        let mut sorted = CONNECTOR_NAMES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), CONNECTOR_NAMES.len());
        assert_eq!(sorted, CONNECTOR_NAMES.to_vec());
    }

    #[test]
    fn test_unknown_connector_rejected() {
        let err = build_connector("laserdisc").err().expect("expected an error");
        assert!(err.to_string().contains("Unknown connector"));
    }
}
