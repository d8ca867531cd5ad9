//! Roster-wide lint over declared tools.
//!
//! Host tooling rejects tool names outside `[a-z0-9_-]`, so every
//! connector's declared names are checked here in one place.

use std::sync::Arc;

use flocca_core::{Connector, ProxySettings};

fn all_connectors() -> Vec<Arc<dyn Connector>> {
    let proxy: Option<ProxySettings> = None;
    vec![
        Arc::new(flocca_azure::AzureConnector::new(None, None, None)),
        Arc::new(flocca_azuredevops::AzureDevOpsConnector::new(None)),
        Arc::new(flocca_bitbucket::BitbucketConnector::new(None, proxy.clone())),
        Arc::new(flocca_confluence::ConfluenceConnector::new(None, proxy.clone())),
        Arc::new(flocca_cypress::CypressConnector::new(None)),
        Arc::new(flocca_db::DbConnector::new()),
        Arc::new(flocca_docker::DockerConnector::new(
            flocca_docker::DaemonConfig::default(),
        )),
        Arc::new(flocca_elastic::ElasticConnector::new(None)),
        Arc::new(flocca_figma::FigmaConnector::new(None, proxy.clone(), None)),
        Arc::new(flocca_github::GitHubConnector::new(None, proxy.clone(), None)),
        Arc::new(flocca_gitlab::GitLabConnector::new(
            "https://gitlab.com/api/v4",
            "test-token",
        )),
        Arc::new(flocca_jira::JiraConnector::new(None, proxy.clone())),
        Arc::new(flocca_kubernetes::KubernetesConnector::new(None)),
        Arc::new(flocca_notion::NotionConnector::new(None, proxy.clone(), None)),
        Arc::new(flocca_observability::ObservabilityConnector::new(None)),
        Arc::new(flocca_playwright::PlaywrightConnector::new()),
        Arc::new(flocca_sentry::SentryConnector::new(None, proxy)),
        Arc::new(flocca_stripe::StripeConnector::new(
            "https://api.stripe.com",
            "sk_test",
        )),
        Arc::new(flocca_testrail::TestRailConnector::new(None)),
        Arc::new(flocca_zephyr::ZephyrConnector::new(None)),
    ]
}

fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[test]
fn test_every_declared_tool_name_matches_character_class() {
    for connector in all_connectors() {
        for tool in connector.tools() {
            assert!(
                is_valid_tool_name(&tool.name),
                "{}: invalid tool name {:?}",
                connector.name(),
                tool.name
            );
        }
    }
}

#[test]
fn test_every_connector_declares_tools_with_schemas() {
    for connector in all_connectors() {
        let tools = connector.tools();
        assert!(!tools.is_empty(), "{} declares no tools", connector.name());
        for tool in tools {
            assert!(
                !tool.description.is_empty(),
                "{}: {} has no description",
                connector.name(),
                tool.name
            );
            assert!(
                tool.input_schema.is_object(),
                "{}: {} schema is not an object",
                connector.name(),
                tool.name
            );
            assert_eq!(tool.input_schema["type"], "object");
        }
    }
}

#[test]
fn test_no_duplicate_tool_names_within_a_connector() {
    for connector in all_connectors() {
        let mut names: Vec<String> = connector.tools().into_iter().map(|t| t.name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(total, names.len(), "{} has duplicate tools", connector.name());
    }
}

#[test]
fn test_connector_specific_operations_present() {
    // Spot checks pinning each connector's signature operation.
    let connectors = all_connectors();
    let find = |name: &str| {
        connectors
            .iter()
            .find(|c| c.name() == name)
            .unwrap_or_else(|| panic!("{name} missing from roster"))
    };
    let has_tool = |connector: &Arc<dyn Connector>, tool: &str| {
        connector.tools().iter().any(|t| t.name == tool)
    };

    assert!(has_tool(find("db"), "db_query"));
    assert!(has_tool(find("confluence"), "confluence_list_spaces"));
    assert!(has_tool(find("azuredevops"), "azuredevops_list_work_items"));
    assert!(has_tool(find("docker"), "docker_run_container"));
    assert!(has_tool(find("figma"), "figma_get_frame_spec"));
    assert!(has_tool(find("observability"), "observability_query_range"));
    assert!(has_tool(find("github"), "search_repositories"));

    // The deployment-mode-driven connectors both expose configure.
    assert!(has_tool(find("jira"), "jira_configure"));
    assert!(has_tool(find("confluence"), "confluence_configure"));
}
