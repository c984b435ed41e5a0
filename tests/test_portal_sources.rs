use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{from_value, json, Value};
use tracing::instrument::WithSubscriber;

use portal_nav::{
    assemble,
    config::{load, EnvConfig, PortalConfig},
    config_source::{
        make_local_source, ConfigSource, EntityConfig, ErrorDetails, ErrorLayer, Result,
        ServerError, ServiceProvider,
    },
    entity_path::FetchParams,
    local_overlay::{DevModeOverlay, NoLocalOverlay},
    logging::LogCapture,
    ChildrenByEntityAggregator, Context, NavigationNode, NavigationTreeBuilder,
};

fn fixture_root() -> String {
    format!("{}/tests/fixtures/portal", env!("CARGO_MANIFEST_DIR"))
}

fn segments(nodes: &[NavigationNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.path_segment.as_str()).collect()
}

/// Tenant-level providers only; entity lookups are never expected here.
struct TenantSource {
    providers: Option<Value>,
}

#[async_trait]
impl ConfigSource for TenantSource {
    async fn get_raw_configs_for_tenant(&self) -> Result<Vec<ServiceProvider>> {
        match &self.providers {
            Some(providers) => Ok(from_value(providers.clone())?),
            None => Err(ServerError::TransientProblem(ErrorDetails {
                layer: ErrorLayer::ServerLayer,
                message: "connection refused".to_string(),
                status: None,
            })),
        }
    }

    async fn get_raw_configs_for_entity(
        &self,
        _entity_type: &str,
        _context: &FetchParams,
    ) -> Result<Vec<ServiceProvider>> {
        Err(ServerError::Unsupported)
    }

    async fn get_entity_config(
        &self,
        _entity_type: &str,
        _context: &FetchParams,
    ) -> Result<EntityConfig> {
        Err(ServerError::Unsupported)
    }
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn test_aggregator_buckets_and_badges() {
    let source = Arc::new(TenantSource {
        providers: Some(json!([
            {
                "creationTimestamp": "2024-05-01T11:00:00Z",
                "config": {"helpContext": {"displayName": "Catalog"}, "region": "us"},
                "installationData": {"region": "eu"},
                "nodes": [
                    {"pathSegment": "catalog"},
                    {"pathSegment": "members", "entityType": "project"},
                ],
            },
            {
                "creationTimestamp": "2024-05-01T11:00:00Z",
                "isMandatoryExtension": true,
                "nodes": [{"pathSegment": "settings", "entityType": "global"}],
            },
            {
                "creationTimestamp": "2024-04-01T00:00:00Z",
                "nodes": [{"pathSegment": "old", "entityType": ""}],
            },
        ])),
    });
    let aggregator = ChildrenByEntityAggregator::new(source, Arc::new(NoLocalOverlay));

    let children_by_entity = aggregator.retrieve_children_by_entity_at(now()).await.unwrap();

    assert_eq!(
        children_by_entity.keys().collect::<Vec<_>>(),
        vec!["global", "home", "project"]
    );
    assert_eq!(segments(&children_by_entity["home"]), vec!["catalog", "old"]);

    let catalog = &children_by_entity["home"][0];
    assert_eq!(
        catalog.context["serviceProviderConfig"],
        json!({"helpContext": {"displayName": "Catalog"}, "region": "eu"})
    );
    let badge = catalog.status_badge.as_ref().unwrap();
    assert_eq!((badge.label.as_str(), badge.badge_type.as_str()), ("New", "informative"));

    assert!(children_by_entity["global"][0].status_badge.is_none());
    assert!(children_by_entity["home"][1].status_badge.is_none());
}

#[tokio::test]
async fn test_aggregator_applies_local_overlay() {
    let source = Arc::new(TenantSource {
        providers: Some(json!([{
            "nodes": [
                {"pathSegment": "catalog", "viewUrl": "https://cdn.example/catalog"},
                {"pathSegment": "settings", "entityType": "global"},
            ],
        }])),
    });
    let overlay = DevModeOverlay::from_nodes(
        from_value(json!([
            {"pathSegment": "catalog", "viewUrl": "http://localhost:4200/catalog"},
            {"pathSegment": "members", "entityType": "project"},
        ]))
        .unwrap(),
    );
    let aggregator = ChildrenByEntityAggregator::new(source, Arc::new(overlay));

    let children_by_entity = aggregator.retrieve_children_by_entity_at(now()).await.unwrap();

    assert_eq!(
        children_by_entity["home"][0].view_url.as_deref(),
        Some("http://localhost:4200/catalog")
    );
    // Only tenant-level entity paths are overlaid at this stage.
    assert!(!children_by_entity.contains_key("project"));
}

#[tokio::test]
async fn test_aggregator_tenant_failure_is_fatal() {
    let source = Arc::new(TenantSource { providers: None });
    let aggregator = ChildrenByEntityAggregator::new(source, Arc::new(NoLocalOverlay));
    let capture = LogCapture::new();

    let result = aggregator
        .retrieve_children_by_entity_at(now())
        .with_subscriber(capture.subscriber())
        .await;

    assert!(matches!(result, Err(ServerError::TransientProblem(_))));
    assert_eq!(
        capture.messages_at("ERROR"),
        vec!["could not retrieve tenant navigation nodes".to_string()]
    );
}

async fn fixture_navigation() -> portal_nav::NavigationConfig {
    let root = fixture_root();
    let source: Arc<dyn ConfigSource + Send + Sync> = Arc::from(make_local_source(&root).unwrap());
    let portal_config: PortalConfig = load(&format!("{}/portal-config.json", root)).unwrap();

    let builder = NavigationTreeBuilder::new(source.clone(), portal_config, EnvConfig::default());
    let children_by_entity = ChildrenByEntityAggregator::new(source, Arc::new(NoLocalOverlay))
        .retrieve_children_by_entity()
        .await
        .unwrap();
    assemble(&builder, children_by_entity)
}

fn user_ctx() -> Context {
    from_value(json!({"tenantid": "t1", "userid": "u1"})).unwrap()
}

#[tokio::test]
async fn test_assembled_navigation_from_fixtures() {
    let navigation = fixture_navigation().await;

    assert_eq!(segments(&navigation.nodes), vec!["home", "settings"]);
    assert_eq!(navigation.global_context["tenantid"], "t1");
    assert!(navigation.breadcrumbs);

    let home = navigation.resolve_route("/home", user_ctx()).await.unwrap();
    assert_eq!(segments(&home.children), vec!["projects"]);
}

#[tokio::test]
async fn test_route_into_fixture_entity() {
    let navigation = fixture_navigation().await;

    let resolved = navigation
        .resolve_route("/home/projects/p1", user_ctx())
        .await
        .unwrap();

    assert_eq!(resolved.node.path_segment, ":projectId");
    assert_eq!(resolved.ctx["projectId"], "p1");
    insta::assert_json_snapshot!(segments(&resolved.children), @r###"
    [
      "overview",
      "dashboard"
    ]
    "###);

    let dashboard = &resolved.children[1];
    assert_eq!(
        dashboard.context["entityContext"]["project"]["name"],
        "Fixture Project"
    );
    assert_eq!(
        dashboard.context["helpContext"],
        json!({"displayName": "Dashboard"})
    );
}

#[tokio::test]
async fn test_route_into_missing_fixture_entity() {
    let navigation = fixture_navigation().await;

    let resolved = navigation
        .resolve_route("/home/projects/p9", user_ctx())
        .await
        .unwrap();

    assert_eq!(segments(&resolved.children), vec!["error", ":notfound"]);
    assert_eq!(
        resolved.children[0].context["error"]["additionalContext"],
        json!({"project": "p9", "tenant": "t1", "user": "u1"})
    );
}

#[tokio::test]
async fn test_unknown_route() {
    let navigation = fixture_navigation().await;
    assert!(navigation
        .resolve_route("/nowhere", user_ctx())
        .await
        .is_none());
}

#[test]
fn test_missing_fixture_directory() {
    let err = make_local_source("/nonexistent/portal").err().unwrap();
    assert!(matches!(
        err,
        ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::BadInput,
            ..
        })
    ));
}
