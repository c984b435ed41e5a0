use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::{error, trace_span, Instrument};

use crate::{
    config_source::{ConfigSource, Result, ServiceProvider},
    entity_path::node_entity_type,
    local_overlay::LocalOverlay,
    node::{NavigationNode, StatusBadge},
};

/// Navigation nodes bucketed by (dotted) entity path.  Shared read-only
/// between resolvers; reconciliation always builds a new map.
pub type ChildrenByEntity = BTreeMap<String, Vec<NavigationNode>>;

/// Entity paths whose nodes come from the tenant-level fetch.
pub const TENANT_ENTITY_PATHS: [&str; 2] = ["global", "home"];

fn is_new_provider(provider: &ServiceProvider, now: DateTime<Utc>) -> bool {
    if provider.is_mandatory_extension {
        return false;
    }
    let created = match provider
        .creation_timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        Some(created) => created.with_timezone(&Utc),
        None => return false,
    };
    now.signed_duration_since(created) < Duration::hours(24)
}

/// `config` with `installationData` on top.
fn service_provider_config(provider: &ServiceProvider) -> Value {
    let mut config: Map<String, Value> = provider.config.clone();
    for (key, value) in &provider.installation_data {
        config.insert(key.clone(), value.clone());
    }
    Value::Object(config)
}

/// Flatten the providers' nodes, giving every node its provider's config and,
/// for recently registered optional providers, a "New" badge.
pub fn provider_nodes(providers: Vec<ServiceProvider>, now: DateTime<Utc>) -> Vec<NavigationNode> {
    providers
        .into_iter()
        .flat_map(|provider| {
            let config = service_provider_config(&provider);
            let is_new = is_new_provider(&provider, now);
            provider.nodes.into_iter().map(move |mut node| {
                node.context
                    .insert("serviceProviderConfig".to_string(), config.clone());
                if is_new {
                    node.status_badge = Some(StatusBadge {
                        label: "New".to_string(),
                        badge_type: "informative".to_string(),
                    });
                }
                node
            })
        })
        .collect()
}

/// Bucket by entity type; nodes without one land in `home`.  Declaration
/// order is kept within each bucket.
pub fn bucket_by_entity_type(nodes: Vec<NavigationNode>) -> ChildrenByEntity {
    nodes
        .into_iter()
        .map(|node| (node_entity_type(&node).to_string(), node))
        .into_group_map()
        .into_iter()
        .collect()
}

/// Performs the initial fetch of everything registered for the tenant.
pub struct ChildrenByEntityAggregator {
    config_source: Arc<dyn ConfigSource + Send + Sync>,
    local_overlay: Arc<dyn LocalOverlay + Send + Sync>,
}

impl ChildrenByEntityAggregator {
    pub fn new(
        config_source: Arc<dyn ConfigSource + Send + Sync>,
        local_overlay: Arc<dyn LocalOverlay + Send + Sync>,
    ) -> Self {
        ChildrenByEntityAggregator {
            config_source,
            local_overlay,
        }
    }

    pub async fn retrieve_children_by_entity(&self) -> Result<ChildrenByEntity> {
        self.retrieve_children_by_entity_at(Utc::now()).await
    }

    /// Failing to get the tenant's providers is fatal; there is no sensible
    /// partial navigation at this level.
    pub async fn retrieve_children_by_entity_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ChildrenByEntity> {
        let span = trace_span!("retrieve_children_by_entity");
        async {
            let providers = match self.config_source.get_raw_configs_for_tenant().await {
                Ok(providers) => providers,
                Err(err) => {
                    error!(%err, "could not retrieve tenant navigation nodes");
                    return Err(err);
                }
            };

            let nodes = provider_nodes(providers, now);
            let entity_paths: Vec<String> =
                TENANT_ENTITY_PATHS.iter().map(|p| p.to_string()).collect();
            let nodes = self
                .local_overlay
                .replace_server_nodes_with_local_ones(nodes, &entity_paths)
                .await;

            Ok(bucket_by_entity_type(nodes))
        }
        .instrument(span)
        .await
    }
}

#[test]
fn test_bucket_defaults_to_home() {
    let nodes: Vec<NavigationNode> = serde_json::from_value(serde_json::json!([
        {"pathSegment": "a"},
        {"pathSegment": "b", "entityType": ""},
        {"pathSegment": "c", "entityType": "global"},
        {"pathSegment": "d", "entityType": "home"},
    ]))
    .unwrap();

    let buckets = bucket_by_entity_type(nodes);
    let home: Vec<&str> = buckets["home"]
        .iter()
        .map(|n| n.path_segment.as_str())
        .collect();
    assert_eq!(home, vec!["a", "b", "d"]);
    assert_eq!(buckets["global"].len(), 1);
}
