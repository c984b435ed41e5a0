use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde_json::from_str;
use tokio::fs::read_to_string;
use tracing::{debug, warn};

use crate::{config::EnvConfig, entity_path::node_entity_type, node::NavigationNode};

/// Developer-supplied navigation nodes layered over what the servers
/// return, for testing local micro frontends against a live backend.
#[async_trait]
pub trait LocalOverlay {
    async fn get_local_nodes(&self) -> Vec<NavigationNode>;

    /// Replace server nodes by local nodes declared for one of
    /// `current_entity_paths`.  A local node replaces the server nodes sharing
    /// its entity type and path segment; local nodes without a counterpart
    /// are appended.
    async fn replace_server_nodes_with_local_ones(
        &self,
        server_nodes: Vec<NavigationNode>,
        current_entity_paths: &[String],
    ) -> Vec<NavigationNode> {
        let local_nodes: Vec<NavigationNode> = self
            .get_local_nodes()
            .await
            .into_iter()
            .filter(|local| {
                current_entity_paths
                    .iter()
                    .any(|path| path == node_entity_type(local))
            })
            .collect();

        if local_nodes.is_empty() {
            return server_nodes;
        }

        let mut nodes: Vec<NavigationNode> = server_nodes
            .into_iter()
            .filter(|server| {
                !local_nodes.iter().any(|local| {
                    local.path_segment == server.path_segment
                        && node_entity_type(local) == node_entity_type(server)
                })
            })
            .collect();
        debug!(
            local = local_nodes.len(),
            kept = nodes.len(),
            "overlaying local nodes"
        );
        nodes.extend(local_nodes);
        nodes
    }
}

/// Production setting: server nodes are used as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLocalOverlay;

#[async_trait]
impl LocalOverlay for NoLocalOverlay {
    async fn get_local_nodes(&self) -> Vec<NavigationNode> {
        vec![]
    }

    async fn replace_server_nodes_with_local_ones(
        &self,
        server_nodes: Vec<NavigationNode>,
        _current_entity_paths: &[String],
    ) -> Vec<NavigationNode> {
        server_nodes
    }
}

#[derive(Debug)]
enum LocalNodesOrigin {
    /// Re-read on every call so edits show up without a restart.
    File(PathBuf),
    Fixed(Vec<NavigationNode>),
}

#[derive(Debug)]
pub struct DevModeOverlay {
    origin: LocalNodesOrigin,
}

impl DevModeOverlay {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        DevModeOverlay {
            origin: LocalNodesOrigin::File(path.into()),
        }
    }

    pub fn from_nodes(nodes: Vec<NavigationNode>) -> Self {
        DevModeOverlay {
            origin: LocalNodesOrigin::Fixed(nodes),
        }
    }
}

#[async_trait]
impl LocalOverlay for DevModeOverlay {
    async fn get_local_nodes(&self) -> Vec<NavigationNode> {
        let path = match &self.origin {
            LocalNodesOrigin::Fixed(nodes) => return nodes.clone(),
            LocalNodesOrigin::File(path) => path,
        };

        let raw_str = match read_to_string(path).await {
            Ok(raw_str) => raw_str,
            Err(err) => {
                warn!(path = %path.display(), %err, "unable to read local nodes");
                return vec![];
            }
        };
        match from_str(&raw_str) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(path = %path.display(), %err, "unable to parse local nodes");
                vec![]
            }
        }
    }
}

/// Local nodes are only honoured on development instances; elsewhere a
/// local nodes file is ignored with a warning.
pub fn make_local_overlay(
    env_config: &EnvConfig,
    local_nodes_path: Option<&str>,
) -> Arc<dyn LocalOverlay + Send + Sync> {
    match local_nodes_path {
        Some(path) if env_config.development_instance => Arc::new(DevModeOverlay::from_file(path)),
        Some(path) => {
            warn!(path, "not a development instance, ignoring local nodes");
            Arc::new(NoLocalOverlay)
        }
        None => Arc::new(NoLocalOverlay),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_value, json};

    use super::*;

    fn nodes(value: serde_json::Value) -> Vec<NavigationNode> {
        from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_local_nodes_replace_matching_server_nodes() {
        let overlay = DevModeOverlay::from_nodes(nodes(json!([
            {"pathSegment": "overview", "viewUrl": "http://localhost:4200/overview"},
            {"pathSegment": "new-page", "entityType": "global"},
            {"pathSegment": "settings", "entityType": "project"},
        ])));

        let server = nodes(json!([
            {"pathSegment": "overview", "viewUrl": "https://cdn/overview"},
            {"pathSegment": "catalog", "entityType": "home"},
            {"pathSegment": "settings", "entityType": "project"},
        ]));

        let result = overlay
            .replace_server_nodes_with_local_ones(
                server,
                &["global".to_string(), "home".to_string()],
            )
            .await;

        let summary: Vec<(&str, Option<&str>)> = result
            .iter()
            .map(|n| (n.path_segment.as_str(), n.view_url.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("catalog", None),
                ("settings", None),
                ("overview", Some("http://localhost:4200/overview")),
                ("new-page", None),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreadable_file_means_no_local_nodes() {
        let overlay = DevModeOverlay::from_file("/nonexistent/local-nodes.json");
        assert!(overlay.get_local_nodes().await.is_empty());

        let server = nodes(json!([{"pathSegment": "a"}]));
        let result = overlay
            .replace_server_nodes_with_local_ones(server, &["home".to_string()])
            .await;
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_local_nodes_need_development_instance() {
        let path = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/portal/local-nodes.json"
        );

        let production = EnvConfig::default();
        let overlay = make_local_overlay(&production, Some(path));
        assert!(overlay.get_local_nodes().await.is_empty());

        let development = EnvConfig {
            development_instance: true,
            ..Default::default()
        };
        let overlay = make_local_overlay(&development, Some(path));
        let local: Vec<String> = overlay
            .get_local_nodes()
            .await
            .into_iter()
            .map(|n| n.path_segment)
            .collect();
        assert_eq!(local, vec!["projects"]);

        assert!(make_local_overlay(&development, None)
            .get_local_nodes()
            .await
            .is_empty());
    }
}
