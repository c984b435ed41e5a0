use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{
    aggregator::ChildrenByEntity,
    node::{Context, NavigationNode, NodeChildren},
    node_sort::sort_nodes,
    tree_builder::NavigationTreeBuilder,
};

pub const HOME_PATH_SEGMENT: &str = "home";
pub const GLOBAL_ENTITY_TYPE: &str = "global";

/// What the host runtime gets handed as its navigation configuration.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationConfig {
    pub nodes: Vec<NavigationNode>,
    pub global_context: Map<String, Value>,
    pub view_group_settings: Map<String, Value>,
    pub breadcrumbs: bool,
}

/// A route resolved down to its last node.
#[derive(Clone, Debug)]
pub struct ResolvedRoute {
    pub node: NavigationNode,
    /// The resolved children of `node`.
    pub children: Vec<NavigationNode>,
    /// Context after dynamic segments were bound.
    pub ctx: Context,
}

/// Wrap the tenant's nodes into the navigation configuration: a `home` root
/// holding the `home` bucket, followed by the `global` nodes.  Both levels
/// are sorted once here; filtering keeps that order per navigation.
pub fn assemble(
    builder: &NavigationTreeBuilder,
    children_by_entity: ChildrenByEntity,
) -> NavigationConfig {
    let children_by_entity = Arc::new(children_by_entity);

    let mut home = NavigationNode {
        path_segment: HOME_PATH_SEGMENT.to_string(),
        children: Some(NodeChildren::Static(sort_nodes(
            children_by_entity
                .get(HOME_PATH_SEGMENT)
                .cloned()
                .unwrap_or_default(),
        ))),
        ..Default::default()
    };
    builder.apply_entity_children_recursively(&mut home, &children_by_entity, "", &[]);

    let mut nodes = vec![home];
    for mut node in sort_nodes(
        children_by_entity
            .get(GLOBAL_ENTITY_TYPE)
            .cloned()
            .unwrap_or_default(),
    ) {
        builder.apply_entity_children_recursively(&mut node, &children_by_entity, "", &[]);
        nodes.push(node);
    }

    NavigationConfig {
        nodes,
        global_context: builder.portal_config().global_context.clone(),
        view_group_settings: builder.env_config().view_groups.clone(),
        breadcrumbs: builder.portal_config().breadcrumbs_enabled,
    }
}

impl NavigationConfig {
    /// Walk `path` ("/home/projects/p1") segment by segment the way the host
    /// router does.  Exact segments win over `:param` segments; a `:param`
    /// match binds the segment value into the context under `param`.
    pub async fn resolve_route(&self, path: &str, mut ctx: Context) -> Option<ResolvedRoute> {
        let mut level = self.nodes.clone();
        let mut current: Option<NavigationNode> = None;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let matched = level
                .iter()
                .position(|node| node.path_segment == segment)
                .or_else(|| {
                    level
                        .iter()
                        .position(|node| node.path_segment.starts_with(':'))
                })?;
            let node = level.swap_remove(matched);

            if let Some(param) = node.path_segment.strip_prefix(':') {
                ctx.insert(param.to_string(), Value::String(segment.to_string()));
            }
            trace!(segment, path_segment = %node.path_segment, "route segment");

            level = node.resolve_children(ctx.clone()).await;
            current = Some(node);
        }

        let node = current?;
        Some(ResolvedRoute {
            node,
            children: level,
            ctx,
        })
    }
}
