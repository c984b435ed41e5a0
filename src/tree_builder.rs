use std::sync::Arc;

use chrono::Utc;
use futures::{future::join_all, FutureExt};
use serde_json::{json, Map, Value};
use tracing::{debug, trace, trace_span, warn, Instrument};

use crate::{
    access::{NodeAccessHandling, PassThroughAccess},
    aggregator::{provider_nodes, ChildrenByEntity},
    config::{EnvConfig, PortalConfig, NAVHEADER_UP_TOGGLE},
    config_source::ConfigSource,
    entity_path::{compute_fetch_context, entity_path, node_entity_type, FetchParams},
    feature_toggles::FeatureToggles,
    help_context::HelpContextStore,
    local_overlay::{LocalOverlay, NoLocalOverlay},
    node::{
        ActivationHook, ChildrenResolver, CompoundChildrenCell, Context, EntityDefinition,
        NavigationNode, NodeChildren,
    },
    node_sort::{mark_entity_root_children, sort_nodes},
    visibility::is_visible,
};

pub const ERROR_NOT_FOUND_ENTITY_TYPE: &str = "ERROR_NOT_FOUND";
pub const ENTITY_404_VIEW_URL: &str = "/error-handling#entity_404";
pub const COMPOUND_SUFFIX: &str = "::compound";

/// Stand-ins for the children of an entity that does not exist.  The router
/// lands on them for any path below the entity and the error view reads
/// `context.error` to say which entity was missing.
pub fn entity_not_found_nodes(
    definition: &EntityDefinition,
    additional_context: &FetchParams,
) -> Vec<NavigationNode> {
    let error = json!({
        "entityDefinition": definition,
        "additionalContext": additional_context,
    });

    ["error", ":notfound"]
        .iter()
        .map(|path_segment| {
            let mut context = Map::new();
            context.insert("error".to_string(), error.clone());
            NavigationNode {
                path_segment: path_segment.to_string(),
                entity_type: Some(ERROR_NOT_FOUND_ENTITY_TYPE.to_string()),
                view_url: Some(ENTITY_404_VIEW_URL.to_string()),
                hide_from_nav: Some(true),
                hide_side_nav: Some(true),
                virtual_tree: Some(true),
                context,
                ..Default::default()
            }
        })
        .collect()
}

/// `ctx` with the node's own context on top; what visibility expressions of
/// entity children are evaluated against.
fn node_visibility_context(ctx: &Context, node: &NavigationNode) -> Context {
    let mut merged = ctx.clone();
    for (key, value) in &node.context {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// The navigation tree composition engine.
///
/// `apply_entity_children_recursively` walks a node tree once and replaces all
/// static children with resolvers.  The resolvers do the real work whenever
/// the host navigates: fetching entity-specific nodes, looking up entity
/// context, filtering, access checks and ordering.
///
/// Cloning is cheap; every collaborator sits behind an `Arc` and resolvers
/// hold their own clone of the builder.
#[derive(Clone)]
pub struct NavigationTreeBuilder {
    config_source: Arc<dyn ConfigSource + Send + Sync>,
    local_overlay: Arc<dyn LocalOverlay + Send + Sync>,
    access: Arc<dyn NodeAccessHandling + Send + Sync>,
    toggles: Arc<dyn FeatureToggles + Send + Sync>,
    help_context: Arc<HelpContextStore>,
    portal_config: Arc<PortalConfig>,
    env_config: Arc<EnvConfig>,
}

impl NavigationTreeBuilder {
    pub fn new(
        config_source: Arc<dyn ConfigSource + Send + Sync>,
        portal_config: PortalConfig,
        env_config: EnvConfig,
    ) -> Self {
        let toggles = Arc::new(portal_config.feature_toggles());
        NavigationTreeBuilder {
            config_source,
            local_overlay: Arc::new(NoLocalOverlay),
            access: Arc::new(PassThroughAccess),
            toggles,
            help_context: Arc::new(HelpContextStore::new()),
            portal_config: Arc::new(portal_config),
            env_config: Arc::new(env_config),
        }
    }

    pub fn with_local_overlay(mut self, local_overlay: Arc<dyn LocalOverlay + Send + Sync>) -> Self {
        self.local_overlay = local_overlay;
        self
    }

    pub fn with_access_handling(mut self, access: Arc<dyn NodeAccessHandling + Send + Sync>) -> Self {
        self.access = access;
        self
    }

    pub fn with_feature_toggles(mut self, toggles: Arc<dyn FeatureToggles + Send + Sync>) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_help_context_store(mut self, help_context: Arc<HelpContextStore>) -> Self {
        self.help_context = help_context;
        self
    }

    pub fn help_context_store(&self) -> &Arc<HelpContextStore> {
        &self.help_context
    }

    pub fn portal_config(&self) -> &PortalConfig {
        &self.portal_config
    }

    pub fn env_config(&self) -> &EnvConfig {
        &self.env_config
    }

    fn visible_and_checked(&self, ctx: &Context, children: Vec<NavigationNode>) -> Vec<NavigationNode> {
        children
            .into_iter()
            .filter(|child| is_visible(ctx, child, self.toggles.as_ref()))
            .map(|child| {
                self.access
                    .node_access_handling(ctx, child, &self.portal_config, &self.env_config)
            })
            .collect()
    }

    /// Replace the node's children (and, recursively, its descendants'
    /// children) with resolvers.
    ///
    /// `ancestry` holds the entity definitions of the entity nodes above
    /// `node`, outermost first; `parent_entity_path` is their dotted path.
    pub fn apply_entity_children_recursively(
        &self,
        node: &mut NavigationNode,
        children_by_entity: &Arc<ChildrenByEntity>,
        parent_entity_path: &str,
        ancestry: &[EntityDefinition],
    ) {
        match node.define_entity.clone() {
            None => {
                let mut children = node.take_static_children();
                for child in children.iter_mut() {
                    self.apply_entity_children_recursively(
                        child,
                        children_by_entity,
                        parent_entity_path,
                        ancestry,
                    );
                }

                let builder = self.clone();
                node.children = Some(NodeChildren::Lazy(ChildrenResolver::new(move |ctx| {
                    let visible = builder.visible_and_checked(&ctx, children.clone());
                    async move { visible }.boxed()
                })));
            }
            Some(definition) => {
                let new_entity_path = match &definition.id {
                    Some(id) => entity_path(parent_entity_path, id),
                    None => parent_entity_path.to_string(),
                };

                let mut direct_children = node.take_static_children();
                mark_entity_root_children(&mut direct_children);
                node.portal_direct_children = Some(direct_children.clone());

                self.apply_up_link(node, &definition);
                self.install_compound_cell(node, children_by_entity, &new_entity_path);

                let mut entity_ancestry = ancestry.to_vec();
                entity_ancestry.push(definition.clone());
                let provider_entity_path = definition.id.as_ref().map(|_| new_entity_path);

                let builder = self.clone();
                let entity_node = node.clone();
                let children_by_entity = children_by_entity.clone();
                node.children = Some(NodeChildren::Lazy(ChildrenResolver::new(move |ctx| {
                    let builder = builder.clone();
                    let entity_node = entity_node.clone();
                    let children_by_entity = children_by_entity.clone();
                    let direct_children = direct_children.clone();
                    let entity_path = provider_entity_path.clone();
                    let ancestry = entity_ancestry.clone();
                    async move {
                        builder
                            .entity_children_provider(
                                &entity_node,
                                ctx,
                                children_by_entity,
                                direct_children,
                                entity_path,
                                &ancestry,
                            )
                            .await
                    }
                    .boxed()
                })));
            }
        }

        if node.is_virtual_tree() {
            node.children = None;
        }
    }

    /// `useBack` entities get an "up" link in their nav header when the
    /// toggle is on.  Neither input depends on the navigation context so this
    /// happens once, on the node the host holds.
    fn apply_up_link(&self, node: &mut NavigationNode, definition: &EntityDefinition) {
        if definition.use_back != Some(true) || !self.toggles.is_active(NAVHEADER_UP_TOGGLE) {
            return;
        }
        if let Some(nav_header) = node.nav_header.as_mut() {
            nav_header.insert("showUpLink".to_string(), Value::Bool(true));
        }
    }

    fn install_compound_cell(
        &self,
        node: &mut NavigationNode,
        children_by_entity: &ChildrenByEntity,
        new_entity_path: &str,
    ) {
        let compound = match node.compound.as_mut() {
            Some(compound) => compound,
            None => return,
        };

        let bucket = format!("{}{}", new_entity_path, COMPOUND_SUFFIX);
        let bucketed = children_by_entity.get(&bucket).cloned().unwrap_or_default();
        trace!(bucket = %bucket, count = bucketed.len(), "compound children");

        compound.cell = Some(Arc::new(CompoundChildrenCell::new(
            compound.children.clone(),
            bucketed,
            self.toggles.clone(),
        )));
    }

    /// Resolve the children of an entity node for one navigation.
    ///
    /// Never fails: a missing entity turns into error nodes, any other fetch
    /// problem into the statically known children.
    pub async fn entity_children_provider(
        &self,
        entity_node: &NavigationNode,
        ctx: Context,
        children_by_entity: Arc<ChildrenByEntity>,
        direct_children: Vec<NavigationNode>,
        entity_path: Option<String>,
        ancestry: &[EntityDefinition],
    ) -> Vec<NavigationNode> {
        let definition = entity_node.define_entity.clone().unwrap_or_default();
        let entity_type_id = match entity_path
            .filter(|path| !path.is_empty())
            .or_else(|| definition.id.clone())
        {
            Some(entity_type_id) => entity_type_id,
            None => {
                warn!(
                    path_segment = %entity_node.path_segment,
                    "entity node without entity id, using direct children only"
                );
                return direct_children;
            }
        };

        let span = trace_span!("entity_children_provider", entity = %entity_type_id);
        async move {
            let entity_id = definition
                .context_key
                .as_ref()
                .and_then(|key| ctx.get(key))
                .filter(|value| !value.is_null());

            let mut static_children = direct_children;
            if let Some(bucket) = children_by_entity.get(&entity_type_id) {
                static_children.extend(bucket.iter().cloned());
            }

            let children = match (entity_id, &definition.dynamic_fetch_id) {
                (Some(_), Some(fetch_id)) => {
                    let fetch_context = compute_fetch_context(ancestry, &ctx);
                    let additional_context = fetch_context.get(fetch_id).cloned().unwrap_or_default();

                    match self
                        .config_source
                        .get_raw_configs_for_entity(fetch_id, &additional_context)
                        .await
                    {
                        Ok(providers) => {
                            let fetched = provider_nodes(providers, Utc::now())
                                .into_iter()
                                .map(|mut node| {
                                    if node.entity_type.as_deref().map_or(true, str::is_empty) {
                                        node.entity_type = Some(entity_type_id.clone());
                                    }
                                    node
                                });
                            static_children.extend(fetched);
                            static_children
                        }
                        Err(err) if err.is_not_found() => {
                            debug!(%err, "entity not found");
                            return entity_not_found_nodes(&definition, &additional_context);
                        }
                        Err(err) => {
                            warn!(
                                %err,
                                entity = %entity_type_id,
                                "could not retrieve entity nodes, using static children"
                            );
                            static_children
                        }
                    }
                }
                _ => static_children,
            };
            let children = self
                .local_overlay
                .replace_server_nodes_with_local_ones(children, &[entity_type_id.clone()])
                .await;

            // Nodes for deeper entity levels can arrive mixed into this
            // level's response; hand them down through a new map.
            let mut merged: Option<ChildrenByEntity> = None;
            let mut own_children = vec![];
            for child in children {
                let child_entity_type = node_entity_type(&child).to_string();
                if child.is_entity_root_child() || child_entity_type == entity_type_id {
                    own_children.push(child);
                } else {
                    merged
                        .get_or_insert_with(|| children_by_entity.as_ref().clone())
                        .entry(child_entity_type)
                        .or_default()
                        .push(child);
                }
            }
            let children_by_entity = match merged {
                Some(merged) => Arc::new(merged),
                None => children_by_entity,
            };

            for child in own_children.iter_mut() {
                self.apply_entity_children_recursively(
                    child,
                    &children_by_entity,
                    &entity_type_id,
                    ancestry,
                );
            }

            self.build_children_for_entity(entity_node, own_children, &ctx, ancestry)
                .await
        }
        .instrument(span)
        .await
    }

    /// Look up the entity context of every entity along the ancestry, keyed by
    /// fetch id.  Lookups run concurrently; failed ones are left out.
    async fn aggregate_entity_context(
        &self,
        ancestry: &[EntityDefinition],
        ctx: &Context,
    ) -> Map<String, Value> {
        let lookups = compute_fetch_context(ancestry, ctx)
            .into_iter()
            .map(|(fetch_id, params)| {
                let config_source = self.config_source.clone();
                async move {
                    match config_source.get_entity_config(&fetch_id, &params).await {
                        Ok(entity_config) => {
                            Some((fetch_id, Value::Object(entity_config.entity_context)))
                        }
                        Err(err) => {
                            warn!(%err, "{} does not exist", fetch_id);
                            None
                        }
                    }
                }
            });

        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Stamp entity context and help hooks on the children of an entity, then
    /// filter, access-check and sort them.
    pub async fn build_children_for_entity(
        &self,
        entity_node: &NavigationNode,
        children: Vec<NavigationNode>,
        ctx: &Context,
        ancestry: &[EntityDefinition],
    ) -> Vec<NavigationNode> {
        trace!(
            path_segment = %entity_node.path_segment,
            count = children.len(),
            "building entity children"
        );
        let entity_context = Value::Object(self.aggregate_entity_context(ancestry, ctx).await);

        let visible: Vec<NavigationNode> = children
            .into_iter()
            .map(|mut child| {
                child
                    .context
                    .insert("entityContext".to_string(), entity_context.clone());

                let help_context = child.help_context.clone().or_else(|| {
                    child
                        .context
                        .get("serviceProviderConfig")
                        .and_then(|config| config.get("helpContext"))
                        .cloned()
                });
                if let Some(help_context) = help_context {
                    child
                        .context
                        .insert("helpContext".to_string(), help_context);
                }

                let store = self.help_context.clone();
                child.on_node_activation = Some(ActivationHook::new(move |node| {
                    store.record(node.context.get("helpContext").cloned());
                    true
                }));
                child
            })
            .filter(|child| {
                is_visible(
                    &node_visibility_context(ctx, child),
                    child,
                    self.toggles.as_ref(),
                )
            })
            .map(|child| {
                self.access
                    .node_access_handling(ctx, child, &self.portal_config, &self.env_config)
            })
            .collect();

        sort_nodes(visible)
    }
}
