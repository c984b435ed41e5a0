use std::{
    fmt,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{feature_toggles::FeatureToggles, node_sort::sort_nodes, visibility::is_visible};

/// Runtime context handed to resolvers by the host on every navigation.  It
/// carries at least `tenantid`, `userid` and the entity id fields named by the
/// `contextKey`s along the current entity ancestry.
pub type Context = Map<String, Value>;

pub type ChildrenFuture = BoxFuture<'static, Vec<NavigationNode>>;

/// Deferred children producer.  Every invocation re-derives the list from
/// scratch; nothing is cached between calls.
#[derive(Clone)]
pub struct ChildrenResolver(Arc<dyn Fn(Context) -> ChildrenFuture + Send + Sync>);

impl ChildrenResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Context) -> ChildrenFuture + Send + Sync + 'static,
    {
        ChildrenResolver(Arc::new(f))
    }

    pub fn resolve(&self, ctx: Context) -> ChildrenFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for ChildrenResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChildrenResolver(..)")
    }
}

/// Either the list a provider declared or the resolver the tree builder put
/// in its place.  Processed nodes only ever hold `Lazy`.
#[derive(Clone, Debug)]
pub enum NodeChildren {
    Static(Vec<NavigationNode>),
    Lazy(ChildrenResolver),
}

impl Serialize for NodeChildren {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NodeChildren::Static(nodes) => nodes.serialize(serializer),
            NodeChildren::Lazy(_) => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for NodeChildren {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<NavigationNode>::deserialize(deserializer).map(NodeChildren::Static)
    }
}

fn children_not_serializable(children: &Option<NodeChildren>) -> bool {
    !matches!(children, Some(NodeChildren::Static(_)))
}

/// Hook the host calls when a node gets activated.  Returning `false` vetoes
/// the navigation.
#[derive(Clone)]
pub struct ActivationHook(Arc<dyn Fn(&NavigationNode) -> bool + Send + Sync>);

impl ActivationHook {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&NavigationNode) -> bool + Send + Sync + 'static,
    {
        ActivationHook(Arc::new(f))
    }

    pub fn activate(&self, node: &NavigationNode) -> bool {
        (self.0)(node)
    }
}

impl fmt::Debug for ActivationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActivationHook(..)")
    }
}

/// Marks a node as the root of an entity subtree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the context field holding the current entity instance id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_key: Option<String>,
    /// Key backend calls use to fetch the entity's additional nodes and its
    /// entity context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_fetch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_back: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `order`/`dxpOrder` show up as both numbers and numeric strings in provider
/// data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Order {
    Number(f64),
    Text(String),
}

impl Order {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Order::Number(n) if n.is_finite() => Some(*n),
            Order::Number(_) => None,
            Order::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDefinition {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    /// Reference to a category, by id or label.
    Label(String),
    Definition(CategoryDefinition),
}

impl Category {
    /// The name other siblings use to refer to this category.
    pub fn key(&self) -> &str {
        match self {
            Category::Label(label) => label,
            Category::Definition(def) => def.id.as_deref().unwrap_or(&def.label),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusBadge {
    pub label: String,
    #[serde(rename = "type")]
    pub badge_type: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compound {
    #[serde(default)]
    pub children: Vec<NavigationNode>,
    /// Installed by the tree builder; reads go through it once present.
    #[serde(skip)]
    pub cell: Option<Arc<CompoundChildrenCell>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Shared compound-view children of one entity node.  Reads merge the
/// declared children with the `<entity path>::compound` bucket, then filter
/// and sort against the caller's context.  Writes replace the declared part
/// for every reader (last write wins); bucketed nodes always stay.
pub struct CompoundChildrenCell {
    children: Mutex<Vec<NavigationNode>>,
    bucketed: Vec<NavigationNode>,
    toggles: Arc<dyn FeatureToggles + Send + Sync>,
}

impl CompoundChildrenCell {
    pub fn new(
        children: Vec<NavigationNode>,
        bucketed: Vec<NavigationNode>,
        toggles: Arc<dyn FeatureToggles + Send + Sync>,
    ) -> Self {
        CompoundChildrenCell {
            children: Mutex::new(children),
            bucketed,
            toggles,
        }
    }

    pub fn get(&self, ctx: &Context) -> Vec<NavigationNode> {
        let mut current = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        current.extend(self.bucketed.iter().cloned());

        let entity_context = ctx.get("entityContext").cloned();
        let visible = current
            .into_iter()
            .map(|mut child| {
                if let Some(entity_context) = &entity_context {
                    child
                        .context
                        .insert("entityContext".to_string(), entity_context.clone());
                }
                child
            })
            .filter(|child| is_visible(ctx, child, self.toggles.as_ref()))
            .collect();

        sort_nodes(visible)
    }

    pub fn set(&self, children: Vec<NavigationNode>) {
        *self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = children;
    }
}

impl fmt::Debug for CompoundChildrenCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundChildrenCell").finish_non_exhaustive()
    }
}

/// One entry of the navigation tree.
///
/// Fields the composition engine reads or writes are typed; everything else a
/// provider declares (labels, icons, view groups, ...) rides along in `extra`
/// and is serialized back untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationNode {
    #[serde(default)]
    pub path_segment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
    #[serde(default, skip_serializing_if = "children_not_serializable")]
    pub children: Option<NodeChildren>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub define_entity: Option<EntityDefinition>,
    /// Deprecated in favour of `visible_for_context`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_for_entity_context: Option<Map<String, Value>>,
    /// JMESPath expression evaluated against the runtime context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_for_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_for_feature_toggles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dxp_order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_from_nav: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_side_nav: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_tree: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_badge: Option<StatusBadge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_header: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound: Option<Compound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_policies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_context: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,

    /// Children as declared before the builder swapped in a resolver.
    #[serde(rename = "_portalDirectChildren", default, skip_serializing)]
    pub portal_direct_children: Option<Vec<NavigationNode>>,
    #[serde(
        rename = "_entityRootChild",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub entity_root_child: Option<bool>,
    #[serde(skip)]
    pub on_node_activation: Option<ActivationHook>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NavigationNode {
    pub fn is_virtual_tree(&self) -> bool {
        self.virtual_tree.unwrap_or(false)
    }

    pub fn is_entity_root_child(&self) -> bool {
        self.entity_root_child.unwrap_or(false)
    }

    /// The statically declared children, if the node still carries them.
    pub fn static_children(&self) -> Option<&[NavigationNode]> {
        match &self.children {
            Some(NodeChildren::Static(nodes)) => Some(nodes),
            _ => None,
        }
    }

    pub fn take_static_children(&mut self) -> Vec<NavigationNode> {
        match self.children.take() {
            Some(NodeChildren::Static(nodes)) => nodes,
            other => {
                self.children = other;
                vec![]
            }
        }
    }

    /// Resolve children the way the host does: run the resolver for lazy
    /// children, hand out a copy of static ones.
    pub async fn resolve_children(&self, ctx: Context) -> Vec<NavigationNode> {
        match &self.children {
            Some(NodeChildren::Lazy(resolver)) => resolver.resolve(ctx).await,
            Some(NodeChildren::Static(nodes)) => nodes.clone(),
            None => vec![],
        }
    }

    /// Current compound-view children for `ctx`, read through the shared cell
    /// once the builder installed it.
    pub fn compound_children(&self, ctx: &Context) -> Option<Vec<NavigationNode>> {
        let compound = self.compound.as_ref()?;
        Some(match &compound.cell {
            Some(cell) => cell.get(ctx),
            None => compound.children.clone(),
        })
    }

    pub fn activate(&self) -> bool {
        match &self.on_node_activation {
            Some(hook) => hook.activate(self),
            None => true,
        }
    }
}

#[test]
fn test_compound_set_keeps_bucketed_children() {
    use crate::feature_toggles::StaticFeatureToggles;

    let nodes = |value: serde_json::Value| -> Vec<NavigationNode> {
        serde_json::from_value(value).unwrap()
    };
    let cell = CompoundChildrenCell::new(
        nodes(serde_json::json!([{"pathSegment": "static"}])),
        nodes(serde_json::json!([{"pathSegment": "bucketed"}])),
        Arc::new(StaticFeatureToggles::default()),
    );
    let ctx = Context::new();
    let segments = |children: Vec<NavigationNode>| -> Vec<String> {
        children.into_iter().map(|n| n.path_segment).collect()
    };

    assert_eq!(segments(cell.get(&ctx)), vec!["static", "bucketed"]);

    cell.set(nodes(serde_json::json!([{"pathSegment": "new-static"}])));
    assert_eq!(segments(cell.get(&ctx)), vec!["new-static", "bucketed"]);
}
