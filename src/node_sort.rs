use std::{cmp::Ordering, collections::HashMap};

use itertools::Itertools;

use crate::node::{Category, NavigationNode, Order};

/// `dxpOrder` is the portal-side override of a provider's `order`.
fn own_order(node: &NavigationNode) -> Option<f64> {
    node.dxp_order
        .as_ref()
        .and_then(Order::as_f64)
        .or_else(|| node.order.as_ref().and_then(Order::as_f64))
}

/// Orders of the categories defined (as objects) anywhere in `nodes`, keyed by
/// the name string categories use to refer to them.  The first definition
/// wins.
fn category_orders<'a, I>(nodes: I) -> HashMap<String, f64>
where
    I: IntoIterator<Item = &'a NavigationNode>,
{
    let mut orders = HashMap::new();
    for node in nodes {
        let category = match &node.category {
            Some(category) => category,
            None => continue,
        };
        if let Category::Definition(def) = category {
            if let Some(order) = def.order.as_ref().and_then(Order::as_f64) {
                orders.entry(category.key().to_string()).or_insert(order);
                // Allow references by label as well as by id.
                orders.entry(def.label.clone()).or_insert(order);
            }
        }
    }
    orders
}

#[derive(Debug, Clone, PartialEq)]
struct SortKey {
    group_order: Option<f64>,
    category: Option<String>,
    own_order: Option<f64>,
}

impl SortKey {
    fn of(node: &NavigationNode, category_orders: &HashMap<String, f64>) -> SortKey {
        let own_order = own_order(node);
        let category = node.category.as_ref().map(|c| c.key().to_string());
        let group_order = category
            .as_ref()
            .and_then(|key| category_orders.get(key).copied())
            .or(own_order);

        SortKey {
            group_order,
            category,
            own_order,
        }
    }
}

/// Explicit orders come first; missing ones keep their relative position at
/// the end.
fn compare_orders(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_keys(a: &SortKey, b: &SortKey) -> Ordering {
    compare_orders(a.group_order, b.group_order)
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| compare_orders(a.own_order, b.own_order))
}

/// Comparator for sibling nodes.  Equal means "keep declaration order"; use
/// with a stable sort.
pub fn node_comparison(a: &NavigationNode, b: &NavigationNode) -> Ordering {
    let orders = category_orders([a, b]);
    compare_keys(&SortKey::of(a, &orders), &SortKey::of(b, &orders))
}

/// Stable sort of siblings by category, then `dxpOrder`/`order`.  String
/// categories pick up the order of a sibling's category definition.
pub fn sort_nodes(nodes: Vec<NavigationNode>) -> Vec<NavigationNode> {
    let orders = category_orders(&nodes);
    nodes
        .into_iter()
        .map(|node| (SortKey::of(&node, &orders), node))
        .sorted_by(|(a, _), (b, _)| compare_keys(a, b))
        .map(|(_, node)| node)
        .collect()
}

/// Tag nodes as declared directly under an entity node, as opposed to nodes
/// that ended up there because of their `entityType`.
pub fn mark_entity_root_children(nodes: &mut [NavigationNode]) {
    for node in nodes.iter_mut() {
        node.entity_root_child = Some(true);
    }
}
