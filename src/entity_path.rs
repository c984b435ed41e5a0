use std::collections::BTreeMap;

use serde_json::Value;

use crate::node::{Context, EntityDefinition, NavigationNode};

/// Bucket for nodes that do not name an entity type.
pub const DEFAULT_ENTITY_TYPE: &str = "home";

/// Query parameters of one entity-scoped backend call.
pub type FetchParams = BTreeMap<String, String>;

/// Params for every entity along an ancestry, keyed by the `dynamicFetchId`
/// of the entity they are meant for.
pub type FetchContext = BTreeMap<String, FetchParams>;

/// Join a parent entity path and an entity id into a dotted entity path.
pub fn entity_path(parent_entity_path: &str, entity_id: &str) -> String {
    if parent_entity_path.is_empty() {
        entity_id.to_string()
    } else {
        format!("{}.{}", parent_entity_path, entity_id)
    }
}

pub fn normalize_entity_type(entity_type: Option<&str>) -> &str {
    match entity_type {
        Some(entity_type) if !entity_type.is_empty() => entity_type,
        _ => DEFAULT_ENTITY_TYPE,
    }
}

pub fn node_entity_type(node: &NavigationNode) -> &str {
    normalize_entity_type(node.entity_type.as_deref())
}

/// Context values as the backend wants them: strings, with absent and null
/// values left out.
fn context_param(ctx: &Context, key: &str) -> Option<String> {
    match ctx.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Compute the fetch parameters for every entity along `ancestry`.
///
/// `ancestry` lists the entity definitions from the outermost ancestor down to
/// the entity itself.  Walking it upward, each definition with both a
/// `contextKey` and a `dynamicFetchId` registers its own params record, and
/// then `tenant`, `user` and that definition's instance id are written into
/// every record registered so far.  The record of the innermost entity thereby
/// sees the ids of all its ancestors while an ancestor's record never sees its
/// descendants' ids.
pub fn compute_fetch_context(ancestry: &[EntityDefinition], ctx: &Context) -> FetchContext {
    let mut fetch_context = FetchContext::new();
    let tenant = context_param(ctx, "tenantid");
    let user = context_param(ctx, "userid");

    for definition in ancestry.iter().rev() {
        let (context_key, fetch_id) = match (&definition.context_key, &definition.dynamic_fetch_id)
        {
            (Some(context_key), Some(fetch_id)) => (context_key, fetch_id),
            _ => continue,
        };

        fetch_context.entry(fetch_id.clone()).or_default();
        let entity_id = context_param(ctx, context_key);

        for params in fetch_context.values_mut() {
            if let Some(tenant) = &tenant {
                params.insert("tenant".to_string(), tenant.clone());
            }
            if let Some(user) = &user {
                params.insert("user".to_string(), user.clone());
            }
            if let Some(entity_id) = &entity_id {
                params.insert(fetch_id.clone(), entity_id.clone());
            }
        }
    }

    fetch_context
}
