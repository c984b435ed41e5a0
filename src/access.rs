use std::collections::HashSet;

use serde_json::Value;
use tracing::trace;

use crate::{
    config::{EnvConfig, PortalConfig},
    node::{Context, NavigationNode},
};

pub const ACCESS_DENIED_VIEW_URL: &str = "/error-handling#403";

/// Security/policy gate every child passes through before the host sees it.
/// Implementations transform the node (or hand it back untouched); they never
/// drop it, filtering is the visibility gates' job.
pub trait NodeAccessHandling {
    fn node_access_handling(
        &self,
        ctx: &Context,
        node: NavigationNode,
        portal_config: &PortalConfig,
        env_config: &EnvConfig,
    ) -> NavigationNode;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughAccess;

impl NodeAccessHandling for PassThroughAccess {
    fn node_access_handling(
        &self,
        _ctx: &Context,
        node: NavigationNode,
        _portal_config: &PortalConfig,
        _env_config: &EnvConfig,
    ) -> NavigationNode {
        node
    }
}

fn collect_policies<'a>(value: Option<&'a Value>, granted: &mut HashSet<&'a str>) {
    if let Some(Value::Array(policies)) = value {
        granted.extend(policies.iter().filter_map(Value::as_str));
    }
}

/// Policies granted for the node: `ctx.policies` plus the `policies` of every
/// entity in either the runtime or the node's own `entityContext`.
fn granted_policies<'a>(ctx: &'a Context, node: &'a NavigationNode) -> HashSet<&'a str> {
    let mut granted = HashSet::new();
    collect_policies(ctx.get("policies"), &mut granted);

    for entity_context in [ctx.get("entityContext"), node.context.get("entityContext")] {
        if let Some(Value::Object(entities)) = entity_context {
            for entity in entities.values() {
                collect_policies(entity.get("policies"), &mut granted);
            }
        }
    }

    granted
}

/// Nodes declaring `requiredPolicies` the user does not hold stay routable
/// (so deep links land on a proper error) but disappear from navigation and
/// show the access-denied view.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyAccessHandling;

impl NodeAccessHandling for PolicyAccessHandling {
    fn node_access_handling(
        &self,
        ctx: &Context,
        mut node: NavigationNode,
        _portal_config: &PortalConfig,
        _env_config: &EnvConfig,
    ) -> NavigationNode {
        let missing: Vec<String> = match &node.required_policies {
            Some(required) => {
                let granted = granted_policies(ctx, &node);
                required
                    .iter()
                    .filter(|policy| !granted.contains(policy.as_str()))
                    .cloned()
                    .collect()
            }
            None => return node,
        };

        if !missing.is_empty() {
            trace!(path_segment = %node.path_segment, ?missing, "access denied");
            node.hide_from_nav = Some(true);
            node.view_url = Some(ACCESS_DENIED_VIEW_URL.to_string());
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_value, json};

    use super::*;

    #[test]
    fn test_policy_access_handling() {
        let node: NavigationNode = from_value(json!({
            "pathSegment": "members",
            "viewUrl": "/members",
            "requiredPolicies": ["projectAdmin"],
            "context": {"entityContext": {"project": {"policies": ["projectMember"]}}}
        }))
        .unwrap();

        let denied = PolicyAccessHandling.node_access_handling(
            &Context::new(),
            node.clone(),
            &PortalConfig::default(),
            &EnvConfig::default(),
        );
        assert_eq!(denied.hide_from_nav, Some(true));
        assert_eq!(denied.view_url.as_deref(), Some(ACCESS_DENIED_VIEW_URL));

        let ctx = json!({"policies": ["projectAdmin"]});
        let allowed = PolicyAccessHandling.node_access_handling(
            ctx.as_object().unwrap(),
            node,
            &PortalConfig::default(),
            &EnvConfig::default(),
        );
        assert_eq!(allowed.hide_from_nav, None);
        assert_eq!(allowed.view_url.as_deref(), Some("/members"));
    }
}
