use serde_json::Value;
use tracing::debug;

use crate::{
    feature_toggles::FeatureToggles,
    node::{Context, NavigationNode},
};

/// Every key/value of `pattern` has to be present in `actual`.  Nested objects
/// are matched partially as well; everything else must be equal.
fn partial_match(pattern: &Value, actual: &Value) -> bool {
    match (pattern, actual) {
        (Value::Object(pattern), Value::Object(actual)) => pattern.iter().all(|(key, value)| {
            actual
                .get(key)
                .map_or(false, |actual_value| partial_match(value, actual_value))
        }),
        _ => pattern == actual,
    }
}

/// Deprecated gate: `visibleForEntityContext` must partially match the
/// context's `entityContext`.
pub fn visible_for_entity_context(ctx: &Context, node: &NavigationNode) -> bool {
    let pattern = match &node.visible_for_entity_context {
        Some(pattern) => pattern,
        None => return true,
    };

    match ctx.get("entityContext") {
        Some(Value::Object(entity_context)) => pattern.iter().all(|(key, value)| {
            entity_context
                .get(key)
                .map_or(false, |actual| partial_match(value, actual))
        }),
        _ => pattern.is_empty(),
    }
}

/// Evaluate a JMESPath expression against the context.  `None` means the
/// expression failed to compile, failed to evaluate or did not produce a
/// boolean.
fn evaluate_context_expression(expression: &str, ctx: &Context) -> Option<bool> {
    let compiled = match jmespath::compile(expression) {
        Ok(compiled) => compiled,
        Err(err) => {
            debug!(expression, %err, "visibleForContext does not compile");
            return None;
        }
    };

    match compiled.search(Value::Object(ctx.clone())) {
        Ok(result) => result.as_boolean(),
        Err(err) => {
            debug!(expression, %err, "visibleForContext failed to evaluate");
            None
        }
    }
}

/// `visibleForContext` gate.  Anything other than a clean `false` lets the
/// node through, which keeps nodes with broken expressions visible.
pub fn visible_for_context(ctx: &Context, node: &NavigationNode) -> bool {
    match &node.visible_for_context {
        Some(expression) => evaluate_context_expression(expression, ctx).unwrap_or(true),
        None => true,
    }
}

/// All listed toggles must hold; a `!` prefix requires the toggle to be off.
pub fn visible_for_feature_toggles(node: &NavigationNode, toggles: &dyn FeatureToggles) -> bool {
    match &node.visible_for_feature_toggles {
        Some(required) => required.iter().all(|entry| match entry.strip_prefix('!') {
            Some(negated) => !toggles.is_active(negated),
            None => toggles.is_active(entry),
        }),
        None => true,
    }
}

pub fn is_visible(ctx: &Context, node: &NavigationNode, toggles: &dyn FeatureToggles) -> bool {
    visible_for_entity_context(ctx, node)
        && visible_for_context(ctx, node)
        && visible_for_feature_toggles(node, toggles)
}
