use std::collections::{BTreeMap, HashSet};

/// Read access to the portal's active feature toggles.
///
/// Passed explicitly to everything that needs it so deep helpers never have to
/// reach for host-global state.
pub trait FeatureToggles {
    fn is_active(&self, name: &str) -> bool;
}

/// Toggle set fixed at construction time, typically from `PortalConfig`.
#[derive(Clone, Debug, Default)]
pub struct StaticFeatureToggles {
    active: HashSet<String>,
}

impl StaticFeatureToggles {
    pub fn new<I, S>(active: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticFeatureToggles {
            active: active.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from the `{ "name": true|false }` shape used in portal config.
    pub fn from_flags(flags: &BTreeMap<String, bool>) -> Self {
        Self::new(
            flags
                .iter()
                .filter(|(_, enabled)| **enabled)
                .map(|(name, _)| name.clone()),
        )
    }
}

impl FeatureToggles for StaticFeatureToggles {
    fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }
}

#[test]
fn test_from_flags_keeps_enabled_only() {
    let mut flags = BTreeMap::new();
    flags.insert("navheader-up".to_string(), true);
    flags.insert("beta".to_string(), false);

    let toggles = StaticFeatureToggles::from_flags(&flags);
    assert!(toggles.is_active("navheader-up"));
    assert!(!toggles.is_active("beta"));
    assert!(!toggles.is_active("unknown"));
}
