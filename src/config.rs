use std::{collections::BTreeMap, fs::File, io::BufReader};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{from_reader, Map, Value};

use crate::{config_source::Result, feature_toggles::StaticFeatureToggles};

/// Name of the toggle enabling the "go up" link in entity nav headers.
pub const NAVHEADER_UP_TOGGLE: &str = "navheader-up";

/// Schema for the portal config JSON the portal server hands to every
/// frontend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    /// `{ "toggle-name": true|false }`.
    #[serde(default)]
    pub feature_toggles: BTreeMap<String, bool>,
    /// Merged into the navigation's global context.
    #[serde(default)]
    pub global_context: Map<String, Value>,
    #[serde(default)]
    pub breadcrumbs_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortalConfig {
    pub fn feature_toggles(&self) -> StaticFeatureToggles {
        StaticFeatureToggles::from_flags(&self.feature_toggles)
    }
}

/// Deployment-level settings; the portal's `.env` equivalent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    /// Allows the local content-configuration overlay; see
    /// `local_overlay::make_local_overlay`.
    #[serde(default)]
    pub development_instance: bool,
    /// Passed through as the navigation's `viewGroupSettings`.
    #[serde(default)]
    pub view_groups: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn load<T: DeserializeOwned>(config_path: &str) -> Result<T> {
    let config_file = File::open(config_path)?;
    let reader = BufReader::new(config_file);
    Ok(from_reader(reader)?)
}

#[test]
fn test_portal_config_defaults() {
    let config: PortalConfig = serde_json::from_str(
        r#"{"featureToggles": {"navheader-up": true, "beta": false}, "logoUrl": "/logo.svg"}"#,
    )
    .unwrap();

    assert!(config.global_context.is_empty());
    assert!(!config.breadcrumbs_enabled);
    assert_eq!(config.extra["logoUrl"], "/logo.svg");

    use crate::feature_toggles::FeatureToggles;
    let toggles = config.feature_toggles();
    assert!(toggles.is_active(NAVHEADER_UP_TOGGLE));
    assert!(!toggles.is_active("beta"));
}
