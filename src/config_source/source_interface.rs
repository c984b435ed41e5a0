use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{entity_path::FetchParams, node::NavigationNode};

pub type Result<T> = std::result::Result<T, ServerError>;

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> ServerError {
        ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::DataLayer,
            message: err.to_string(),
            status: None,
        })
    }
}

/// Where a config lookup went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    /// We were asked for something unusable: an unparseable server URL, a
    /// missing fixture directory, an entity lookup without an id.
    BadInput,
    /// The portal server (or the filesystem under a fixture directory)
    /// failed us.
    ServerLayer,
    /// Provider registrations are wrong or absent: malformed node JSON, an
    /// entity instance nobody knows about.
    DataLayer,
    /// Unclassified.
    UnknownLayer,
}

/// What gets logged when a lookup fails.
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Rendered lower-level error.
    pub message: String,
    /// HTTP status, or 404 for a missing fixture file.  Only 404 changes what
    /// the tree builder does.
    pub status: Option<u16>,
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} ({}): {}", self.layer, status, self.message),
            None => write!(f, "{:?}: {}", self.layer, self.message),
        }
    }
}

/// Failure of a `ConfigSource` call, split by whether asking again later
/// could succeed.  Nothing in this crate retries.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Asking again returns the same answer: unknown entity, malformed
    /// provider JSON, a 403.
    #[error("sticky problem: {0}")]
    StickyProblem(ErrorDetails),
    /// Connection trouble or a 5xx from the portal server.
    #[error("transient problem: {0}")]
    TransientProblem(ErrorDetails),
    #[error("unsupported operation")]
    Unsupported,
}

impl ServerError {
    pub fn not_found(message: impl Into<String>) -> ServerError {
        ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::DataLayer,
            message: message.into(),
            status: Some(404),
        })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServerError::StickyProblem(details) | ServerError::TransientProblem(details) => {
                details.status
            }
            ServerError::Unsupported => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// One registrant's contribution: its navigation nodes plus the config the
/// nodes get to see as `context.serviceProviderConfig`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProvider {
    #[serde(default)]
    pub nodes: Vec<NavigationNode>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub installation_data: Map<String, Value>,
    /// RFC 3339 registration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default)]
    pub is_mandatory_extension: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    #[serde(default)]
    pub entity_context: Map<String, Value>,
    #[serde(default)]
    pub providers: Vec<ServiceProvider>,
}

/// Where provider configuration comes from: a portal server over HTTPS or a
/// fixture directory on disk.
///
/// Implementations must be usable from concurrently running resolvers; every
/// call is independent and nothing is cached at this layer.
#[async_trait]
pub trait ConfigSource {
    /// All providers registered for the current tenant.
    async fn get_raw_configs_for_tenant(&self) -> Result<Vec<ServiceProvider>>;

    /// Providers contributing nodes to one entity instance.  Must fail with a
    /// `ServerError::not_found` error when the entity does not exist.
    async fn get_raw_configs_for_entity(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<Vec<ServiceProvider>>;

    /// Entity context data (plus providers) for one entity instance.
    async fn get_entity_config(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<EntityConfig>;
}

#[test]
fn test_error_rendering_and_not_found() {
    let missing = ServerError::not_found("no project p9");
    assert!(missing.is_not_found());
    assert_eq!(
        missing.to_string(),
        "sticky problem: DataLayer (404): no project p9"
    );

    let flaky = ServerError::TransientProblem(ErrorDetails {
        layer: ErrorLayer::ServerLayer,
        message: "Server status of 503 Service Unavailable".to_string(),
        status: Some(503),
    });
    assert!(!flaky.is_not_found());
    assert_eq!(flaky.status(), Some(503));
    assert_eq!(ServerError::Unsupported.status(), None);
}
