use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{from_str, Map, Value};
use tokio::fs::{metadata, read_to_string};
use tracing::trace;

use super::source_interface::{
    ConfigSource, EntityConfig, ErrorDetails, ErrorLayer, Result, ServerError, ServiceProvider,
};
use crate::entity_path::FetchParams;

/// Missing files amount to a 404 for our purposes; anything else that goes
/// wrong reading the fixtures is a sticky problem.
impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> ServerError {
        if err.kind() == std::io::ErrorKind::NotFound {
            return ServerError::not_found(err.to_string());
        }
        ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::ServerLayer,
            message: err.to_string(),
            status: None,
        })
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    trace!(path = %path.display(), "reading fixture");
    let raw_str = read_to_string(path).await?;
    Ok(from_str(&raw_str)?)
}

async fn is_dir(path: &Path) -> bool {
    match metadata(path).await {
        Ok(m) => m.is_dir(),
        Err(_) => false,
    }
}

/// Portal configuration served from a directory of JSON fixtures:
///
/// - `tenant.json`: the tenant's providers.
/// - `entities/<entityType>.json`: providers for any instance of the entity.
/// - `entities/<entityType>/<id>.json`: providers for one instance.  Once the
///   per-instance directory exists, instances without a file do not exist.
/// - `entity-context/<entityType>.json` and
///   `entity-context/<entityType>/<id>.json`: the `entityContext` map, with
///   the same lookup rules.
///
/// The instance id is the fetch param named after the entity type itself.
#[derive(Debug)]
struct LocalConfigSource {
    root: PathBuf,
}

impl LocalConfigSource {
    /// Pick the per-instance file when a per-instance directory exists, the
    /// per-type file otherwise.
    async fn entity_file(
        &self,
        kind: &str,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<PathBuf> {
        let instance_dir = self.root.join(kind).join(entity_type);
        if is_dir(&instance_dir).await {
            return match context.get(entity_type) {
                Some(id) => Ok(instance_dir.join(format!("{}.json", id))),
                None => Err(ServerError::StickyProblem(ErrorDetails {
                    layer: ErrorLayer::BadInput,
                    message: format!("no {} id given for {}", entity_type, kind),
                    status: None,
                })),
            };
        }
        Ok(self.root.join(kind).join(format!("{}.json", entity_type)))
    }
}

#[async_trait]
impl ConfigSource for LocalConfigSource {
    async fn get_raw_configs_for_tenant(&self) -> Result<Vec<ServiceProvider>> {
        read_json(&self.root.join("tenant.json")).await
    }

    async fn get_raw_configs_for_entity(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<Vec<ServiceProvider>> {
        let path = self.entity_file("entities", entity_type, context).await?;
        read_json(&path).await
    }

    async fn get_entity_config(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<EntityConfig> {
        let path = self.entity_file("entity-context", entity_type, context).await?;
        let entity_context: Map<String, Value> = read_json(&path).await?;

        let providers = match self.get_raw_configs_for_entity(entity_type, context).await {
            Ok(providers) => providers,
            Err(err) if err.is_not_found() => vec![],
            Err(err) => return Err(err),
        };

        Ok(EntityConfig {
            entity_context,
            providers,
        })
    }
}

pub fn make_local_source(root: &str) -> Result<Box<dyn ConfigSource + Send + Sync>> {
    let root = PathBuf::from(root);
    if !root.is_dir() {
        return Err(ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::BadInput,
            message: format!("bad fixture directory: {}", root.display()),
            status: None,
        }));
    }

    Ok(Box::new(LocalConfigSource { root }))
}
