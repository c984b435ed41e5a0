use async_trait::async_trait;
use serde::Deserialize;
use url::{ParseError, Url};

use super::source_interface::{
    ConfigSource, EntityConfig, ErrorDetails, ErrorLayer, Result, ServerError, ServiceProvider,
};
use crate::entity_path::FetchParams;

/// reqwest won't return an error for an unhappy status code itself; `get_json`
/// below looks at the status, so whatever makes it here is some kind of
/// transient connection problem.
impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> ServerError {
        ServerError::TransientProblem(ErrorDetails {
            layer: ErrorLayer::ServerLayer,
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        })
    }
}

impl From<ParseError> for ServerError {
    fn from(err: ParseError) -> ServerError {
        ServerError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::BadInput,
            message: err.to_string(),
            status: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TenantConfigResponse {
    #[serde(default)]
    providers: Vec<ServiceProvider>,
}

#[derive(Debug)]
struct RemoteConfigSource {
    client: reqwest::Client,
    /// `<server>/rest/config/`
    config_base_url: Url,
    access_token: Option<String>,
}

impl RemoteConfigSource {
    async fn get_json(&self, url: Url) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/json");
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;

        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let details = ErrorDetails {
            layer: if status.is_server_error() {
                ErrorLayer::ServerLayer
            } else {
                ErrorLayer::DataLayer
            },
            message: format!("Server status of {}", status),
            status: Some(status.as_u16()),
        };
        if status.is_server_error() {
            Err(ServerError::TransientProblem(details))
        } else {
            Err(ServerError::StickyProblem(details))
        }
    }

    fn entity_url(&self, entity_type: &str, context: &FetchParams) -> Result<Url> {
        let mut url = self.config_base_url.join(entity_type)?;
        if !context.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in context {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ConfigSource for RemoteConfigSource {
    async fn get_raw_configs_for_tenant(&self) -> Result<Vec<ServiceProvider>> {
        // The trailing slash of the base URL is only there for `join`.
        let mut url = self.config_base_url.clone();
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);

        let response: TenantConfigResponse = self.get_json(url).await?.json().await?;
        Ok(response.providers)
    }

    async fn get_raw_configs_for_entity(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<Vec<ServiceProvider>> {
        Ok(self.get_entity_config(entity_type, context).await?.providers)
    }

    async fn get_entity_config(
        &self,
        entity_type: &str,
        context: &FetchParams,
    ) -> Result<EntityConfig> {
        let url = self.entity_url(entity_type, context)?;
        Ok(self.get_json(url).await?.json().await?)
    }
}

pub fn make_remote_source(
    server_base_url: Url,
    access_token: Option<String>,
) -> Result<Box<dyn ConfigSource + Send + Sync>> {
    let config_base_url = server_base_url.join("rest/config/")?;

    Ok(Box::new(RemoteConfigSource {
        client: reqwest::Client::new(),
        config_base_url,
        access_token,
    }))
}

#[test]
fn test_entity_url_carries_fetch_params() {
    let source = RemoteConfigSource {
        client: reqwest::Client::new(),
        config_base_url: Url::parse("https://portal.example/rest/config/").unwrap(),
        access_token: None,
    };
    let mut params = FetchParams::new();
    params.insert("project".to_string(), "p 1".to_string());
    params.insert("tenant".to_string(), "t1".to_string());

    let url = source.entity_url("project", &params).unwrap();
    assert_eq!(
        url.as_str(),
        "https://portal.example/rest/config/project?project=p+1&tenant=t1"
    );
}
