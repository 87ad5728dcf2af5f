//! OpenStack backend
//!
//! Authenticates against Keystone with the configured credentials, lists
//! Nova instances matching the query parameters and returns their FQDNs
//! with the configured domain suffix appended.
//!
//! Payload grammar: empty or `*` selects everything matching the default
//! filters (`status:ACTIVE`, `vm_state:ACTIVE`); otherwise a whitespace
//! separated list of `key:value` pairs merged over the defaults. The
//! `project` pair scopes the Keystone token rather than filtering servers.

use crate::backends::Backend;
use crate::core::config::OpenStackConfig;
use crate::core::error::{Error, Result};
use crate::nodeset::NodeSet;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const BACKEND_NAME: &str = "openstack";

pub const PREFIX: char = 'O';

pub struct OpenStackBackend {
    client: reqwest::Client,
    config: OpenStackConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Token,
}

#[derive(Debug, Deserialize)]
struct Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    region: Option<String>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
struct Server {
    name: String,
}

impl OpenStackBackend {
    pub fn new(config: OpenStackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build openstack HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    /// Issue a Keystone token, scoped to `project` when given, and locate
    /// the public compute endpoint in the returned catalog
    async fn authenticate(&self, project: Option<&str>) -> Result<(String, String)> {
        let mut auth = json!({
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": self.config.username,
                        "domain": {"id": "default"},
                        "password": self.config.password,
                    }
                }
            }
        });
        if let Some(project) = project {
            auth["scope"] = json!({
                "project": {"name": project, "domain": {"id": "default"}}
            });
        }

        let url = format!("{}/v3/auth/tokens", self.config.auth_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&json!({ "auth": auth }))
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::BackendAuth {
                backend: BACKEND_NAME,
                message: format!("Keystone rejected credentials: HTTP {status}"),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::BackendUnreachable {
                backend: BACKEND_NAME,
                message: format!("Keystone HTTP {status}: {text}"),
            });
        }

        let subject_token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::BackendAuth {
                backend: BACKEND_NAME,
                message: "Keystone response is missing X-Subject-Token".to_string(),
            })?
            .to_string();

        let body: TokenResponse = response.json().await.map_err(connection_error)?;
        let region = self.config.client_params.get("region_name");
        let compute_url = body
            .token
            .catalog
            .iter()
            .filter(|entry| entry.service_type == "compute")
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.interface == "public"
                    && region.map_or(true, |r| ep.region.as_deref() == Some(r))
            })
            .map(|ep| ep.url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::BackendUnreachable {
                backend: BACKEND_NAME,
                message: "no public compute endpoint in the service catalog".to_string(),
            })?;

        Ok((subject_token, compute_url))
    }

    fn fqdn(&self, name: &str) -> String {
        let suffix = self.config.domain_suffix.trim_start_matches('.');
        if suffix.is_empty() {
            name.to_string()
        } else {
            format!("{name}.{suffix}")
        }
    }
}

fn connection_error(e: reqwest::Error) -> Error {
    Error::BackendUnreachable {
        backend: BACKEND_NAME,
        message: e.to_string(),
    }
}

/// Parse a payload into `key:value` pairs
fn parse_params(payload: &str) -> Result<BTreeMap<String, String>> {
    let payload = payload.trim();
    let mut params = BTreeMap::new();
    if payload.is_empty() || payload == "*" {
        return Ok(params);
    }
    for pair in payload.split_whitespace() {
        let Some((key, value)) = pair.split_once(':') else {
            return Err(Error::InvalidQuery {
                backend: BACKEND_NAME,
                message: format!("expected 'key:value', got '{pair}'"),
            });
        };
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidQuery {
                backend: BACKEND_NAME,
                message: format!("empty key or value in '{pair}'"),
            });
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

/// Server-list filters: defaults, overlaid with the configured
/// `query_params`, overlaid with the payload pairs
fn merged_params(config: &OpenStackConfig, payload: &str) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::from([
        ("status".to_string(), "ACTIVE".to_string()),
        ("vm_state".to_string(), "ACTIVE".to_string()),
    ]);
    for (k, v) in &config.query_params {
        params.insert(k.clone(), v.clone());
    }
    for (k, v) in parse_params(payload)? {
        params.insert(k, v);
    }
    Ok(params)
}

#[async_trait]
impl Backend for OpenStackBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn prefix(&self) -> char {
        PREFIX
    }

    fn validate(&self, payload: &str) -> Result<()> {
        parse_params(payload).map(|_| ())
    }

    async fn resolve(&self, payload: &str) -> Result<NodeSet> {
        let mut params = merged_params(&self.config, payload)?;
        let project = params.remove("project");

        let (token, compute_url) = self.authenticate(project.as_deref()).await?;

        let mut url = url::Url::parse(&format!("{compute_url}/servers/detail"))
            .map_err(|e| Error::BackendUnreachable {
                backend: BACKEND_NAME,
                message: format!("invalid compute endpoint: {e}"),
            })?;
        for (k, v) in &params {
            url.query_pairs_mut().append_pair(k, v);
        }
        debug!(url = %url, "OpenStack server listing");

        let response = self
            .client
            .get(url)
            .header("X-Auth-Token", &token)
            .header("X-OpenStack-Nova-API-Version", &self.config.nova_api_version)
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::BackendUnreachable {
                backend: BACKEND_NAME,
                message: format!("Nova HTTP {status}: {text}"),
            });
        }

        let body: ServersResponse = response.json().await.map_err(connection_error)?;
        let nodes: NodeSet = body
            .servers
            .iter()
            .map(|server| self.fqdn(&server.name))
            .collect();
        debug!(hosts = nodes.len(), "OpenStack query resolved");
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert!(parse_params("").unwrap().is_empty());
        assert!(parse_params("*").unwrap().is_empty());

        let params = parse_params("project:deployment name:web").unwrap();
        assert_eq!(params["project"], "deployment");
        assert_eq!(params["name"], "web");
    }

    #[test]
    fn test_parse_params_errors() {
        assert!(parse_params("lonely").is_err());
        assert!(parse_params("key:").is_err());
        assert!(parse_params(":value").is_err());
    }

    #[test]
    fn test_merged_params_precedence() {
        let mut config = OpenStackConfig::default();
        config
            .query_params
            .insert("status".to_string(), "SHUTOFF".to_string());

        let params = merged_params(&config, "vm_state:BUILDING").unwrap();
        // config overrides the default, payload overrides both
        assert_eq!(params["status"], "SHUTOFF");
        assert_eq!(params["vm_state"], "BUILDING");
    }

    #[test]
    fn test_merged_params_defaults() {
        let params = merged_params(&OpenStackConfig::default(), "*").unwrap();
        assert_eq!(params["status"], "ACTIVE");
        assert_eq!(params["vm_state"], "ACTIVE");
    }

    #[test]
    fn test_fqdn() {
        let mut config = OpenStackConfig::default();
        config.domain_suffix = "cloud.example.org".to_string();
        let backend = OpenStackBackend::new(config).unwrap();
        assert_eq!(backend.fqdn("web1"), "web1.cloud.example.org");

        let backend = OpenStackBackend::new(OpenStackConfig::default()).unwrap();
        assert_eq!(backend.fqdn("web1"), "web1");
    }
}
