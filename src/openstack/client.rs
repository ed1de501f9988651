//! OpenStack Client
//!
//! Main client for the compute and block-storage APIs, combining the
//! configured endpoints, the auth token and the HTTP functionality.

use super::http::NovaHttpClient;
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use url::Url;

/// Control-plane service a request is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Nova: servers, images, floating IPs
    Compute,
    /// Cinder: volumes and volume types
    Volume,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller's current operating scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    pub region_id: String,
    pub tenant_id: String,
}

impl ProviderContext {
    pub fn new(region_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Data center every resource is reported in.
    ///
    /// Always `<region>-a`: any availability zone reported by the provider is
    /// ignored, so a multi-zone deployment reports everything in one zone.
    pub fn data_center_id(&self) -> String {
        format!("{}-a", self.region_id)
    }
}

/// Request primitives the resource adapters are built on
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a collection (`id == None`) or a single resource.
    /// A 404 is reported as `Ok(None)`.
    async fn get_resource(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
    ) -> Result<Option<Value>>;

    /// POST a JSON body to a collection, resource, or resource sub-path
    async fn post_resource(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
        sub_path: Option<&str>,
        body: &Value,
    ) -> Result<Option<Value>>;

    async fn delete_resource(
        &self,
        service: Service,
        base_path: &str,
        id: &str,
        sub_path: Option<&str>,
    ) -> Result<()>;

    /// Whether the collection at `base_path` is offered; a 404 means the
    /// tenant is not subscribed to it
    async fn has_collection(&self, service: Service, base_path: &str) -> Result<bool> {
        match self.get_resource(service, base_path, None).await {
            Ok(body) => Ok(body.is_some()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Main OpenStack client
#[derive(Clone)]
pub struct NovaClient {
    http: NovaHttpClient,
    compute_endpoint: Url,
    volume_endpoint: Url,
    token: String,
}

impl NovaClient {
    /// Create a new client for the given endpoints.
    ///
    /// Endpoints are the tenant-scoped service roots, e.g.
    /// `https://nova.example.com/v2/<tenant>`.
    pub fn new(compute_endpoint: &str, volume_endpoint: &str, token: &str) -> Result<Self> {
        let http = NovaHttpClient::new()?;

        Ok(Self {
            http,
            compute_endpoint: parse_endpoint(compute_endpoint)?,
            volume_endpoint: parse_endpoint(volume_endpoint)?,
            token: token.to_string(),
        })
    }

    fn endpoint(&self, service: Service) -> &Url {
        match service {
            Service::Compute => &self.compute_endpoint,
            Service::Volume => &self.volume_endpoint,
        }
    }

    /// Build a resource URL: `{endpoint}{base_path}[/{id}][/{sub_path}]`
    pub fn resource_url(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
        sub_path: Option<&str>,
    ) -> String {
        let root = self.endpoint(service).as_str().trim_end_matches('/');
        let mut url = format!("{}/{}", root, base_path.trim_matches('/'));

        if let Some(id) = id {
            url.push('/');
            url.push_str(&urlencoding::encode(id));
        }
        if let Some(sub_path) = sub_path {
            for segment in sub_path.split('/').filter(|s| !s.is_empty()) {
                url.push('/');
                url.push_str(&urlencoding::encode(segment));
            }
        }
        url
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| CloudError::Internal(format!("Invalid endpoint '{}': {}", raw, e)))
}

#[async_trait]
impl Transport for NovaClient {
    async fn get_resource(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
    ) -> Result<Option<Value>> {
        let url = self.resource_url(service, base_path, id, None);
        match self.http.get(&url, &self.token).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn post_resource(
        &self,
        service: Service,
        base_path: &str,
        id: Option<&str>,
        sub_path: Option<&str>,
        body: &Value,
    ) -> Result<Option<Value>> {
        let url = self.resource_url(service, base_path, id, sub_path);
        self.http.post(&url, &self.token, body).await
    }

    async fn delete_resource(
        &self,
        service: Service,
        base_path: &str,
        id: &str,
        sub_path: Option<&str>,
    ) -> Result<()> {
        let url = self.resource_url(service, base_path, Some(id), sub_path);
        self.http.delete(&url, &self.token).await
    }
}
