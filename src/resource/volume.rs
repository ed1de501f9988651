//! Block-storage volumes (Cinder)
//!
//! Normalizes Cinder volume payloads, which mix legacy camelCase fields
//! (`displayName`, `createdAt`) with the snake_case fields of later API
//! versions, and drives volume create/delete/attach through the convergence
//! primitives.

use super::catalog::{CatalogCache, CatalogScope, Product, ProductCatalog, StorageClass};
use super::converge::{retry_on_conflict, wait_until, Timeouts};
use super::fields::{unwrap_envelope, Fields};
use super::pool::{ListingHandle, ListingPool};
use super::status::{classify, LifecycleState, ResourceStatus};
use crate::error::{CloudError, Result};
use crate::openstack::{ProviderContext, Service, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const KIND: &str = "volume";
const VOLUMES: &str = "/volumes";
const TYPES: &str = "/types";
const SERVERS: &str = "/servers";
const ATTACHMENTS: &str = "os-volume_attachments";

/// Canonical volume record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `None` when the provider did not report a usable creation time
    pub created_at: Option<DateTime<Utc>>,
    pub state: LifecycleState,
    pub region_id: String,
    pub data_center_id: String,
    pub size_gib: u64,
    pub product_id: Option<String>,
    /// `None` when the volume type did not match a catalog entry
    pub storage_class: Option<StorageClass>,
    pub snapshot_id: Option<String>,
    pub attached_server_id: Option<String>,
    pub attached_device: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Convert one Cinder volume object into a [`Volume`].
///
/// Returns `Ok(None)` when the payload carries no id.
pub fn normalize_volume(raw: &Value, context: &ProviderContext, catalog: &ProductCatalog) -> Result<Option<Volume>> {
    let f = Fields::new(KIND, raw)?;

    let Some(id) = f.id(&["id"])? else {
        return Ok(None);
    };
    let name = f
        .string(&["displayName", "display_name", "name"])?
        .unwrap_or_else(|| id.clone());
    let description = f
        .string(&["displayDescription", "display_description", "description"])?
        .unwrap_or_else(|| name.clone());
    let created_at = f.timestamp(&["createdAt", "created_at"])?;
    let state = f
        .string(&["status"])?
        .map(|s| classify(&s))
        .unwrap_or_default();
    let size_gib = f.u64(&["size"])?.unwrap_or(0);
    let snapshot_id = f.id(&["snapshotId", "snapshot_id"])?;

    let mut attached_server_id = None;
    let mut attached_device = None;
    for attachment in f.objects("attachments")? {
        if let Some(server) = attachment.id(&["serverId", "server_id"])? {
            attached_server_id = Some(server);
            attached_device = attachment.string(&["device"])?;
            break;
        }
    }

    let (product_id, storage_class) = match f.string(&["volume_type", "volumeType"])? {
        Some(requested) => match catalog.resolve(&requested) {
            Some(product) => (Some(product.product_id.clone()), Some(product.storage_class)),
            None => (Some(requested), None),
        },
        None => (None, None),
    };

    Ok(Some(Volume {
        id,
        name,
        description,
        created_at,
        state,
        region_id: context.region_id.clone(),
        data_center_id: context.data_center_id(),
        size_gib,
        product_id,
        storage_class,
        snapshot_id,
        attached_server_id,
        attached_device,
        metadata: f.string_map("metadata")?,
    }))
}

/// Status-only view of a volume payload
pub fn volume_status(raw: &Value) -> Result<Option<ResourceStatus>> {
    let f = Fields::new(KIND, raw)?;
    let Some(id) = f.id(&["id"])? else {
        return Ok(None);
    };
    let state = f
        .string(&["status"])?
        .map(|s| classify(&s))
        .unwrap_or_default();
    Ok(Some(ResourceStatus::new(id, state)))
}

/// Provider size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCapabilities {
    pub minimum_size_gib: u64,
    pub maximum_size_gib: Option<u64>,
}

impl Default for VolumeCapabilities {
    fn default() -> Self {
        Self {
            minimum_size_gib: 1,
            maximum_size_gib: Some(1024),
        }
    }
}

impl VolumeCapabilities {
    /// Limits with the maximum checked against the minimum
    pub fn new(minimum_size_gib: u64, maximum_size_gib: Option<u64>) -> Result<Self> {
        if let Some(max) = maximum_size_gib {
            if max < minimum_size_gib {
                return Err(CloudError::InvalidState(format!(
                    "maximum volume size {} GiB is below the minimum of {} GiB",
                    max, minimum_size_gib
                )));
            }
        }
        Ok(Self {
            minimum_size_gib,
            maximum_size_gib,
        })
    }

    /// Size actually submitted for a requested size
    pub fn clamp_size(&self, requested: Option<u64>) -> u64 {
        match requested {
            None => self.minimum_size_gib,
            Some(size) if size < self.minimum_size_gib => self.minimum_size_gib,
            Some(size) => match self.maximum_size_gib {
                Some(max) if size > max => max,
                _ => size,
            },
        }
    }
}

/// Parameters for creating a volume
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeCreateOptions {
    pub name: String,
    pub description: String,
    pub size_gib: Option<u64>,
    pub snapshot_id: Option<String>,
    pub product_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Network-attached (NFS) volumes are not offered by Cinder
    pub network_id: Option<String>,
}

impl VolumeCreateOptions {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size_gib: u64) -> Self {
        self.size_gib = Some(size_gib);
        self
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn to_request(&self, size_gib: u64) -> Value {
        let mut volume = Map::new();
        volume.insert("display_name".into(), json!(self.name));
        volume.insert("display_description".into(), json!(self.description));
        volume.insert("size".into(), json!(size_gib));
        if let Some(snapshot) = &self.snapshot_id {
            volume.insert("snapshot_id".into(), json!(snapshot));
        }
        if !self.metadata.is_empty() {
            volume.insert("metadata".into(), json!(self.metadata));
        }
        if let Some(product) = &self.product_id {
            volume.insert("volume_type".into(), json!(product));
        }
        json!({ "volume": volume })
    }
}

/// Optional criteria for [`VolumeAdapter::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilter {
    pub attached_to: Option<String>,
    pub state: Option<LifecycleState>,
}

impl VolumeFilter {
    pub fn matches(&self, volume: &Volume) -> bool {
        if let Some(server) = &self.attached_to {
            if volume.attached_server_id.as_deref() != Some(server.as_str()) {
                return false;
            }
        }
        self.state.map_or(true, |s| s == volume.state)
    }
}

/// Volume operations against Cinder
#[derive(Clone)]
pub struct VolumeAdapter {
    transport: Arc<dyn Transport>,
    context: ProviderContext,
    capabilities: VolumeCapabilities,
    catalogs: Arc<CatalogCache>,
    pool: ListingPool,
    timeouts: Timeouts,
}

impl VolumeAdapter {
    pub fn new(
        transport: Arc<dyn Transport>,
        context: ProviderContext,
        capabilities: VolumeCapabilities,
        catalogs: Arc<CatalogCache>,
        pool: ListingPool,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            transport,
            context,
            capabilities,
            catalogs,
            pool,
            timeouts,
        }
    }

    /// Whether the volume service answers for this tenant
    pub async fn is_subscribed(&self) -> Result<bool> {
        self.transport.has_collection(Service::Volume, TYPES).await
    }

    pub fn capabilities(&self) -> &VolumeCapabilities {
        &self.capabilities
    }

    fn scope(&self) -> CatalogScope {
        CatalogScope {
            tenant_id: self.context.tenant_id.clone(),
            region_id: self.context.region_id.clone(),
        }
    }

    /// Volume type catalog for the current scope, fetched on first use
    pub async fn catalog(&self) -> Result<Arc<ProductCatalog>> {
        self.catalogs
            .get_or_build(&self.scope(), || async {
                match self.transport.get_resource(Service::Volume, TYPES, None).await? {
                    Some(body) => ProductCatalog::from_types_response(&body),
                    None => Ok(ProductCatalog::default()),
                }
            })
            .await
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.catalog().await?.products().to_vec())
    }

    pub async fn get(&self, volume_id: &str) -> Result<Option<Volume>> {
        let Some(body) = self
            .transport
            .get_resource(Service::Volume, VOLUMES, Some(volume_id))
            .await?
        else {
            return Ok(None);
        };
        let Some(raw) = unwrap_envelope(KIND, &body, "volume")? else {
            return Ok(None);
        };
        let catalog = self.catalog().await?;
        normalize_volume(raw, &self.context, &catalog)
    }

    pub async fn list(&self, filter: Option<&VolumeFilter>) -> Result<Vec<Volume>> {
        let catalog = self.catalog().await?;
        let Some(body) = self.transport.get_resource(Service::Volume, VOLUMES, None).await? else {
            return Ok(Vec::new());
        };

        let mut volumes = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("volumes")?.into_iter().flatten() {
            if let Some(volume) = normalize_volume(raw, &self.context, &catalog)? {
                if filter.map_or(true, |f| f.matches(&volume)) {
                    volumes.push(volume);
                }
            }
        }
        Ok(volumes)
    }

    /// Run [`VolumeAdapter::list`] on the listing pool
    pub fn list_concurrently(&self, filter: Option<VolumeFilter>) -> ListingHandle<Vec<Volume>> {
        let adapter = self.clone();
        self.pool
            .submit(async move { adapter.list(filter.as_ref()).await })
    }

    pub async fn list_status(&self) -> Result<Vec<ResourceStatus>> {
        let Some(body) = self.transport.get_resource(Service::Volume, VOLUMES, None).await? else {
            return Ok(Vec::new());
        };

        let mut statuses = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("volumes")?.into_iter().flatten() {
            statuses.extend(volume_status(raw)?);
        }
        Ok(statuses)
    }

    /// Create a volume and return its id without waiting for it to settle
    pub async fn create(&self, options: &VolumeCreateOptions) -> Result<String> {
        if options.network_id.is_some() {
            return Err(CloudError::UnsupportedOperation(
                "Creating network-attached volumes is not supported".to_string(),
            ));
        }

        let size = self.capabilities.clamp_size(options.size_gib);
        if Some(size) != options.size_gib {
            tracing::debug!("Adjusted requested size {:?} to {} GiB", options.size_gib, size);
        }

        let reply = self
            .transport
            .post_resource(Service::Volume, VOLUMES, None, None, &options.to_request(size))
            .await?;

        if let Some(body) = reply {
            if let Some(raw) = unwrap_envelope(KIND, &body, "volume")? {
                let catalog = self.catalog().await?;
                if let Some(volume) = normalize_volume(raw, &self.context, &catalog)? {
                    tracing::info!("Created volume {} ({} GiB)", volume.id, volume.size_gib);
                    return Ok(volume.id);
                }
            }
        }

        tracing::error!("No volume was created by the create attempt, and no error was returned");
        Err(CloudError::not_found(
            KIND,
            options.product_id.clone().unwrap_or_else(|| options.name.clone()),
        ))
    }

    /// Create a volume and wait until it leaves `Pending`.
    ///
    /// A volume that settles in `Error` is reported as `InvalidState`. If the
    /// budget runs out the last observed record is returned as-is.
    pub async fn create_and_wait(&self, options: &VolumeCreateOptions) -> Result<Option<Volume>> {
        let volume_id = self.create(options).await?;

        let settled = wait_until(
            || self.get(&volume_id),
            |v| v.is_some_and(|v| v.state.is_terminal()),
            self.timeouts.volume_create,
        )
        .await;

        match settled {
            Some(v) if v.state == LifecycleState::Error => Err(CloudError::InvalidState(format!(
                "volume {} entered the ERROR state",
                v.id
            ))),
            other => Ok(other),
        }
    }

    /// Delete a volume and wait for it to disappear.
    ///
    /// Returns normally when the deletion budget runs out; the remaining state
    /// is logged.
    pub async fn delete(&self, volume_id: &str) -> Result<()> {
        let Some(current) = self.get(volume_id).await? else {
            return Ok(());
        };

        if current.state == LifecycleState::Pending {
            let settled = wait_until(
                || self.get(volume_id),
                |v| v.map_or(true, |v| v.state.is_terminal()),
                self.timeouts.volume_settle,
            )
            .await;
            if let Some(v) = &settled {
                if v.state == LifecycleState::Pending {
                    tracing::warn!("Volume {} still pending, deleting anyway", volume_id);
                }
            }
        }

        retry_on_conflict(
            || async {
                match self
                    .transport
                    .delete_resource(Service::Volume, VOLUMES, volume_id, None)
                    .await
                {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            },
            CloudError::is_conflict,
            self.timeouts.volume_delete,
        )
        .await?;

        let last = wait_until(
            || self.get(volume_id),
            |v| v.map_or(true, |v| v.state == LifecycleState::Deleted),
            self.timeouts.volume_delete,
        )
        .await;

        if let Some(v) = last.filter(|v| v.state != LifecycleState::Deleted) {
            tracing::warn!(
                "Volume {} delete accepted but still present: current state - {}",
                volume_id,
                v.state
            );
        }
        Ok(())
    }

    /// Attach a volume to a server.
    ///
    /// Does not poll: a later `get` reflects the attachment once the provider
    /// has applied it.
    pub async fn attach(&self, volume_id: &str, server_id: &str, device: &str) -> Result<()> {
        let body = json!({
            "volumeAttachment": {
                "volumeId": volume_id,
                "device": device,
            }
        });
        let reply = self
            .transport
            .post_resource(Service::Compute, SERVERS, Some(server_id), Some(ATTACHMENTS), &body)
            .await?;

        if reply.is_none() {
            return Err(CloudError::Communication("No response from the cloud".to_string()));
        }
        tracing::info!("Attached volume {} to {} as {}", volume_id, server_id, device);
        Ok(())
    }

    /// Detach a volume from whichever server holds it
    pub async fn detach(&self, volume_id: &str, force: bool) -> Result<()> {
        let volume = self
            .get(volume_id)
            .await?
            .ok_or_else(|| CloudError::not_found(KIND, volume_id))?;

        let Some(server_id) = volume.attached_server_id else {
            return Err(CloudError::InvalidState(format!(
                "volume {} is not attached",
                volume_id
            )));
        };
        if force {
            tracing::debug!("Nova has no forced detach; detaching {} normally", volume_id);
        }

        let attachment = format!("{}/{}", ATTACHMENTS, volume_id);
        self.transport
            .delete_resource(Service::Compute, SERVERS, &server_id, Some(&attachment))
            .await?;
        tracing::info!("Detached volume {} from {}", volume_id, server_id);
        Ok(())
    }
}
