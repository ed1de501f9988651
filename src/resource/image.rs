//! Machine images (Nova image API)

use super::converge::{retry_on_conflict, wait_until, Timeouts};
use super::fields::{unwrap_envelope, Fields};
use super::platform::{Architecture, Platform};
use super::pool::{ListingHandle, ListingPool};
use super::server::{fetch_server, SERVERS};
use super::status::{classify, LifecycleState, ResourceStatus};
use crate::error::{CloudError, Result};
use crate::openstack::{ProviderContext, Service, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const KIND: &str = "image";
const IMAGES: &str = "/images";

/// Owner reported for provider-supplied base images
pub const PUBLIC_OWNER: &str = "--public--";

const ARCHITECTURE_KEYS: &[&str] = &[
    "arch",
    "architecture",
    "org.openstack__1__architecture",
    "com.hp__1__architecture",
];

/// Canonical image record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
    pub state: LifecycleState,
    pub region_id: String,
    pub data_center_id: String,
    pub owner_id: String,
    pub architecture: Architecture,
    pub platform: Platform,
    pub minimum_disk_gib: Option<u64>,
    pub tags: BTreeMap<String, String>,
}

/// Kind of image; Nova only serves machine images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageClass {
    #[default]
    Machine,
    Kernel,
    Ramdisk,
}

fn owner_from_metadata(metadata: &BTreeMap<String, String>, context: &ProviderContext) -> String {
    if let Some(owner) = metadata.get("owner") {
        return owner.clone();
    }
    match metadata.get("image_type").map(String::as_str) {
        Some("base") => PUBLIC_OWNER.to_string(),
        _ => context.tenant_id.clone(),
    }
}

/// Convert one Nova image object into a [`MachineImage`].
pub fn normalize_image(raw: &Value, context: &ProviderContext) -> Result<Option<MachineImage>> {
    let f = Fields::new(KIND, raw)?;

    let Some(id) = f.id(&["id"])? else {
        return Ok(None);
    };
    let metadata = f.string_map("metadata")?;

    let name = f.string(&["name"])?.unwrap_or_else(|| id.clone());
    let description = match f.string(&["description"])? {
        Some(d) => d,
        None => metadata
            .get("org.dasein.description")
            .cloned()
            .unwrap_or_else(|| name.clone()),
    };
    let created_at = f.timestamp(&["created", "created_at"])?;
    let state = f
        .string(&["status"])?
        .map(|s| classify(&s))
        .unwrap_or_default();

    let architecture = ARCHITECTURE_KEYS
        .iter()
        .find_map(|k| metadata.get(*k))
        .map(|hint| Architecture::guess(hint))
        .unwrap_or_default();

    let mut platform = metadata
        .get("org.dasein.platform")
        .and_then(|p| Platform::from_name(p))
        .unwrap_or_default();
    if let Some(os_type) = metadata.get("os_type") {
        platform = platform.refine(Platform::guess(os_type));
    }
    platform = platform.refine(Platform::guess(&format!("{} {}", name, description)));

    Ok(Some(MachineImage {
        id,
        name,
        description,
        created_at,
        state,
        region_id: context.region_id.clone(),
        data_center_id: context.data_center_id(),
        owner_id: owner_from_metadata(&metadata, context),
        architecture,
        platform,
        minimum_disk_gib: f.u64(&["minDisk", "OS-EXT-IMG-SIZE:size"])?,
        tags: metadata,
    }))
}

/// Optional criteria for image listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    pub owner_id: Option<String>,
    pub platform: Option<Platform>,
    pub architecture: Option<Architecture>,
    /// Case-insensitive substring of the image name
    pub name_contains: Option<String>,
}

impl ImageFilter {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, image: &MachineImage) -> bool {
        if let Some(owner) = &self.owner_id {
            if &image.owner_id != owner {
                return false;
            }
        }
        if self.platform.is_some_and(|p| p != image.platform) {
            return false;
        }
        if self.architecture.is_some_and(|a| a != image.architecture) {
            return false;
        }
        match &self.name_contains {
            Some(needle) => image.name.to_lowercase().contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

/// Parameters for capturing an image from a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCaptureOptions {
    pub server_id: String,
    pub name: String,
    pub description: String,
}

impl ImageCaptureOptions {
    pub fn new(server_id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Clone)]
pub struct ImageAdapter {
    transport: Arc<dyn Transport>,
    context: ProviderContext,
    pool: ListingPool,
    timeouts: Timeouts,
}

impl ImageAdapter {
    pub fn new(transport: Arc<dyn Transport>, context: ProviderContext, pool: ListingPool, timeouts: Timeouts) -> Self {
        Self {
            transport,
            context,
            pool,
            timeouts,
        }
    }

    pub async fn is_subscribed(&self) -> Result<bool> {
        self.transport.has_collection(Service::Compute, IMAGES).await
    }

    async fn fetch_raw(&self, image_id: &str) -> Result<Option<Value>> {
        let Some(body) = self
            .transport
            .get_resource(Service::Compute, IMAGES, Some(image_id))
            .await?
        else {
            return Ok(None);
        };
        Ok(unwrap_envelope(KIND, &body, "image")?.cloned())
    }

    pub async fn get(&self, image_id: &str) -> Result<Option<MachineImage>> {
        match self.fetch_raw(image_id).await? {
            Some(raw) => normalize_image(&raw, &self.context),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<MachineImage>> {
        let Some(body) = self.transport.get_resource(Service::Compute, IMAGES, None).await? else {
            return Ok(Vec::new());
        };
        let mut images = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("images")?.into_iter().flatten() {
            images.extend(normalize_image(raw, &self.context)?);
        }
        Ok(images)
    }

    /// Images matching `filter`; without an owner criterion only the
    /// tenant's own images are returned
    pub async fn list(&self, filter: Option<&ImageFilter>) -> Result<Vec<MachineImage>> {
        let mut filter = filter.cloned().unwrap_or_default();
        if filter.owner_id.is_none() {
            filter.owner_id = Some(self.context.tenant_id.clone());
        }
        let mut images = self.all().await?;
        images.retain(|i| filter.matches(i));
        Ok(images)
    }

    /// Images owned by anyone but the tenant
    pub async fn search_public(&self, filter: &ImageFilter) -> Result<Vec<MachineImage>> {
        let mut images = self.all().await?;
        images.retain(|i| i.owner_id != self.context.tenant_id && filter.matches(i));
        Ok(images)
    }

    pub fn list_concurrently(&self, filter: Option<ImageFilter>) -> ListingHandle<Vec<MachineImage>> {
        let adapter = self.clone();
        self.pool
            .submit(async move { adapter.list(filter.as_ref()).await })
    }

    /// Status of the tenant's own images of the given class
    pub async fn list_status(&self, class: ImageClass) -> Result<Vec<ResourceStatus>> {
        if class != ImageClass::Machine {
            return Ok(Vec::new());
        }
        let Some(body) = self.transport.get_resource(Service::Compute, IMAGES, None).await? else {
            return Ok(Vec::new());
        };

        let mut statuses = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("images")?.into_iter().flatten() {
            let f = Fields::new(KIND, raw)?;
            let Some(id) = f.id(&["id"])? else {
                continue;
            };
            let owner = owner_from_metadata(&f.string_map("metadata")?, &self.context);
            if owner != self.context.tenant_id {
                continue;
            }
            let state = f
                .string(&["status"])?
                .map(|s| classify(&s))
                .unwrap_or_default();
            statuses.push(ResourceStatus::new(id, state));
        }
        Ok(statuses)
    }

    pub async fn is_shared_with_public(&self, image_id: &str) -> Result<bool> {
        Ok(self
            .get(image_id)
            .await?
            .is_some_and(|i| i.owner_id != self.context.tenant_id))
    }

    /// Canonical reference of an image: its `self` link, else the first link
    pub async fn image_ref(&self, image_id: &str) -> Result<Option<String>> {
        let Some(raw) = self.fetch_raw(image_id).await? else {
            return Ok(None);
        };
        let f = Fields::new(KIND, &raw)?;

        let mut fallback = None;
        for link in f.objects("links")? {
            let href = link.string(&["href"])?;
            if link.string(&["rel"])?.as_deref() == Some("self") {
                return Ok(href);
            }
            if fallback.is_none() {
                fallback = href;
            }
        }
        Ok(fallback)
    }

    /// Snapshot a server into a new image.
    ///
    /// Waits for the server to be free of other snapshots first, then waits
    /// for the new image to become visible when the provider only answers
    /// with its location.
    pub async fn capture(&self, options: &ImageCaptureOptions) -> Result<MachineImage> {
        let server_id = options.server_id.as_str();
        let server = wait_until(
            || fetch_server(self.transport.as_ref(), server_id),
            |s| s.is_some_and(|s| s.ready_for_capture()),
            self.timeouts.capture_precondition,
        )
        .await
        .ok_or_else(|| CloudError::not_found("server", server_id))?;

        if !server.ready_for_capture() {
            tracing::warn!("Server {} still busy, capturing anyway", server_id);
        }

        let mut metadata = Map::new();
        metadata.insert("org.dasein.description".into(), json!(options.description));
        if server.platform != Platform::Unknown {
            metadata.insert("org.dasein.platform".into(), json!(server.platform.as_str()));
        }
        let body = json!({
            "createImage": {
                "name": options.name,
                "metadata": metadata,
            }
        });

        let reply = self
            .transport
            .post_resource(Service::Compute, SERVERS, Some(server_id), Some("action"), &body)
            .await?;

        if let Some(reply) = reply {
            let f = Fields::new(KIND, &reply)?;
            if let Some(raw) = unwrap_envelope(KIND, &reply, "image")? {
                if let Some(image) = normalize_image(raw, &self.context)? {
                    tracing::info!("Captured image {} from {}", image.id, server_id);
                    return Ok(image);
                }
            } else if let Some(location) = f.string(&["location"])? {
                let image_id = location.rsplit('/').next().unwrap_or(&location).to_string();
                tracing::debug!("Waiting for image {} to appear", image_id);

                let appeared = wait_until(
                    || self.get(&image_id),
                    |i| i.is_some(),
                    self.timeouts.capture_appear,
                )
                .await;
                if let Some(image) = appeared {
                    tracing::info!("Captured image {} from {}", image.id, server_id);
                    return Ok(image);
                }
            }
        }

        tracing::error!("No image was created by the imaging attempt, and no error was returned");
        Err(CloudError::Communication("No image was created".to_string()))
    }

    pub async fn delete(&self, image_id: &str) -> Result<()> {
        retry_on_conflict(
            || async {
                match self
                    .transport
                    .delete_resource(Service::Compute, IMAGES, image_id, None)
                    .await
                {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            },
            CloudError::is_conflict,
            self.timeouts.image_delete_conflict,
        )
        .await?;

        let last = wait_until(
            || self.get(image_id),
            |i| i.map_or(true, |i| i.state == LifecycleState::Deleted),
            self.timeouts.image_delete,
        )
        .await;

        if let Some(image) = last.filter(|i| i.state != LifecycleState::Deleted) {
            tracing::warn!(
                "Image {} delete accepted but still present: current state - {}",
                image_id,
                image.state
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::converge::ConvergenceBudget;
    use crate::resource::fake::{FakeTransport, Reply};

    fn ctx() -> ProviderContext {
        ProviderContext::new("RegionOne", "tenant-1")
    }

    fn adapter(transport: Arc<FakeTransport>) -> ImageAdapter {
        ImageAdapter::new(
            transport,
            ctx(),
            ListingPool::new(2),
            Timeouts::uniform(ConvergenceBudget::from_secs(15, 60)),
        )
    }

    #[test]
    fn test_owner_inference() {
        let base = json!({"id": "i1", "metadata": {"image_type": "base"}});
        assert_eq!(normalize_image(&base, &ctx()).unwrap().unwrap().owner_id, PUBLIC_OWNER);

        let snap = json!({"id": "i2", "metadata": {"image_type": "snapshot"}});
        assert_eq!(normalize_image(&snap, &ctx()).unwrap().unwrap().owner_id, "tenant-1");

        let owned = json!({"id": "i3", "metadata": {"owner": "acme", "image_type": "base"}});
        assert_eq!(normalize_image(&owned, &ctx()).unwrap().unwrap().owner_id, "acme");

        let bare = json!({"id": "i4"});
        assert_eq!(normalize_image(&bare, &ctx()).unwrap().unwrap().owner_id, "tenant-1");
    }

    #[test]
    fn test_architecture_and_platform() {
        let raw = json!({
            "id": "i5",
            "name": "base image",
            "status": "ACTIVE",
            "metadata": {
                "architecture": null,
                "org.openstack__1__architecture": "i386-32",
                "org.dasein.platform": "UNIX",
                "os_type": "linux"
            }
        });
        let image = normalize_image(&raw, &ctx()).unwrap().unwrap();
        assert_eq!(image.architecture, Architecture::I32);
        assert_eq!(image.platform, Platform::Unix);
        assert_eq!(image.state, LifecycleState::Active);

        let raw = json!({"id": "i6", "name": "Ubuntu 22.04", "metadata": {"org.dasein.platform": "UNIX"}});
        assert_eq!(normalize_image(&raw, &ctx()).unwrap().unwrap().platform, Platform::Ubuntu);

        let raw = json!({"id": "i7", "name": "x", "metadata": {"os_type": "windows"}});
        let image = normalize_image(&raw, &ctx()).unwrap().unwrap();
        assert_eq!(image.platform, Platform::Windows);
        assert_eq!(image.architecture, Architecture::I64);
    }

    #[test]
    fn test_description_and_disk_fallbacks() {
        let raw = json!({
            "id": "i8",
            "name": "golden",
            "created": "2012-10-25T09:22:00Z",
            "OS-EXT-IMG-SIZE:size": 40,
            "metadata": {"org.dasein.description": "golden master", "build": 7}
        });
        let image = normalize_image(&raw, &ctx()).unwrap().unwrap();
        assert_eq!(image.description, "golden master");
        assert_eq!(image.minimum_disk_gib, Some(40));
        assert!(image.created_at.is_some());
        assert_eq!(image.tags.get("build").map(String::as_str), Some("7"));
        assert!(image.tags.contains_key("org.dasein.description"));

        let raw = json!({"id": "i9", "minDisk": 10, "OS-EXT-IMG-SIZE:size": 40});
        let image = normalize_image(&raw, &ctx()).unwrap().unwrap();
        assert_eq!(image.minimum_disk_gib, Some(10));
        assert_eq!(image.name, "i9");
        assert_eq!(image.description, "i9");
    }

    #[test]
    fn test_filter_matches() {
        let image = normalize_image(
            &json!({"id": "i1", "name": "CentOS 7", "metadata": {"owner": "tenant-1"}}),
            &ctx(),
        )
        .unwrap()
        .unwrap();

        assert!(ImageFilter::owned_by("tenant-1").matches(&image));
        assert!(!ImageFilter::owned_by("other").matches(&image));

        let by_name = ImageFilter {
            name_contains: Some("centos".to_string()),
            platform: Some(Platform::CentOs),
            ..Default::default()
        };
        assert!(by_name.matches(&image));
    }

    fn listing() -> Reply {
        Reply::Json(json!({"images": [
            {"id": "mine", "status": "ACTIVE", "metadata": {"image_type": "snapshot"}},
            {"id": "public", "status": "ACTIVE", "metadata": {"image_type": "base"}},
            {"id": "other", "status": "SAVING", "metadata": {"owner": "someone"}},
            {"name": "no id"}
        ]}))
    }

    #[tokio::test]
    async fn test_list_defaults_to_own_images() {
        let transport = Arc::new(FakeTransport::new());
        transport.on("GET compute /images", listing());
        let a = adapter(transport);

        let own: Vec<_> = a.list(None).await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(own, vec!["mine"]);

        let public: Vec<_> = a
            .search_public(&ImageFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(public, vec!["public", "other"]);
    }

    #[tokio::test]
    async fn test_list_status_only_machine_class() {
        let transport = Arc::new(FakeTransport::new());
        transport.on("GET compute /images", listing());
        let a = adapter(transport.clone());

        let statuses = a.list_status(ImageClass::Machine).await.unwrap();
        assert_eq!(statuses, vec![ResourceStatus::new("mine", LifecycleState::Active)]);

        assert!(a.list_status(ImageClass::Kernel).await.unwrap().is_empty());
        assert_eq!(transport.count("GET compute /images"), 1);
    }

    #[tokio::test]
    async fn test_image_ref_prefers_self_link() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on(
                "GET compute /images/i1",
                Reply::Json(json!({"image": {"id": "i1", "links": [
                    {"rel": "bookmark", "href": "http://x/bookmark/i1"},
                    {"rel": "self", "href": "http://x/v2/images/i1"}
                ]}})),
            )
            .on(
                "GET compute /images/i2",
                Reply::Json(json!({"image": {"id": "i2", "links": [{"rel": "bookmark", "href": "http://x/b/i2"}]}})),
            )
            .on("GET compute /images/i3", Reply::Status(404));
        let a = adapter(transport);

        assert_eq!(a.image_ref("i1").await.unwrap().as_deref(), Some("http://x/v2/images/i1"));
        assert_eq!(a.image_ref("i2").await.unwrap().as_deref(), Some("http://x/b/i2"));
        assert_eq!(a.image_ref("i3").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_waits_for_snapshot_then_follows_location() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on(
                "GET compute /servers/srv-1",
                Reply::Json(json!({"server": {"id": "srv-1", "name": "web", "status": "ACTIVE",
                    "OS-EXT-STS:task_state": "image_snapshot"}})),
            )
            .on(
                "GET compute /servers/srv-1",
                Reply::Json(json!({"server": {"id": "srv-1", "name": "web", "status": "ACTIVE",
                    "metadata": {"org.dasein.platform": "DEBIAN"}}})),
            )
            .on(
                "POST compute /servers/srv-1/action",
                Reply::Json(json!({"location": "http://nova/v2/t/images/img-9"})),
            )
            .on("GET compute /images/img-9", Reply::Status(404))
            .on("GET compute /images/img-9", Reply::Json(json!({"image": {"id": "img-9", "status": "SAVING"}})));

        let image = adapter(transport.clone())
            .capture(&ImageCaptureOptions::new("srv-1", "web-snap", "nightly"))
            .await
            .unwrap();

        assert_eq!(image.id, "img-9");
        assert_eq!(transport.count("GET compute /servers/srv-1"), 2);
        let posted = transport.posted("POST compute /servers/srv-1/action");
        assert_eq!(posted[0]["createImage"]["name"], "web-snap");
        assert_eq!(posted[0]["createImage"]["metadata"]["org.dasein.description"], "nightly");
        assert_eq!(posted[0]["createImage"]["metadata"]["org.dasein.platform"], "DEBIAN");
    }

    #[tokio::test]
    async fn test_missing_image_api_is_not_subscribed() {
        let transport = Arc::new(FakeTransport::new());
        transport.on("GET compute /images", Reply::Status(404));
        assert!(!adapter(transport).is_subscribed().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_from_stopped_server_does_not_wait() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on(
                "GET compute /servers/srv-2",
                Reply::Json(json!({"server": {"id": "srv-2", "name": "db", "status": "SHUTOFF",
                    "OS-EXT-STS:task_state": null}})),
            )
            .on(
                "POST compute /servers/srv-2/action",
                Reply::Json(json!({"image": {"id": "img-10", "status": "SAVING"}})),
            );

        let adapter = ImageAdapter::new(transport.clone(), ctx(), ListingPool::new(2), Timeouts::default());
        let started = tokio::time::Instant::now();
        let image = adapter
            .capture(&ImageCaptureOptions::new("srv-2", "db-snap", "cold"))
            .await
            .unwrap();

        assert_eq!(image.id, "img-10");
        assert_eq!(transport.count("GET compute /servers/srv-2"), 1);
        assert_eq!(started.elapsed(), std::time::Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_missing_server_is_not_found() {
        let transport = Arc::new(FakeTransport::new());
        transport.on("GET compute /servers/gone", Reply::Status(404));

        let err = adapter(transport)
            .capture(&ImageCaptureOptions::new("gone", "x", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_capture_without_image_or_location_fails() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on("GET compute /servers/s", Reply::Json(json!({"server": {"id": "s", "status": "ACTIVE"}})))
            .on("POST compute /servers/s/action", Reply::Empty);

        let err = adapter(transport)
            .capture(&ImageCaptureOptions::new("s", "x", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Communication(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_retries_conflict_then_waits_for_gone() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on("DELETE compute /images/i1", Reply::Status(409))
            .on("DELETE compute /images/i1", Reply::Empty)
            .on("GET compute /images/i1", Reply::Json(json!({"image": {"id": "i1", "status": "DELETED"}})));

        adapter(transport.clone()).delete("i1").await.unwrap();
        assert_eq!(transport.count("DELETE compute /images/i1"), 2);
        assert_eq!(transport.count("GET compute /images/i1"), 1);
    }
}
