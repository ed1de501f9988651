//! Service façade
//!
//! Builds the three adapters over one transport, sharing the catalog cache
//! and the listing pool between them.

use crate::openstack::{ProviderContext, Transport};
use crate::resource::{
    CatalogCache, FloatingIpAdapter, ImageAdapter, ListingPool, Timeouts, VolumeAdapter, VolumeCapabilities,
};
use crate::resource::pool::DEFAULT_WORKERS;
use std::sync::Arc;

/// Tunables applied to every adapter
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub capabilities: VolumeCapabilities,
    /// Concurrent background listings; zero is treated as one
    pub workers: usize,
    pub timeouts: Timeouts,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            capabilities: VolumeCapabilities::default(),
            workers: DEFAULT_WORKERS,
            timeouts: Timeouts::default(),
        }
    }
}

impl ServiceSettings {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

pub struct NovaServices {
    volumes: VolumeAdapter,
    images: ImageAdapter,
    floating_ips: FloatingIpAdapter,
    catalogs: Arc<CatalogCache>,
    pool: ListingPool,
}

impl NovaServices {
    pub fn new(transport: Arc<dyn Transport>, context: ProviderContext, settings: ServiceSettings) -> Self {
        let pool = ListingPool::new(settings.workers);
        let catalogs = Arc::new(CatalogCache::new());

        tracing::debug!(
            "Services for tenant {} in {} ({} listing workers)",
            context.tenant_id,
            context.region_id,
            pool.workers()
        );

        Self {
            volumes: VolumeAdapter::new(
                Arc::clone(&transport),
                context.clone(),
                settings.capabilities,
                Arc::clone(&catalogs),
                pool.clone(),
                settings.timeouts,
            ),
            images: ImageAdapter::new(Arc::clone(&transport), context.clone(), pool.clone(), settings.timeouts),
            floating_ips: FloatingIpAdapter::new(transport, context, pool.clone(), settings.timeouts),
            catalogs,
            pool,
        }
    }

    pub fn volumes(&self) -> &VolumeAdapter {
        &self.volumes
    }

    pub fn images(&self) -> &ImageAdapter {
        &self.images
    }

    pub fn floating_ips(&self) -> &FloatingIpAdapter {
        &self.floating_ips
    }

    pub fn pool(&self) -> &ListingPool {
        &self.pool
    }

    /// Forget cached volume types so the next lookup refetches them
    pub async fn refresh_catalogs(&self) {
        self.catalogs.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::fake::{FakeTransport, Reply};
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh_refetches_catalog() {
        let transport = Arc::new(FakeTransport::new());
        transport.on(
            "GET volume /types",
            Reply::Json(json!({"volume_types": [{"id": "1", "name": "standard"}]})),
        );
        let services = NovaServices::new(
            transport.clone(),
            ProviderContext::new("RegionOne", "t"),
            ServiceSettings::default().with_workers(3),
        );

        assert_eq!(services.pool().workers(), 3);
        services.volumes().list_products().await.unwrap();
        services.volumes().list_products().await.unwrap();
        assert_eq!(transport.count("GET volume /types"), 1);

        services.refresh_catalogs().await;
        services.volumes().list_products().await.unwrap();
        assert_eq!(transport.count("GET volume /types"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_listings_share_pool() {
        let transport = Arc::new(FakeTransport::new());
        transport
            .on("GET volume /types", Reply::Json(json!({"volume_types": []})))
            .on("GET volume /volumes", Reply::Json(json!({"volumes": [{"id": "v1"}]})))
            .on("GET compute /images", Reply::Json(json!({"images": []})))
            .on("GET compute /os-floating-ips", Reply::Json(json!({"floating_ips": []})));
        let services = NovaServices::new(transport, ProviderContext::new("r", "t"), ServiceSettings::default());

        let volumes = services.volumes().list_concurrently(None);
        let images = services.images().list_concurrently(None);
        let ips = services
            .floating_ips()
            .list_concurrently(crate::resource::IpVersion::V4, false);

        assert_eq!(volumes.join().await.unwrap().len(), 1);
        assert!(images.join().await.unwrap().is_empty());
        assert!(ips.join().await.unwrap().is_empty());
    }
}
