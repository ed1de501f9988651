//! Volume product catalog
//!
//! Cinder volume types are exposed as products. The catalog for a
//! tenant/region scope is fetched lazily, cached for the lifetime of the
//! adapter, and only ever replaced wholesale.

use super::fields::Fields;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

const KIND: &str = "volume type";

/// Storage medium of a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageClass {
    Ssd,
    Hdd,
}

/// One selectable volume type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub display_name: String,
    pub storage_class: StorageClass,
    pub extra_specs: BTreeMap<String, String>,
}

impl Product {
    pub fn new(
        product_id: impl Into<String>,
        display_name: impl Into<String>,
        extra_specs: BTreeMap<String, String>,
    ) -> Self {
        let display_name = display_name.into();
        let storage_class = guess_storage_class(&display_name, &extra_specs);
        Self {
            product_id: product_id.into(),
            display_name,
            storage_class,
            extra_specs,
        }
    }
}

/// Guess the storage medium of a volume type.
///
/// This is a heuristic, not provider truth: Cinder has no standard field for
/// the medium, so a type counts as SSD when its name or any string extra-spec
/// value mentions "ssd". Everything else is assumed to be HDD.
pub fn guess_storage_class(display_name: &str, extra_specs: &BTreeMap<String, String>) -> StorageClass {
    let mentions_ssd = |s: &str| s.to_lowercase().contains("ssd");

    if mentions_ssd(display_name) || extra_specs.values().any(|v| mentions_ssd(v)) {
        StorageClass::Ssd
    } else {
        StorageClass::Hdd
    }
}

/// Immutable set of products for one scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductCatalog {
    products: Vec<Product>,
}

impl ProductCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Build from a `{"volume_types": [...]}` listing.
    /// Entries without both an id and a name are skipped.
    pub fn from_types_response(body: &Value) -> Result<Self> {
        let fields = Fields::new(KIND, body)?;
        let mut products = Vec::new();

        for entry in fields.objects("volume_types")? {
            let (Some(id), Some(name)) = (entry.id(&["id"])?, entry.string(&["name"])?) else {
                tracing::debug!("Skipping volume type without id or name");
                continue;
            };
            products.push(Product::new(id, name, string_specs(&entry)?));
        }

        Ok(Self { products })
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Resolve a requested type.
    ///
    /// Matches on product id first, then on display name: pre-Grizzly Cinder
    /// echoes the type's name where its id is expected.
    pub fn resolve(&self, requested: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.product_id == requested)
            .or_else(|| self.products.iter().find(|p| p.display_name == requested))
    }
}

/// Extra specs, keeping only string values
fn string_specs(entry: &Fields<'_>) -> Result<BTreeMap<String, String>> {
    let Some(specs) = entry.object("extra_specs")? else {
        return Ok(BTreeMap::new());
    };
    Ok(specs
        .entries()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect())
}

/// Cache key: catalogs are per tenant and region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogScope {
    pub tenant_id: String,
    pub region_id: String,
}

/// Shared, read-mostly cache of catalogs keyed by scope.
///
/// A miss rebuilds the whole catalog outside the lock; concurrent misses may
/// both rebuild and the last writer wins.
#[derive(Debug, Default)]
pub struct CatalogCache {
    entries: RwLock<HashMap<CatalogScope, Arc<ProductCatalog>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, scope: &CatalogScope) -> Option<Arc<ProductCatalog>> {
        self.entries.read().await.get(scope).cloned()
    }

    pub async fn get_or_build<F, Fut>(&self, scope: &CatalogScope, build: F) -> Result<Arc<ProductCatalog>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ProductCatalog>>,
    {
        if let Some(cached) = self.get(scope).await {
            return Ok(cached);
        }

        let catalog = Arc::new(build().await?);
        tracing::debug!(
            "Cached {} products for {}/{}",
            catalog.products().len(),
            scope.tenant_id,
            scope.region_id
        );
        self.entries
            .write()
            .await
            .insert(scope.clone(), Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Drop every cached catalog
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
