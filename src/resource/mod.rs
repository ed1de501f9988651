//! Resource layer
//!
//! Turns provider payloads into canonical records and drives asynchronous
//! operations to a stable state.
//!
//! # Architecture
//!
//! - [`fields`] - Alias-aware field extraction shared by every normalizer
//! - [`status`] - Provider status strings to [`LifecycleState`]
//! - [`catalog`] - Volume type catalog and its per-scope cache
//! - [`converge`] - Polling and conflict-retry loops with named budgets
//! - [`pool`] - Bounded worker pool for background listings
//! - [`volume`], [`image`], [`floating_ip`] - Per-resource adapters

pub mod catalog;
pub mod converge;
pub mod fields;
pub mod floating_ip;
pub mod image;
pub mod platform;
pub mod pool;
pub mod server;
pub mod status;
pub mod volume;

#[cfg(test)]
pub(crate) mod fake;

pub use catalog::{CatalogCache, CatalogScope, Product, ProductCatalog, StorageClass};
pub use converge::{retry_on_conflict, wait_until, ConvergenceBudget, Timeouts};
pub use floating_ip::{FloatingAddress, FloatingIpAdapter, IpVersion};
pub use image::{ImageAdapter, ImageCaptureOptions, ImageClass, ImageFilter, MachineImage};
pub use platform::{Architecture, Platform};
pub use pool::{ListingHandle, ListingPool};
pub use status::{classify, LifecycleState, ResourceStatus};
pub use volume::{Volume, VolumeAdapter, VolumeCapabilities, VolumeCreateOptions, VolumeFilter};
