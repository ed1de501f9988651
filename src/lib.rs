//! novaconverge
//!
//! Block volumes, machine images and floating IPs on an OpenStack Nova /
//! Cinder control plane, normalized into provider-neutral records and driven
//! to a stable state with bounded polling.

pub mod error;
pub mod openstack;
pub mod resource;
pub mod services;

pub use error::{format_cloud_error, CloudError, Result};
pub use openstack::{NovaClient, ProviderContext, Service, Transport};
pub use services::{NovaServices, ServiceSettings};
