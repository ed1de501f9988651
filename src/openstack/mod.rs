//! OpenStack API interaction module
//!
//! This module provides the transport the resource adapters are built on:
//! an HTTP client for the Nova (compute) and Cinder (volume) REST APIs and
//! the [`Transport`] trait the adapters consume.
//!
//! # Module Structure
//!
//! - [`client`] - Endpoint handling, provider context, and the `Transport` trait
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use novaconverge::openstack::{NovaClient, Service, Transport};
//!
//! async fn example() -> novaconverge::Result<()> {
//!     let client = NovaClient::new("https://nova/v2/t1", "https://cinder/v1/t1", "token")?;
//!     let volumes = client.get_resource(Service::Volume, "/volumes", None).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;

pub use client::{NovaClient, ProviderContext, Service, Transport};
