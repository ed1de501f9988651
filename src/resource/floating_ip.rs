//! Floating IP addresses (nova-network / Neutron compatibility API)

use super::converge::{retry_on_conflict, wait_until, Timeouts};
use super::fields::{unwrap_envelope, Fields};
use super::pool::{ListingHandle, ListingPool};
use super::server::SERVERS;
use super::status::{LifecycleState, ResourceStatus};
use crate::error::{CloudError, Result};
use crate::openstack::{ProviderContext, Service, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

const KIND: &str = "floating IP";
const FLOATING_IPS: &str = "/os-floating-ips";
const POOLS: &str = "/os-floating-ip-pools";
const DEFAULT_POOL: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "IPV4")]
    V4,
    #[serde(rename = "IPV6")]
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => f.write_str("IPv4"),
            Self::V6 => f.write_str("IPv6"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingAddress {
    pub id: String,
    pub address: String,
    pub name: String,
    pub description: String,
    pub attached_server_id: Option<String>,
    pub fixed_address: Option<String>,
    pub pool: Option<String>,
    pub version: IpVersion,
    pub state: LifecycleState,
    pub region_id: String,
    pub data_center_id: String,
}

impl FloatingAddress {
    pub fn is_assigned(&self) -> bool {
        self.attached_server_id.is_some()
    }
}

fn attached_server(f: &Fields<'_>) -> Result<Option<String>> {
    Ok(f.id(&["instance_id", "server_id"])?.filter(|s| !s.is_empty()))
}

fn address_state(attached: bool) -> LifecycleState {
    if attached {
        LifecycleState::Active
    } else {
        LifecycleState::Available
    }
}

/// Convert one floating IP object; both the id and the address are required.
pub fn normalize_address(raw: &Value, context: &ProviderContext) -> Result<Option<FloatingAddress>> {
    let f = Fields::new(KIND, raw)?;

    let (Some(id), Some(address)) = (f.id(&["id"])?, f.string(&["ip", "floating_ip_address"])?) else {
        return Ok(None);
    };
    let attached_server_id = attached_server(&f)?;

    Ok(Some(FloatingAddress {
        name: id.clone(),
        description: id.clone(),
        state: address_state(attached_server_id.is_some()),
        attached_server_id,
        fixed_address: f.string(&["fixed_ip", "fixed_ip_address"])?,
        pool: f.string(&["pool"])?,
        version: IpVersion::V4,
        region_id: context.region_id.clone(),
        data_center_id: context.data_center_id(),
        id,
        address,
    }))
}

pub fn address_status(raw: &Value) -> Result<Option<ResourceStatus>> {
    let f = Fields::new(KIND, raw)?;
    let Some(id) = f.id(&["id"])? else {
        return Ok(None);
    };
    let attached = attached_server(&f)?.is_some();
    Ok(Some(ResourceStatus::new(id, address_state(attached))))
}

/// Pool names with `default` moved to the front
fn pool_names(body: &Value) -> Result<Vec<String>> {
    let f = Fields::new(KIND, body)?;
    let mut pools = Vec::new();
    let mut others = Vec::new();
    for pool in f.objects("floating_ip_pools")? {
        match pool.string(&["name"])? {
            Some(name) if name == DEFAULT_POOL => pools.push(name),
            Some(name) => others.push(name),
            None => {}
        }
    }
    pools.extend(others);
    Ok(pools)
}

#[derive(Clone)]
pub struct FloatingIpAdapter {
    transport: Arc<dyn Transport>,
    context: ProviderContext,
    pool: ListingPool,
    timeouts: Timeouts,
}

impl FloatingIpAdapter {
    pub fn new(transport: Arc<dyn Transport>, context: ProviderContext, pool: ListingPool, timeouts: Timeouts) -> Self {
        Self {
            transport,
            context,
            pool,
            timeouts,
        }
    }

    /// Floating IPs are a nova-network extension; a 404 on the collection
    /// means the deployment does not offer them
    pub async fn is_subscribed(&self) -> Result<bool> {
        self.transport.has_collection(Service::Compute, FLOATING_IPS).await
    }

    pub fn supported_versions(&self) -> &'static [IpVersion] {
        &[IpVersion::V4]
    }

    fn supports(&self, version: IpVersion) -> bool {
        self.supported_versions().contains(&version)
    }

    pub async fn get(&self, address_id: &str) -> Result<Option<FloatingAddress>> {
        let Some(body) = self
            .transport
            .get_resource(Service::Compute, FLOATING_IPS, Some(address_id))
            .await?
        else {
            return Ok(None);
        };
        match unwrap_envelope(KIND, &body, "floating_ip")? {
            Some(raw) => normalize_address(raw, &self.context),
            None => Ok(None),
        }
    }

    async fn listing(&self) -> Result<Option<Value>> {
        self.transport
            .get_resource(Service::Compute, FLOATING_IPS, None)
            .await
    }

    pub async fn list(&self, version: IpVersion, unassigned_only: bool) -> Result<Vec<FloatingAddress>> {
        if !self.supports(version) {
            return Ok(Vec::new());
        }
        let Some(body) = self.listing().await? else {
            return Ok(Vec::new());
        };

        let mut addresses = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("floating_ips")?.into_iter().flatten() {
            if let Some(address) = normalize_address(raw, &self.context)? {
                if !unassigned_only || !address.is_assigned() {
                    addresses.push(address);
                }
            }
        }
        Ok(addresses)
    }

    pub fn list_concurrently(&self, version: IpVersion, unassigned_only: bool) -> ListingHandle<Vec<FloatingAddress>> {
        let adapter = self.clone();
        self.pool
            .submit(async move { adapter.list(version, unassigned_only).await })
    }

    pub async fn list_status(&self, version: IpVersion) -> Result<Vec<ResourceStatus>> {
        if !self.supports(version) {
            return Ok(Vec::new());
        }
        let Some(body) = self.listing().await? else {
            return Ok(Vec::new());
        };

        let mut statuses = Vec::new();
        for raw in Fields::new(KIND, &body)?.array("floating_ips")?.into_iter().flatten() {
            statuses.extend(address_status(raw)?);
        }
        Ok(statuses)
    }

    async fn request_from(&self, pool: Option<&str>) -> Result<String> {
        let body = match pool {
            Some(name) => json!({ "pool": name }),
            None => json!({}),
        };
        let reply = self
            .transport
            .post_resource(Service::Compute, FLOATING_IPS, None, None, &body)
            .await?;

        if let Some(reply) = reply {
            if let Some(raw) = unwrap_envelope(KIND, &reply, "floating_ip")? {
                if let Some(address) = normalize_address(raw, &self.context)? {
                    tracing::info!("Allocated {} ({})", address.address, address.id);
                    return Ok(address.id);
                }
            }
        }
        tracing::error!("No IP address was created by the create attempt, and no error was returned");
        Err(CloudError::Communication("No IP address was created".to_string()))
    }

    /// Allocate a new address, falling back to each named pool when the
    /// provider has no default pool configured
    pub async fn request(&self, version: IpVersion) -> Result<String> {
        if !self.supports(version) {
            return Err(CloudError::UnsupportedOperation(format!(
                "Cannot request an {} address at this time",
                version
            )));
        }

        match self.request_from(None).await {
            Err(e) if e.is_not_found() => {
                let pools = match self
                    .transport
                    .get_resource(Service::Compute, POOLS, None)
                    .await?
                {
                    Some(body) => pool_names(&body)?,
                    None => Vec::new(),
                };
                for pool in &pools {
                    match self.request_from(Some(pool)).await {
                        Ok(id) => return Ok(id),
                        Err(err) => tracing::debug!("Pool {} refused allocation: {}", pool, err),
                    }
                }
                Err(e)
            }
            other => other,
        }
    }

    pub async fn request_for_vlan(&self, _version: IpVersion, _vlan_id: Option<&str>) -> Result<String> {
        Err(CloudError::UnsupportedOperation(
            "Static IP addresses for VLANs are not supported".to_string(),
        ))
    }

    /// Return an address to its pool and wait for it to disappear
    pub async fn release(&self, address_id: &str) -> Result<()> {
        retry_on_conflict(
            || async {
                match self
                    .transport
                    .delete_resource(Service::Compute, FLOATING_IPS, address_id, None)
                    .await
                {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            },
            CloudError::is_conflict,
            self.timeouts.address_release_conflict,
        )
        .await?;

        let last = wait_until(
            || self.get(address_id),
            |a| a.is_none(),
            self.timeouts.address_release,
        )
        .await;
        if last.is_some() {
            tracing::warn!("Address {} release accepted but still present", address_id);
        }
        Ok(())
    }

    async fn server_action(&self, server_id: &str, body: &Value) -> Result<()> {
        self.transport
            .post_resource(Service::Compute, SERVERS, Some(server_id), Some("action"), body)
            .await
            .map(|_| ())
    }

    pub async fn assign(&self, address_id: &str, server_id: &str) -> Result<()> {
        let address = self
            .get(address_id)
            .await?
            .ok_or_else(|| CloudError::not_found(KIND, address_id))?;

        let body = json!({ "addFloatingIp": { "address": address.address } });
        self.server_action(server_id, &body).await?;
        tracing::info!("Assigned {} to {}", address.address, server_id);
        Ok(())
    }

    pub async fn unassign(&self, address_id: &str) -> Result<()> {
        let address = self
            .get(address_id)
            .await?
            .ok_or_else(|| CloudError::not_found(KIND, address_id))?;
        let Some(server_id) = address.attached_server_id else {
            return Err(CloudError::InvalidState(format!(
                "address {} is not assigned to a server",
                address.address
            )));
        };

        let body = json!({ "removeFloatingIp": { "address": address.address } });
        self.server_action(&server_id, &body).await?;
        tracing::info!("Unassigned {} from {}", address.address, server_id);
        Ok(())
    }

    pub async fn assign_to_interface(&self, _address_id: &str, _interface_id: &str) -> Result<()> {
        Err(CloudError::UnsupportedOperation(
            "Network interfaces are not supported".to_string(),
        ))
    }

    pub async fn forward(&self, _address_id: &str, _public_port: u16, _private_port: u16, _server_id: &str) -> Result<String> {
        Err(CloudError::UnsupportedOperation(
            "Forwarding not supported".to_string(),
        ))
    }
}
