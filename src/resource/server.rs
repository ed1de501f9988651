//! Minimal view of a compute server, enough to gate image capture

use super::fields::{unwrap_envelope, Fields};
use super::platform::Platform;
use super::status::LifecycleState;
use crate::error::Result;
use crate::openstack::{Service, Transport};
use serde_json::Value;

const KIND: &str = "server";
pub(crate) const SERVERS: &str = "/servers";

/// Task state reported while a snapshot of the server is being taken
pub const TASK_IMAGE_SNAPSHOT: &str = "image_snapshot";

/// Nova server statuses (lower-case). Stopped, paused and shelved servers
/// are settled and can be imaged.
const SERVER_STATUS_TABLE: &[(&str, LifecycleState)] = &[
    ("active", LifecycleState::Active),
    ("shutoff", LifecycleState::Available),
    ("stopped", LifecycleState::Available),
    ("paused", LifecycleState::Available),
    ("suspended", LifecycleState::Available),
    ("shelved", LifecycleState::Available),
    ("shelved_offloaded", LifecycleState::Available),
    ("rescue", LifecycleState::Available),
    ("verify_resize", LifecycleState::Available),
    ("build", LifecycleState::Pending),
    ("reboot", LifecycleState::Pending),
    ("hard_reboot", LifecycleState::Pending),
    ("resize", LifecycleState::Pending),
    ("revert_resize", LifecycleState::Pending),
    ("migrating", LifecycleState::Pending),
    ("rebuild", LifecycleState::Pending),
    ("password", LifecycleState::Pending),
    ("error", LifecycleState::Error),
    ("deleted", LifecycleState::Deleted),
    ("soft_deleted", LifecycleState::Deleted),
];

/// Map a Nova server status; unknown statuses are Pending
pub fn server_state(raw_status: &str) -> LifecycleState {
    let status = raw_status.trim().to_lowercase();
    match SERVER_STATUS_TABLE.iter().find(|(name, _)| *name == status) {
        Some((_, state)) => *state,
        None => {
            tracing::warn!("Unknown server status: {}", raw_status);
            LifecycleState::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    pub id: String,
    pub name: String,
    pub state: LifecycleState,
    pub task_state: Option<String>,
    pub platform: Platform,
}

impl ServerSummary {
    /// Whether an image can be captured from the server right now
    pub fn ready_for_capture(&self) -> bool {
        self.state.is_terminal()
            && !self
                .task_state
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(TASK_IMAGE_SNAPSHOT))
    }
}

pub fn normalize_server(raw: &Value) -> Result<Option<ServerSummary>> {
    let f = Fields::new(KIND, raw)?;
    let Some(id) = f.id(&["id"])? else {
        return Ok(None);
    };
    let name = f.string(&["name"])?.unwrap_or_else(|| id.clone());
    let state = f
        .string(&["status"])?
        .map(|s| server_state(&s))
        .unwrap_or_default();
    let task_state = f.string(&["OS-EXT-STS:task_state"])?;

    let metadata = f.string_map("metadata")?;
    let platform = metadata
        .get("org.dasein.platform")
        .and_then(|p| Platform::from_name(p))
        .unwrap_or_default()
        .refine(Platform::guess(&name));

    Ok(Some(ServerSummary {
        id,
        name,
        state,
        task_state,
        platform,
    }))
}

pub async fn fetch_server(transport: &dyn Transport, server_id: &str) -> Result<Option<ServerSummary>> {
    let Some(body) = transport
        .get_resource(Service::Compute, SERVERS, Some(server_id))
        .await?
    else {
        return Ok(None);
    };
    match unwrap_envelope(KIND, &body, "server")? {
        Some(raw) => normalize_server(raw),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_in_progress_blocks_capture() {
        let raw = json!({"id": "s1", "status": "ACTIVE", "OS-EXT-STS:task_state": "image_snapshot"});
        let server = normalize_server(&raw).unwrap().unwrap();
        assert_eq!(server.state, LifecycleState::Active);
        assert!(!server.ready_for_capture());
    }

    #[test]
    fn test_building_server_blocks_capture() {
        let raw = json!({"id": "s1", "status": "BUILD", "OS-EXT-STS:task_state": null});
        assert!(!normalize_server(&raw).unwrap().unwrap().ready_for_capture());

        let raw = json!({"id": "s1", "status": "ACTIVE", "OS-EXT-STS:task_state": null});
        assert!(normalize_server(&raw).unwrap().unwrap().ready_for_capture());
    }

    #[test]
    fn test_stopped_servers_are_settled() {
        for status in ["SHUTOFF", "STOPPED", "PAUSED", "SUSPENDED", "SHELVED", "SHELVED_OFFLOADED"] {
            let raw = json!({"id": "s1", "status": status, "OS-EXT-STS:task_state": null});
            let server = normalize_server(&raw).unwrap().unwrap();
            assert_eq!(server.state, LifecycleState::Available, "{}", status);
            assert!(server.ready_for_capture(), "{}", status);
        }
    }

    #[test]
    fn test_transitional_servers_are_pending() {
        for status in ["BUILD", "REBOOT", "HARD_REBOOT", "RESIZE", "MIGRATING", "REBUILD"] {
            assert_eq!(server_state(status), LifecycleState::Pending, "{}", status);
        }
        assert_eq!(server_state("ERROR"), LifecycleState::Error);
        assert_eq!(server_state("no-such-state"), LifecycleState::Pending);
    }

    #[test]
    fn test_platform_from_metadata_then_name() {
        let raw = json!({"id": "s2", "name": "web-centos", "metadata": {"org.dasein.platform": "UNIX"}});
        assert_eq!(normalize_server(&raw).unwrap().unwrap().platform, Platform::CentOs);

        let raw = json!({"id": "s3", "name": "box"});
        assert_eq!(normalize_server(&raw).unwrap().unwrap().platform, Platform::Unknown);
    }
}
