//! Discovery & status tracking (C8).
//!
//! `DiscoveryCoordinator` serializes the bind-an-unknown-MAC-to-a-new-node
//! path behind its own mutex so two simultaneous first-boot requests from
//! different machines never race each other into creating two node
//! records for the same hardware address. Ordinary reads go through the
//! daemon's regular `RwLock<Arc<ConfigSnapshot>>` snapshot (see
//! `server.rs`) and never touch this lock.
//!
//! `StatusTracker` is the in-memory-only per-node status map exposed at
//! `/info/ready` and to `cinder query ready`; it is never persisted, so a
//! daemon restart starts with an empty tracker.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::domain::store::ConfigStore;
use crate::error::CinderResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Ipxe,
    Kernel,
    KmodsOverlay,
    SystemOverlay,
    RuntimeOverlay,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipxe => "IPXE",
            Self::Kernel => "KERNEL",
            Self::KmodsOverlay => "KMODS_OVERLAY",
            Self::SystemOverlay => "SYSTEM_OVERLAY",
            Self::RuntimeOverlay => "RUNTIME_OVERLAY",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    pub stage: String,
    /// Artifact basename on success, or one of `BAD_ASSET`/`BAD_REQUEST`/
    /// `NOT_FOUND` on failure.
    pub last_artifact: String,
    pub client_ip: String,
    pub updated_at_unix: i64,
}

#[derive(Default)]
pub struct StatusTracker {
    records: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, node_id: &str, stage: Stage, artifact: &str, client_ip: IpAddr) {
        let updated_at_unix = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut guard = self.records.write().await;
        guard.insert(
            node_id.to_string(),
            StatusRecord {
                stage: stage.as_str().to_string(),
                last_artifact: artifact.to_string(),
                client_ip: client_ip.to_string(),
                updated_at_unix,
            },
        );
    }

    pub async fn snapshot(&self) -> HashMap<String, StatusRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, node_id: &str) -> Option<StatusRecord> {
        self.records.read().await.get(node_id).cloned()
    }
}

impl Clone for StatusRecord {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            last_artifact: self.last_artifact.clone(),
            client_ip: self.client_ip.clone(),
            updated_at_unix: self.updated_at_unix,
        }
    }
}

/// Serializes the "bind an unrecognized MAC to a new discoverable node"
/// path. Holds the store behind its own lock distinct from the read-mostly
/// config snapshot so a burst of simultaneous discovery requests doesn't
/// stall ordinary provisioning reads.
pub struct DiscoveryCoordinator {
    store: Mutex<ConfigStore>,
}

impl DiscoveryCoordinator {
    pub fn new(store: ConfigStore) -> Self {
        Self { store: Mutex::new(store) }
    }

    /// Look up `hwaddr`; if no node claims it and discovery is enabled,
    /// bind it to the first discoverable node that has a primary device
    /// (or any device lacking a hardware address), persisting immediately
    /// so a racing second request for the same MAC sees the bound node
    /// rather than claiming a second one.
    pub async fn get_or_discover(&self, hwaddr: &str, discoverable: bool) -> CinderResult<String> {
        let mut guard = self.store.lock().await;

        if let Some(node) = crate::domain::merge::find_by_hwaddr(&guard, hwaddr)? {
            return Ok(node.id);
        }

        if !discoverable {
            return Err(crate::error::CinderError::not_found(format!(
                "no node claims hardware address {hwaddr}"
            )));
        }

        let (node_id, device_name) = self.find_discoverable_device(&guard)?;

        let mut record = guard.get_node_raw(&node_id)?;
        record
            .profile
            .network_devices
            .entry(device_name)
            .or_default()
            .hwaddr
            .set(hwaddr);
        guard.update_node(&node_id, record)?;
        guard.persist().await?;
        tracing::info!(node = %node_id, hwaddr = %hwaddr, "bound hardware address to discoverable node");

        Ok(node_id)
    }

    /// Find the first node with `discoverable: true` and a device to bind:
    /// its primary device if that device lacks a hardware address,
    /// otherwise any device lacking one.
    fn find_discoverable_device(&self, store: &ConfigStore) -> CinderResult<(String, String)> {
        for node_id in store.list_nodes() {
            let (merged, _) = crate::domain::merge::resolve(store, &node_id)?;
            if !merged.discoverable {
                continue;
            }

            if let Some(primary) = &merged.primary_netdev {
                if let Some(dev) = merged.network_devices.get(primary) {
                    if dev.hwaddr.is_none() {
                        return Ok((node_id, primary.clone()));
                    }
                }
            }

            if let Some((name, _)) = merged
                .network_devices
                .iter()
                .find(|(_, dev)| dev.hwaddr.is_none())
            {
                return Ok((node_id, name.clone()));
            }
        }

        Err(crate::error::CinderError::not_found(
            "no discoverable node with an unbound device is available",
        ))
    }

    pub fn store(&self) -> &Mutex<ConfigStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::field_args::{self, FieldArgs};

    async fn store_with_discoverable_node(path: &std::path::Path) -> ConfigStore {
        let mut store = ConfigStore::empty(path);
        store.add_profile("default").unwrap();
        store.add_node("n01").unwrap();
        let mut record = store.get_node_raw("n01").unwrap();
        let fields = FieldArgs {
            discoverable: true,
            netname: "default".to_string(),
            netdev_type: Some("eth".to_string()),
            ..FieldArgs::default()
        };
        field_args::apply(&mut record.profile, &fields).unwrap();
        store.update_node("n01", record).unwrap();
        store.persist().await.unwrap();
        store
    }

    #[tokio::test]
    async fn binds_unknown_mac_to_discoverable_node() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_discoverable_node(&dir.path().join("nodes.yaml")).await;
        let coordinator = DiscoveryCoordinator::new(store);

        let bound = coordinator.get_or_discover("aa:bb:cc:dd:ee:ff", true).await.unwrap();
        assert_eq!(bound, "n01");

        // A second lookup for the same MAC finds the now-persisted binding
        // rather than claiming a second discoverable node.
        let again = coordinator.get_or_discover("aa:bb:cc:dd:ee:ff", true).await.unwrap();
        assert_eq!(again, "n01");
    }

    #[tokio::test]
    async fn refuses_unknown_mac_when_not_discoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(&dir.path().join("nodes.yaml"));
        store.add_profile("default").unwrap();
        let coordinator = DiscoveryCoordinator::new(store);

        let err = coordinator.get_or_discover("aa:bb:cc:dd:ee:ff", false).await.unwrap_err();
        assert!(matches!(err, crate::error::CinderError::NotFound(_)));
    }
}
