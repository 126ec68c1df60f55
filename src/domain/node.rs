//! Node record: a `ProfileRecord` plus node-only identity fields.
//!
//! Composed via `#[serde(flatten)]` so the on-disk node document reads as
//! one flat mapping — identical to how a profile document reads — rather
//! than nesting the shared fields under a sub-key. This is Design Note 4's
//! "single record type, disk form only emits directly-set values" applied
//! one level up: the node's own profile-shaped fields and its node-only
//! fields flatten into one YAML object.

use serde::{Deserialize, Serialize};

use super::field::ScalarField;
use super::profile::ProfileRecord;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(flatten)]
    pub profile: ProfileRecord,

    /// Ordered list of profile ids this node inherits from, defaulting to
    /// `["default"]` when empty (applied by the merge engine, not stored
    /// as a literal default here).
    #[serde(default)]
    pub profiles: super::field::ListField,

    #[serde(default)]
    pub primary_netdev: ScalarField,
}

impl NodeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// The profile chain seed list: the node's own `profiles` list, or
    /// `["default"]` if the node names none.
    pub fn profile_seed(&self) -> Vec<String> {
        let list = self.profiles.get();
        if list.is_empty() {
            vec!["default".to_string()]
        } else {
            list
        }
    }
}

/// The fully merged, read-only view returned by the merge engine (C3).
/// Distinct from `NodeRecord`: this carries resolved (non-layered) scalar
/// and list values plus a provenance map, never written back to the store.
#[derive(Debug, Clone, Serialize)]
pub struct MergedNode {
    pub id: String,
    pub valid: bool,
    pub primary_netdev: Option<String>,

    pub comment: Option<String>,
    pub cluster_name: Option<String>,
    pub container: Option<String>,
    pub kernel_version: Option<String>,
    pub kernel_override: Option<String>,
    pub kernel_args: Vec<String>,
    pub ipxe_template: Option<String>,
    pub init: Option<String>,
    pub root: Option<String>,
    pub asset_key: Option<String>,
    pub system_overlay: Vec<String>,
    pub runtime_overlay: Vec<String>,
    pub discoverable: bool,

    pub ipmi: MergedIpmi,
    pub network_devices: std::collections::BTreeMap<String, MergedNetDevice>,
    pub tags: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedIpmi {
    pub ipaddr: Option<String>,
    pub netmask: Option<String>,
    pub port: Option<String>,
    pub gateway: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub interface: Option<String>,
    pub tags: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergedNetDevice {
    pub device_type: Option<String>,
    pub hwaddr: Option<String>,
    pub ipaddr: Option<String>,
    pub ipaddr6: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub mtu: Option<String>,
    pub onboot: bool,
    pub primary: bool,
    pub tags: std::collections::BTreeMap<String, String>,
}

/// Field-by-field provenance for `cinder node show --provenance`-style
/// introspection, keyed by dotted field path.
pub type ProvenanceMap = std::collections::BTreeMap<String, String>;
