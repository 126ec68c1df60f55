//! Profile record: the inheritable bundle of fields a node's profile chain
//! contributes. Grounded in the Go source's `NodeConf`/`NodeYaml.Profiles`
//! shape, flattened here into one Rust struct reused by both profile and
//! node documents (see `domain::node::NodeRecord`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::field::{ListField, ScalarField};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpmiRecord {
    #[serde(default)]
    pub ipaddr: ScalarField,
    #[serde(default)]
    pub netmask: ScalarField,
    #[serde(default)]
    pub port: ScalarField,
    #[serde(default)]
    pub gateway: ScalarField,
    #[serde(default)]
    pub username: ScalarField,
    #[serde(default)]
    pub password: ScalarField,
    #[serde(default)]
    pub interface: ScalarField,
    #[serde(default)]
    pub tags: BTreeMap<String, ScalarField>,
}

/// `kernel: {version, override, args}` per spec §6. `override` is a Rust
/// keyword, so the field is named `kernel_override` and wire-renamed back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelRecord {
    #[serde(default)]
    pub version: ScalarField,
    #[serde(default, rename = "override")]
    pub kernel_override: ScalarField,
    #[serde(default)]
    pub args: ListField,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetDevice {
    #[serde(default)]
    pub device_type: ScalarField,
    #[serde(default)]
    pub hwaddr: ScalarField,
    #[serde(default)]
    pub ipaddr: ScalarField,
    #[serde(default)]
    pub ipaddr6: ScalarField,
    #[serde(default)]
    pub netmask: ScalarField,
    #[serde(default)]
    pub gateway: ScalarField,
    #[serde(default)]
    pub mtu: ScalarField,
    #[serde(default)]
    pub onboot: ScalarField,
    #[serde(default)]
    pub primary: ScalarField,
    #[serde(default)]
    pub tags: BTreeMap<String, ScalarField>,
}

/// Shared by `ProfileRecord` and `NodeRecord`. The field model carries its
/// own provenance so a single struct definition can serve both "a named
/// bundle of values" (profile) and "a node's own directly-set layer" (node)
/// without duplicating the field list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub comment: ScalarField,
    #[serde(default, rename = "cluster name")]
    pub cluster_name: ScalarField,

    #[serde(default, rename = "container name")]
    pub container: ScalarField,
    #[serde(default)]
    pub kernel: KernelRecord,
    #[serde(default, rename = "ipxe")]
    pub ipxe_template: ScalarField,
    #[serde(default)]
    pub init: ScalarField,
    #[serde(default)]
    pub root: ScalarField,
    #[serde(default, rename = "asset key")]
    pub asset_key: ScalarField,

    #[serde(default, rename = "system overlay")]
    pub system_overlay: ListField,
    #[serde(default, rename = "runtime overlay")]
    pub runtime_overlay: ListField,

    #[serde(default)]
    pub ipmi: IpmiRecord,

    #[serde(default, rename = "network devices")]
    pub network_devices: BTreeMap<String, NetDevice>,

    #[serde(default)]
    pub tags: BTreeMap<String, ScalarField>,

    #[serde(default)]
    pub discoverable: ScalarField,

    #[serde(default)]
    pub profiles: ListField,
}

impl ProfileRecord {
    pub fn new() -> Self {
        Self::default()
    }
}
