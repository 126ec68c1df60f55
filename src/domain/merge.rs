//! Merge engine (C3): resolves a node's full profile chain into one
//! effective view.
//!
//! The profile chain is expanded depth-first, each profile's own `profiles`
//! list is expanded before the engine returns to the caller's list — this
//! lets a profile itself inherit from other profiles. A `~name` entry in
//! any list removes a previously-included id; a `visited` set stops the
//! walk from recursing back into an id already on the path, which is how
//! cycles are silently truncated (Design Note: the Go source's own
//! profile-walk has no such guard — this one adds it explicitly).

use std::collections::{BTreeMap, HashSet};

use crate::error::{CinderError, CinderResult};

use super::field::ScalarField;
use super::node::{MergedIpmi, MergedNetDevice, MergedNode, NodeRecord, ProvenanceMap};
use super::profile::ProfileRecord;
use super::store::ConfigStore;

/// Expand a node's profile seed list into an ordered, deduplicated,
/// cycle-safe chain of profile ids.
fn resolve_chain(store: &ConfigStore, seed: &[String]) -> Vec<String> {
    let mut resolved: Vec<String> = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    expand_chain(store, seed, &mut resolved, &mut visited);
    resolved
}

fn expand_chain(
    store: &ConfigStore,
    names: &[String],
    resolved: &mut Vec<String>,
    visited: &mut HashSet<String>,
) {
    for name in names {
        if let Some(negated) = name.strip_prefix('~') {
            resolved.retain(|id| id != negated);
            continue;
        }
        if visited.contains(name) {
            continue;
        }
        visited.insert(name.clone());
        let Ok(profile) = store.get_profile_raw(name) else {
            tracing::warn!(profile = %name, "referenced profile does not exist, skipping");
            continue;
        };
        if !resolved.contains(name) {
            resolved.push(name.clone());
        }
        let parent_seed = profile.profiles.get();
        if !parent_seed.is_empty() {
            expand_chain(store, &parent_seed, resolved, visited);
        }
    }
}

/// Scalar merge accumulator: tracks the first profile-contributed value
/// (and its source) plus whatever the node itself sets directly.
#[derive(Default)]
struct ScalarAcc {
    field: ScalarField,
}

impl ScalarAcc {
    fn absorb_profile(&mut self, value: Option<&str>, source: &str) {
        if let Some(v) = value {
            self.field.set_alt(v, source);
        }
    }

    fn absorb_node(&mut self, value: Option<&str>) {
        if let Some(v) = value {
            self.field.set(v);
        }
    }
}

/// Resolve the merged view for `node_id`. Never mutates the store.
pub fn resolve(store: &ConfigStore, node_id: &str) -> CinderResult<(MergedNode, ProvenanceMap)> {
    let node = store.get_node_raw(node_id)?;
    let chain = resolve_chain(store, &node.profile_seed());

    let mut comment = ScalarAcc::default();
    let mut cluster_name = ScalarAcc::default();
    let mut container = ScalarAcc::default();
    let mut kernel_version = ScalarAcc::default();
    let mut kernel_override = ScalarAcc::default();
    let mut ipxe_template = ScalarAcc::default();
    let mut init = ScalarAcc::default();
    let mut root = ScalarAcc::default();
    let mut asset_key = ScalarAcc::default();
    let mut discoverable = ScalarAcc::default();

    let mut kernel_args_parts: Vec<String> = Vec::new();
    let mut system_overlay_parts: Vec<String> = Vec::new();
    let mut runtime_overlay_parts: Vec<String> = Vec::new();

    let mut ipmi = MergedIpmiAcc::default();
    let mut netdevs: BTreeMap<String, MergedNetDevAcc> = BTreeMap::new();
    let mut tags: BTreeMap<String, ScalarAcc> = BTreeMap::new();

    for profile_id in &chain {
        let profile = store.get_profile_raw(profile_id)?;
        absorb_profile_scalars(
            &profile,
            profile_id,
            &mut comment,
            &mut cluster_name,
            &mut container,
            &mut kernel_version,
            &mut kernel_override,
            &mut ipxe_template,
            &mut init,
            &mut root,
            &mut asset_key,
            &mut discoverable,
        );
        kernel_args_parts.extend(profile.kernel.args.get());
        system_overlay_parts.extend(profile.system_overlay.get());
        runtime_overlay_parts.extend(profile.runtime_overlay.get());
        ipmi.absorb_profile(&profile.ipmi, profile_id);
        for (name, dev) in &profile.network_devices {
            netdevs.entry(name.clone()).or_default().absorb_profile(dev, profile_id);
        }
        for (key, value) in &profile.tags {
            tags.entry(key.clone())
                .or_default()
                .absorb_profile(value.get(), profile_id);
        }
    }

    // Overlay the node's own directly-set values last (WithOverride for
    // scalars; append-only for lists; node source is the empty string).
    let np = &node.profile;
    comment.absorb_node(np.comment.node_value());
    cluster_name.absorb_node(np.cluster_name.node_value());
    container.absorb_node(np.container.node_value());
    kernel_version.absorb_node(np.kernel.version.node_value());
    kernel_override.absorb_node(np.kernel.kernel_override.node_value());
    ipxe_template.absorb_node(np.ipxe_template.node_value());
    init.absorb_node(np.init.node_value());
    root.absorb_node(np.root.node_value());
    asset_key.absorb_node(np.asset_key.node_value());
    discoverable.absorb_node(np.discoverable.node_value());

    kernel_args_parts.extend(np.kernel.args.node_value().iter().cloned());
    system_overlay_parts.extend(np.system_overlay.node_value().iter().cloned());
    runtime_overlay_parts.extend(np.runtime_overlay.node_value().iter().cloned());

    ipmi.absorb_node(&np.ipmi);
    for (name, dev) in &np.network_devices {
        netdevs.entry(name.clone()).or_default().absorb_node(dev);
    }
    for (key, value) in &np.tags {
        tags.entry(key.clone()).or_default().absorb_node(value.node_value());
    }

    let mut provenance = ProvenanceMap::new();
    provenance.insert("comment".to_string(), comment.field.source());
    provenance.insert("cluster_name".to_string(), cluster_name.field.source());
    provenance.insert("container".to_string(), container.field.source());
    provenance.insert("kernel_version".to_string(), kernel_version.field.source());
    provenance.insert("kernel_override".to_string(), kernel_override.field.source());
    provenance.insert("ipxe_template".to_string(), ipxe_template.field.source());
    provenance.insert("init".to_string(), init.field.source());
    provenance.insert("root".to_string(), root.field.source());
    provenance.insert("asset_key".to_string(), asset_key.field.source());

    let kernel_args = super::field::merge_negated(kernel_args_parts);
    let system_overlay = super::field::merge_negated(system_overlay_parts);
    let runtime_overlay = super::field::merge_negated(runtime_overlay_parts);

    let mut network_devices: BTreeMap<String, MergedNetDevice> = netdevs
        .into_iter()
        .map(|(name, acc)| (name, acc.finish()))
        .collect();

    let primary_netdev = resolve_primary(&mut network_devices, node.primary_netdev.node_value());

    let merged = MergedNode {
        id: node_id.to_string(),
        valid: true,
        primary_netdev,
        comment: comment.field.get().map(str::to_string),
        cluster_name: cluster_name.field.get().map(str::to_string),
        container: container.field.get().map(str::to_string),
        kernel_version: kernel_version.field.get().map(str::to_string),
        kernel_override: kernel_override.field.get().map(str::to_string),
        kernel_args,
        ipxe_template: ipxe_template.field.get().map(str::to_string),
        init: init.field.get().map(str::to_string),
        root: root.field.get().map(str::to_string),
        asset_key: asset_key.field.get().map(str::to_string),
        system_overlay,
        runtime_overlay,
        discoverable: discoverable.field.get_bool(),
        ipmi: ipmi.finish(),
        network_devices,
        tags: tags
            .into_iter()
            .filter_map(|(k, v)| v.field.get().map(|val| (k, val.to_string())))
            .collect(),
    };

    Ok((merged, provenance))
}

/// Per-invariant primary device resolution: an explicitly-flagged primary
/// device wins; else the node's `primary_netdev` name if set; else the
/// lexicographically first device name (`BTreeMap` iteration is already
/// sorted).
fn resolve_primary(
    devices: &mut BTreeMap<String, MergedNetDevice>,
    node_primary_name: Option<&str>,
) -> Option<String> {
    if let Some((name, _)) = devices.iter().find(|(_, d)| d.primary) {
        return Some(name.clone());
    }
    if let Some(name) = node_primary_name {
        if let Some(dev) = devices.get_mut(name) {
            dev.primary = true;
            return Some(name.to_string());
        }
    }
    if let Some((name, dev)) = devices.iter_mut().next() {
        dev.primary = true;
        return Some(name.clone());
    }
    None
}

#[derive(Default)]
struct MergedIpmiAcc {
    ipaddr: ScalarAcc,
    netmask: ScalarAcc,
    port: ScalarAcc,
    gateway: ScalarAcc,
    username: ScalarAcc,
    password: ScalarAcc,
    interface: ScalarAcc,
    tags: BTreeMap<String, ScalarAcc>,
}

impl MergedIpmiAcc {
    fn absorb_profile(&mut self, src: &super::profile::IpmiRecord, source: &str) {
        self.ipaddr.absorb_profile(src.ipaddr.node_value(), source);
        self.netmask.absorb_profile(src.netmask.node_value(), source);
        self.port.absorb_profile(src.port.node_value(), source);
        self.gateway.absorb_profile(src.gateway.node_value(), source);
        self.username.absorb_profile(src.username.node_value(), source);
        self.password.absorb_profile(src.password.node_value(), source);
        self.interface.absorb_profile(src.interface.node_value(), source);
        for (k, v) in &src.tags {
            self.tags.entry(k.clone()).or_default().absorb_profile(v.node_value(), source);
        }
    }

    fn absorb_node(&mut self, src: &super::profile::IpmiRecord) {
        self.ipaddr.absorb_node(src.ipaddr.node_value());
        self.netmask.absorb_node(src.netmask.node_value());
        self.port.absorb_node(src.port.node_value());
        self.gateway.absorb_node(src.gateway.node_value());
        self.username.absorb_node(src.username.node_value());
        self.password.absorb_node(src.password.node_value());
        self.interface.absorb_node(src.interface.node_value());
        for (k, v) in &src.tags {
            self.tags.entry(k.clone()).or_default().absorb_node(v.node_value());
        }
    }

    fn finish(self) -> MergedIpmi {
        MergedIpmi {
            ipaddr: self.ipaddr.field.get().map(str::to_string),
            netmask: self.netmask.field.get().map(str::to_string),
            port: self.port.field.get().map(str::to_string),
            gateway: self.gateway.field.get().map(str::to_string),
            username: self.username.field.get().map(str::to_string),
            password: self.password.field.get().map(str::to_string),
            interface: self.interface.field.get().map(str::to_string),
            tags: self
                .tags
                .into_iter()
                .filter_map(|(k, v)| v.field.get().map(|val| (k, val.to_string())))
                .collect(),
        }
    }
}

#[derive(Default)]
struct MergedNetDevAcc {
    device_type: ScalarAcc,
    hwaddr: ScalarAcc,
    ipaddr: ScalarAcc,
    ipaddr6: ScalarAcc,
    netmask: ScalarAcc,
    gateway: ScalarAcc,
    mtu: ScalarAcc,
    onboot: ScalarAcc,
    primary: ScalarAcc,
    tags: BTreeMap<String, ScalarAcc>,
}

impl MergedNetDevAcc {
    fn absorb_profile(&mut self, src: &super::profile::NetDevice, source: &str) {
        self.device_type.absorb_profile(src.device_type.node_value(), source);
        self.hwaddr.absorb_profile(src.hwaddr.node_value(), source);
        self.ipaddr.absorb_profile(src.ipaddr.node_value(), source);
        self.ipaddr6.absorb_profile(src.ipaddr6.node_value(), source);
        self.netmask.absorb_profile(src.netmask.node_value(), source);
        self.gateway.absorb_profile(src.gateway.node_value(), source);
        self.mtu.absorb_profile(src.mtu.node_value(), source);
        self.onboot.absorb_profile(src.onboot.node_value(), source);
        self.primary.absorb_profile(src.primary.node_value(), source);
        for (k, v) in &src.tags {
            self.tags.entry(k.clone()).or_default().absorb_profile(v.node_value(), source);
        }
    }

    fn absorb_node(&mut self, src: &super::profile::NetDevice) {
        self.device_type.absorb_node(src.device_type.node_value());
        self.hwaddr.absorb_node(src.hwaddr.node_value());
        self.ipaddr.absorb_node(src.ipaddr.node_value());
        self.ipaddr6.absorb_node(src.ipaddr6.node_value());
        self.netmask.absorb_node(src.netmask.node_value());
        self.gateway.absorb_node(src.gateway.node_value());
        self.mtu.absorb_node(src.mtu.node_value());
        self.onboot.absorb_node(src.onboot.node_value());
        self.primary.absorb_node(src.primary.node_value());
        for (k, v) in &src.tags {
            self.tags.entry(k.clone()).or_default().absorb_node(v.node_value());
        }
    }

    fn finish(self) -> MergedNetDevice {
        MergedNetDevice {
            device_type: self.device_type.field.get().map(str::to_string),
            hwaddr: self.hwaddr.field.get().map(str::to_string),
            ipaddr: self.ipaddr.field.get().map(str::to_string),
            ipaddr6: self.ipaddr6.field.get().map(str::to_string),
            netmask: self.netmask.field.get().map(str::to_string),
            gateway: self.gateway.field.get().map(str::to_string),
            mtu: self.mtu.field.get().map(str::to_string),
            onboot: self.onboot.field.get_bool(),
            primary: self.primary.field.get_bool(),
            tags: self
                .tags
                .into_iter()
                .filter_map(|(k, v)| v.field.get().map(|val| (k, val.to_string())))
                .collect(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn absorb_profile_scalars(
    profile: &ProfileRecord,
    source: &str,
    comment: &mut ScalarAcc,
    cluster_name: &mut ScalarAcc,
    container: &mut ScalarAcc,
    kernel_version: &mut ScalarAcc,
    kernel_override: &mut ScalarAcc,
    ipxe_template: &mut ScalarAcc,
    init: &mut ScalarAcc,
    root: &mut ScalarAcc,
    asset_key: &mut ScalarAcc,
    discoverable: &mut ScalarAcc,
) {
    comment.absorb_profile(profile.comment.node_value(), source);
    cluster_name.absorb_profile(profile.cluster_name.node_value(), source);
    container.absorb_profile(profile.container.node_value(), source);
    kernel_version.absorb_profile(profile.kernel.version.node_value(), source);
    kernel_override.absorb_profile(profile.kernel.kernel_override.node_value(), source);
    ipxe_template.absorb_profile(profile.ipxe_template.node_value(), source);
    init.absorb_profile(profile.init.node_value(), source);
    root.absorb_profile(profile.root.node_value(), source);
    asset_key.absorb_profile(profile.asset_key.node_value(), source);
    discoverable.absorb_profile(profile.discoverable.node_value(), source);
}

/// List every node id, resolve each, and return the full merged set. Used
/// by `find_by_hwaddr`/`find_by_ipaddr` and by the template renderer's
/// `all_nodes` binding.
pub fn resolve_all(store: &ConfigStore) -> CinderResult<Vec<MergedNode>> {
    store.list_nodes().iter().map(|id| resolve(store, id).map(|(n, _)| n)).collect()
}

/// First case-insensitive hardware-address match across the fully merged
/// node set, per spec §4.1.
pub fn find_by_hwaddr(store: &ConfigStore, hwaddr: &str) -> CinderResult<Option<MergedNode>> {
    for node in resolve_all(store)? {
        for dev in node.network_devices.values() {
            if let Some(addr) = &dev.hwaddr {
                if addr.eq_ignore_ascii_case(hwaddr) {
                    return Ok(Some(node));
                }
            }
        }
    }
    Ok(None)
}

/// First exact IP-address match (v4 or v6) across the fully merged node
/// set, per spec §4.1.
pub fn find_by_ipaddr(store: &ConfigStore, ipaddr: &str) -> CinderResult<Option<MergedNode>> {
    for node in resolve_all(store)? {
        for dev in node.network_devices.values() {
            if dev.ipaddr.as_deref() == Some(ipaddr) || dev.ipaddr6.as_deref() == Some(ipaddr) {
                return Ok(Some(node));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::ScalarField;

    fn set(field: &mut ScalarField, value: &str) {
        field.set(value);
    }

    #[tokio::test]
    async fn node_scalar_overrides_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        store.add_profile("default").unwrap();
        let mut profile = store.get_profile_raw("default").unwrap();
        set(&mut profile.container, "base-image");
        store.update_profile("default", profile).unwrap();

        store.add_node("n1").unwrap();
        let mut node = store.get_node_raw("n1").unwrap();
        set(&mut node.profile.container, "override-image");
        store.update_node("n1", node).unwrap();

        let (merged, provenance) = resolve(&store, "n1").unwrap();
        assert_eq!(merged.container.as_deref(), Some("override-image"));
        assert_eq!(provenance["container"], "");
    }

    #[tokio::test]
    async fn node_inherits_profile_value_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        store.add_profile("default").unwrap();
        let mut profile = store.get_profile_raw("default").unwrap();
        set(&mut profile.container, "base-image");
        store.update_profile("default", profile).unwrap();
        store.add_node("n1").unwrap();

        let (merged, provenance) = resolve(&store, "n1").unwrap();
        assert_eq!(merged.container.as_deref(), Some("base-image"));
        assert_eq!(provenance["container"], "default");
    }

    #[tokio::test]
    async fn cycle_is_truncated_not_infinite() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        store.add_profile("a").unwrap();
        store.add_profile("b").unwrap();
        let mut a = store.get_profile_raw("a").unwrap();
        a.profiles.set(vec!["b"]);
        store.update_profile("a", a).unwrap();
        let mut b = store.get_profile_raw("b").unwrap();
        b.profiles.set(vec!["a"]);
        store.update_profile("b", b).unwrap();

        store.add_node("n1").unwrap();
        let mut node = store.get_node_raw("n1").unwrap();
        node.profiles.set(vec!["a"]);
        store.update_node("n1", node).unwrap();

        let chain = resolve_chain(&store, &["a".to_string()]);
        assert_eq!(chain, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn list_fields_append_across_chain_and_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        store.add_profile("default").unwrap();
        let mut profile = store.get_profile_raw("default").unwrap();
        profile.system_overlay.set(vec!["hosts", "ssh"]);
        store.update_profile("default", profile).unwrap();

        store.add_node("n1").unwrap();
        let mut node = store.get_node_raw("n1").unwrap();
        node.profile.system_overlay.set(vec!["custom"]);
        store.update_node("n1", node).unwrap();

        let (merged, _) = resolve(&store, "n1").unwrap();
        assert_eq!(merged.system_overlay, vec!["hosts", "ssh", "custom"]);
    }
}
