//! Flags shared by `cinder node add|set` and `cinder profile add|set`,
//! since both mutate the same `ProfileRecord`-shaped field set (§6).

use clap::Args;

use crate::domain::profile::ProfileRecord;
use crate::error::CinderResult;
use crate::util::validate_hwaddr;

#[derive(Args, Debug, Default, Clone)]
pub struct FieldArgs {
    #[arg(long)]
    pub comment: Option<String>,
    #[arg(long = "clustername")]
    pub cluster_name: Option<String>,
    #[arg(long)]
    pub container: Option<String>,
    #[arg(long = "kernelversion")]
    pub kernel_version: Option<String>,
    #[arg(long = "kerneloverride")]
    pub kernel_override: Option<String>,
    /// Space-separated kernel argument list; replaces the node/profile's own
    /// list (profile-contributed args still merge ahead of it).
    #[arg(long = "kernelargs")]
    pub kernel_args: Option<String>,
    #[arg(long = "ipxetemplate")]
    pub ipxe_template: Option<String>,
    #[arg(long)]
    pub init: Option<String>,
    #[arg(long)]
    pub root: Option<String>,
    #[arg(long = "assetkey")]
    pub asset_key: Option<String>,

    /// Comma-separated system overlay names, replacing this record's own
    /// tail of the list.
    #[arg(long)]
    pub system: Option<String>,
    /// Comma-separated runtime overlay names.
    #[arg(long)]
    pub runtime: Option<String>,

    /// Profiles to inherit from (repeatable); `~name` removes an inherited
    /// profile per §4.3.
    #[arg(long = "profile")]
    pub profiles: Vec<String>,

    #[arg(long, value_parser = crate::util::parse_key_val)]
    pub tag: Vec<(String, String)>,
    #[arg(long = "tagdel")]
    pub tagdel: Vec<String>,

    #[arg(long)]
    pub discoverable: bool,
    #[arg(long)]
    pub undiscoverable: bool,

    /// Network device name this invocation's netdev-shaped flags apply to
    /// (defaults to `default`).
    #[arg(long, default_value = "default")]
    pub netname: String,
    #[arg(long = "netdev")]
    pub netdev_type: Option<String>,
    #[arg(long)]
    pub hwaddr: Option<String>,
    #[arg(long)]
    pub ipaddr: Option<String>,
    #[arg(long = "ip6addr")]
    pub ipaddr6: Option<String>,
    #[arg(long)]
    pub netmask: Option<String>,
    #[arg(long)]
    pub gateway: Option<String>,
    #[arg(long)]
    pub mtu: Option<String>,
    #[arg(long)]
    pub onboot: Option<String>,
    #[arg(long)]
    pub primary: bool,

    #[arg(long = "ipmiaddr")]
    pub ipmi_addr: Option<String>,
    #[arg(long = "ipminetmask")]
    pub ipmi_netmask: Option<String>,
    #[arg(long = "ipmiport")]
    pub ipmi_port: Option<String>,
    #[arg(long = "ipmigateway")]
    pub ipmi_gateway: Option<String>,
    #[arg(long = "ipmiuser")]
    pub ipmi_user: Option<String>,
    #[arg(long = "ipmipass")]
    pub ipmi_pass: Option<String>,
    #[arg(long = "ipmiinterface")]
    pub ipmi_interface: Option<String>,
}

/// Apply whichever flags were actually passed to `record`. Every scalar
/// honors the `UNSET`/`DELETE`/... sentinels by virtue of going through
/// `ScalarField::set` (see `domain::field`).
pub fn apply(record: &mut ProfileRecord, args: &FieldArgs) -> CinderResult<()> {
    if let Some(v) = &args.comment {
        record.comment.set(v);
    }
    if let Some(v) = &args.cluster_name {
        record.cluster_name.set(v);
    }
    if let Some(v) = &args.container {
        record.container.set(v);
    }
    if let Some(v) = &args.kernel_version {
        record.kernel.version.set(v);
    }
    if let Some(v) = &args.kernel_override {
        record.kernel.kernel_override.set(v);
    }
    if let Some(v) = &args.kernel_args {
        record.kernel.args.set(v.split_whitespace().map(str::to_string));
    }
    if let Some(v) = &args.ipxe_template {
        record.ipxe_template.set(v);
    }
    if let Some(v) = &args.init {
        record.init.set(v);
    }
    if let Some(v) = &args.root {
        record.root.set(v);
    }
    if let Some(v) = &args.asset_key {
        record.asset_key.set(v);
    }
    if let Some(v) = &args.system {
        record.system_overlay.set(split_list(v));
    }
    if let Some(v) = &args.runtime {
        record.runtime_overlay.set(split_list(v));
    }
    if !args.profiles.is_empty() {
        record.profiles.set(args.profiles.clone());
    }
    if args.discoverable {
        record.discoverable.set("true");
    }
    if args.undiscoverable {
        record.discoverable.set("false");
    }

    for (k, v) in &args.tag {
        record.tags.entry(k.clone()).or_default().set(v);
    }
    for k in &args.tagdel {
        record.tags.entry(k.clone()).or_default().set("UNSET");
    }

    apply_netdev(record, args)?;
    apply_ipmi(record, args);

    Ok(())
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn apply_netdev(record: &mut ProfileRecord, args: &FieldArgs) -> CinderResult<()> {
    let touches_netdev = args.netdev_type.is_some()
        || args.hwaddr.is_some()
        || args.ipaddr.is_some()
        || args.ipaddr6.is_some()
        || args.netmask.is_some()
        || args.gateway.is_some()
        || args.mtu.is_some()
        || args.onboot.is_some()
        || args.primary;
    if !touches_netdev {
        return Ok(());
    }

    let dev = record.network_devices.entry(args.netname.clone()).or_default();
    if let Some(v) = &args.netdev_type {
        dev.device_type.set(v);
    }
    if let Some(v) = &args.hwaddr {
        dev.hwaddr.set(validate_hwaddr(v)?);
    }
    if let Some(v) = &args.ipaddr {
        dev.ipaddr.set(v);
    }
    if let Some(v) = &args.ipaddr6 {
        dev.ipaddr6.set(v);
    }
    if let Some(v) = &args.netmask {
        dev.netmask.set(v);
    }
    if let Some(v) = &args.gateway {
        dev.gateway.set(v);
    }
    if let Some(v) = &args.mtu {
        dev.mtu.set(v);
    }
    if let Some(v) = &args.onboot {
        dev.onboot.set(v);
    }
    if args.primary {
        dev.primary.set("true");
    }
    Ok(())
}

fn apply_ipmi(record: &mut ProfileRecord, args: &FieldArgs) {
    if let Some(v) = &args.ipmi_addr {
        record.ipmi.ipaddr.set(v);
    }
    if let Some(v) = &args.ipmi_netmask {
        record.ipmi.netmask.set(v);
    }
    if let Some(v) = &args.ipmi_port {
        record.ipmi.port.set(v);
    }
    if let Some(v) = &args.ipmi_gateway {
        record.ipmi.gateway.set(v);
    }
    if let Some(v) = &args.ipmi_user {
        record.ipmi.username.set(v);
    }
    if let Some(v) = &args.ipmi_pass {
        record.ipmi.password.set(v);
    }
    if let Some(v) = &args.ipmi_interface {
        record.ipmi.interface.set(v);
    }
}
