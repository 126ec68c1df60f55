//! `cinder configure dhcp|hosts|ssh` — thin stubs (§6): render the
//! controller-host template to stdout via C4 against every node, but never
//! write to `/etc` — writing host DHCP/hosts/ssh configuration is named out
//! of scope.

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config;
use crate::domain::merge;
use crate::domain::node::MergedNode;
use crate::domain::store::ConfigStore;
use crate::template::Renderer;

#[derive(Subcommand)]
pub enum ConfigureCommands {
    /// Render the controller's DHCP configuration template.
    Dhcp,
    /// Render the controller's `/etc/hosts` template.
    Hosts,
    /// Render the controller's SSH known-hosts template.
    Ssh,
}

pub fn run(cmd: &ConfigureCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: &ConfigureCommands) -> Result<()> {
    let controller = config::load(&config::default_config_path())?;
    let store = ConfigStore::open(&config::default_nodes_path())
        .await
        .context("loading node/profile document")?;
    let all_nodes = merge::resolve_all(&store)?;

    let template_name = match cmd {
        ConfigureCommands::Dhcp => "dhcpd.conf.ww",
        ConfigureCommands::Hosts => "hosts.ww",
        ConfigureCommands::Ssh => "ssh_known_hosts.ww",
    };
    let template_path = controller.paths.config_dir.join(template_name);
    let source = std::fs::read_to_string(&template_path).with_context(|| {
        format!(
            "reading {} (place a '.ww'-style template under config_dir to render one)",
            template_path.display()
        )
    })?;

    let synthetic = synthetic_controller_node();
    let mut renderer =
        Renderer::new(controller.paths.config_dir.clone(), controller.paths.container_dir.clone())?;
    let rendered = renderer.render_str(
        template_name,
        &source,
        &synthetic,
        &all_nodes,
        &controller,
        "cinder",
        unix_now(),
    )?;

    std::io::Write::write_all(&mut std::io::stdout(), &rendered.bytes)?;
    Ok(())
}

/// A placeholder "node" standing in for the controller host itself, since
/// DHCP/hosts/ssh templates describe the whole fleet rather than one node's
/// boot artifacts but `TemplateContext` always binds a primary node.
fn synthetic_controller_node() -> MergedNode {
    MergedNode {
        id: "controller".to_string(),
        valid: true,
        primary_netdev: None,
        comment: None,
        cluster_name: None,
        container: None,
        kernel_version: None,
        kernel_override: None,
        kernel_args: Vec::new(),
        ipxe_template: None,
        init: None,
        root: None,
        asset_key: None,
        system_overlay: Vec::new(),
        runtime_overlay: Vec::new(),
        discoverable: false,
        ipmi: Default::default(),
        network_devices: Default::default(),
        tags: Default::default(),
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
