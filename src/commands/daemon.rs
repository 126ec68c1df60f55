//! `cinder daemon` — runs the provisioning HTTP server (§4.7-4.8, §5).

use anyhow::Result;

use crate::config;

pub fn run(config_path: Option<String>, nodes_path: Option<String>) -> Result<()> {
    let config_path = config_path.map(Into::into).unwrap_or_else(config::default_config_path);
    let nodes_path = nodes_path.map(Into::into).unwrap_or_else(config::default_nodes_path);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(config_path, nodes_path))
}
