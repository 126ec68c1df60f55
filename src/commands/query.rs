//! `cinder query ready|nodes` — a thin HTTP client against the daemon's
//! plaintext `/info/ready`/`/info/nodes` endpoints (§6, §4.8). There is no
//! JSON surface to ask for; both commands just print what the daemon sent.

use anyhow::Result;
use clap::Subcommand;

use crate::client::CinderClient;

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Per-node last-boot-stage readiness report (`/info/ready`).
    Ready,
    /// Merged node listing (`/info/nodes`).
    Nodes,
}

pub fn run(target: Option<&str>, command: &QueryCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(target, command))
}

async fn run_async(target: Option<&str>, command: &QueryCommands) -> Result<()> {
    let client = CinderClient::from_target(target)?;
    let body = match command {
        QueryCommands::Ready => client.ready().await?,
        QueryCommands::Nodes => client.nodes().await?,
    };
    print!("{body}");
    Ok(())
}
