//! `cinder container import|list|delete` — a thin stub (§6): no OCI
//! registry client is built (named out of scope); `list`/`delete` only
//! operate on the configured container directory's immediate subdirectories.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::config;

#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Pull a container image into the container directory (not implemented
    /// here — use an external OCI puller, e.g. `skopeo`/`umoci`, and unpack
    /// into `<container_dir>/<name>/rootfs`).
    Import { name: String },
    /// List container names present under the container directory.
    List,
    /// Delete a container's directory.
    Delete { name: String },
}

pub fn run(cmd: &ContainerCommands) -> Result<()> {
    let controller = config::load(&config::default_config_path())?;

    match cmd {
        ContainerCommands::Import { name } => {
            eprintln!(
                "{} cinder does not pull container images itself; unpack an OCI image's\n  rootfs into {}/{}/rootfs with an external tool (skopeo, umoci, ...)",
                "error:".red().bold(),
                controller.paths.container_dir.display(),
                name
            );
            std::process::exit(1);
        }
        ContainerCommands::List => {
            let dir = &controller.paths.container_dir;
            if !dir.exists() {
                println!("(no containers under {})", dir.display());
                return Ok(());
            }
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        println!("{name}");
                    }
                }
            }
            Ok(())
        }
        ContainerCommands::Delete { name } => {
            let path = controller.paths.container_dir.join(name);
            if !path.exists() {
                println!("(no container named {name})");
                return Ok(());
            }
            std::fs::remove_dir_all(&path)?;
            println!("{} deleted container {}", "::".blue().bold(), name.green());
            Ok(())
        }
    }
}
