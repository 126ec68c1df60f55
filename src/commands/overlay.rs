//! `cinder overlay build|list|delete|show` — drives C5/C6 directly (§6).

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;

use crate::config::{self, ControllerConfig};
use crate::domain::merge;
use crate::domain::store::ConfigStore;
use crate::overlay::{self, ImageKey, OverlayContext};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ContextArg {
    System,
    Runtime,
}

impl From<ContextArg> for OverlayContext {
    fn from(c: ContextArg) -> Self {
        match c {
            ContextArg::System => OverlayContext::System,
            ContextArg::Runtime => OverlayContext::Runtime,
        }
    }
}

#[derive(Subcommand)]
pub enum OverlayCommands {
    /// Render and build the overlay image for a node, bypassing staleness
    /// checks (an operator-invoked rebuild is always unconditional).
    Build {
        node: String,
        #[arg(long, value_enum, default_value = "system")]
        context: ContextArg,
        /// Explicit overlay name list; defaults to the node's own
        /// system/runtime overlay list.
        #[arg(long)]
        overlay: Vec<String>,
    },
    /// List cached overlay images on disk.
    List,
    /// Delete a node's cached overlay image.
    Delete {
        node: String,
        #[arg(long, value_enum, default_value = "system")]
        context: ContextArg,
        #[arg(long)]
        overlay: Vec<String>,
    },
    /// Show the overlay names and cache path that would be used for a node.
    Show {
        node: String,
        #[arg(long, value_enum, default_value = "system")]
        context: ContextArg,
    },
}

pub fn run(cmd: &OverlayCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: &OverlayCommands) -> Result<()> {
    let controller = config::load(&config::default_config_path())?;
    let nodes_path = config::default_nodes_path();
    let store = ConfigStore::open(&nodes_path).await.context("loading node/profile document")?;

    match cmd {
        OverlayCommands::Build { node, context, overlay } => {
            build(&store, &controller, node, (*context).into(), overlay).await
        }
        OverlayCommands::List => list(&controller),
        OverlayCommands::Delete { node, context, overlay } => {
            delete(&store, &controller, node, (*context).into(), overlay)
        }
        OverlayCommands::Show { node, context } => show(&store, node, (*context).into()),
    }
}

fn overlay_names_for(node: &crate::domain::MergedNode, context: OverlayContext, explicit: &[String]) -> Vec<String> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    match context {
        OverlayContext::System => node.system_overlay.clone(),
        OverlayContext::Runtime => node.runtime_overlay.clone(),
        OverlayContext::Legacy => explicit.to_vec(),
    }
}

async fn build(
    store: &ConfigStore,
    controller: &ControllerConfig,
    node_id: &str,
    context: OverlayContext,
    explicit: &[String],
) -> Result<()> {
    let (node, _) = merge::resolve(store, node_id)?;
    let all_nodes = merge::resolve_all(store)?;
    let overlay_names = overlay_names_for(&node, context, explicit);

    let key = ImageKey::new(node_id, &overlay_names, context);
    let dest_path = key.cache_path(&controller.paths.overlay_cache_dir);

    let build_host = hostname_for_build();
    let build_time = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    overlay::build(
        &controller.paths.overlay_dir,
        &controller.paths.container_dir,
        &controller.paths.config_dir,
        &overlay_names,
        &node,
        &all_nodes,
        controller,
        context,
        &dest_path,
        &build_host,
        build_time,
    )?;

    println!(
        "{} built {} overlay for {} -> {}",
        "::".blue().bold(),
        context.as_str(),
        node_id.green(),
        dest_path.display()
    );
    Ok(())
}

fn hostname_for_build() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "cinder".to_string())
}

fn list(controller: &ControllerConfig) -> Result<()> {
    let dir = &controller.paths.overlay_cache_dir;
    if !dir.exists() {
        println!("(no cached overlay images under {})", dir.display());
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(std::result::Result::ok) {
        if entry.file_type().is_file() {
            println!("{}", entry.path().display());
        }
    }
    Ok(())
}

fn delete(
    store: &ConfigStore,
    controller: &ControllerConfig,
    node_id: &str,
    context: OverlayContext,
    explicit: &[String],
) -> Result<()> {
    let (node, _) = merge::resolve(store, node_id)?;
    let overlay_names = overlay_names_for(&node, context, explicit);
    let key = ImageKey::new(node_id, &overlay_names, context);
    let path = key.cache_path(&controller.paths.overlay_cache_dir);
    if path.exists() {
        std::fs::remove_file(&path)?;
        println!("{} deleted {}", "::".blue().bold(), path.display());
    } else {
        println!("(nothing cached at {})", path.display());
    }
    Ok(())
}

fn show(store: &ConfigStore, node_id: &str, context: OverlayContext) -> Result<()> {
    let (node, _) = merge::resolve(store, node_id)?;
    let overlay_names = overlay_names_for(&node, context, &[]);
    println!("{} {}", "node:".bold(), node_id.green().bold());
    println!("  context: {}", context.as_str());
    println!("  overlays: {}", overlay_names.join(","));
    Ok(())
}
