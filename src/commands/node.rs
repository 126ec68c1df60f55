//! `cinder node add|set|list|delete` — the sole node mutation path (§6).

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::commands::field_args::{self, FieldArgs};
use crate::config;
use crate::domain::store::ConfigStore;
use crate::util::{expand_pattern, offset_ipv4, validate_name};

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Add one or more nodes. `id` may be a bracketed range, e.g. `n[01-03]`.
    Add {
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Update an existing node's fields.
    Set {
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// List all node ids.
    List,
    /// Delete a node.
    Delete { id: String },
    /// Show a node's merged view and field provenance.
    Show { id: String },
}

pub fn run(cmd: &NodeCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: &NodeCommands) -> Result<()> {
    let path = config::default_nodes_path();
    let mut store = open_or_create(&path).await?;

    match cmd {
        NodeCommands::Add { id, fields } => add(&mut store, id, fields).await,
        NodeCommands::Set { id, fields } => set(&mut store, id, fields).await,
        NodeCommands::List => {
            for id in store.list_nodes() {
                println!("{id}");
            }
            Ok(())
        }
        NodeCommands::Delete { id } => {
            store.delete_node(id)?;
            store.persist().await?;
            println!("{} deleted node {}", "::".blue().bold(), id.green());
            Ok(())
        }
        NodeCommands::Show { id } => show(&store, id),
    }
}

async fn open_or_create(path: &std::path::Path) -> Result<ConfigStore> {
    if path.exists() {
        ConfigStore::open(path).await.context("loading node/profile document")
    } else {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.ok();
        }
        let mut store = ConfigStore::empty(path);
        if store.get_profile_raw("default").is_err() {
            store.add_profile("default")?;
        }
        store.persist().await?;
        Ok(store)
    }
}

async fn add(store: &mut ConfigStore, id_pattern: &str, fields: &FieldArgs) -> Result<()> {
    let ids = expand_pattern(id_pattern)?;
    let base_ipaddr = fields.ipaddr.clone();

    for (i, id) in ids.iter().enumerate() {
        validate_name(id)?;
        store.add_node(id)?;
        let mut record = store.get_node_raw(id)?;

        let mut per_node_fields = FieldArgs { ipaddr: None, ..fields.clone() };
        if let Some(base) = &base_ipaddr {
            per_node_fields.ipaddr = Some(offset_ipv4(base, i as u32)?);
        }
        field_args::apply(&mut record.profile, &per_node_fields)?;
        store.update_node(id, record)?;
        println!("{} added node {}", "::".blue().bold(), id.green());
    }

    store.persist().await?;
    Ok(())
}

async fn set(store: &mut ConfigStore, id: &str, fields: &FieldArgs) -> Result<()> {
    let mut record = store.get_node_raw(id)?;
    field_args::apply(&mut record.profile, fields)?;
    store.update_node(id, record)?;
    store.persist().await?;
    println!("{} updated node {}", "::".blue().bold(), id.green());
    Ok(())
}

fn show(store: &ConfigStore, id: &str) -> Result<()> {
    let (merged, provenance) = crate::domain::merge::resolve(store, id)?;
    println!("{} {}", "node:".bold(), merged.id.green().bold());
    println!("  comment:         {}", field_line(&merged.comment, provenance.get("comment")));
    println!("  cluster name:    {}", field_line(&merged.cluster_name, provenance.get("cluster_name")));
    println!("  container:       {}", field_line(&merged.container, provenance.get("container")));
    println!("  kernel version:  {}", field_line(&merged.kernel_version, provenance.get("kernel_version")));
    println!("  kernel override: {}", field_line(&merged.kernel_override, provenance.get("kernel_override")));
    println!("  kernel args:     {}", merged.kernel_args.join(" "));
    println!("  system overlay:  {}", merged.system_overlay.join(","));
    println!("  runtime overlay: {}", merged.runtime_overlay.join(","));
    println!("  discoverable:    {}", merged.discoverable);
    println!("  primary netdev:  {}", merged.primary_netdev.as_deref().unwrap_or("--"));
    for (name, dev) in &merged.network_devices {
        println!(
            "  netdev {name}: hwaddr={} ipaddr={} primary={}",
            dev.hwaddr.as_deref().unwrap_or("--"),
            dev.ipaddr.as_deref().unwrap_or("--"),
            dev.primary
        );
    }
    Ok(())
}

fn field_line(value: &Option<String>, source: Option<&String>) -> String {
    match (value, source) {
        (Some(v), Some(s)) if s.is_empty() => v.clone(),
        (Some(v), Some(s)) => format!("{v}  ({s})"),
        (Some(v), None) => v.clone(),
        (None, _) => "--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_with_no_fields_defaults_to_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let mut store = open_or_create(&path).await.unwrap();

        add(&mut store, "n01", &FieldArgs::default()).await.unwrap();

        let record = store.get_node_raw("n01").unwrap();
        assert!(record.profiles.get().is_empty());
        assert_eq!(record.profile_seed(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn bracketed_range_add_assigns_consecutive_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let mut store = open_or_create(&path).await.unwrap();

        let fields = FieldArgs { ipaddr: Some("10.10.0.1".to_string()), ..FieldArgs::default() };
        add(&mut store, "n[01-03]", &fields).await.unwrap();

        assert_eq!(
            store.list_nodes(),
            vec!["n01".to_string(), "n02".to_string(), "n03".to_string()]
        );
        let addrs: Vec<String> = ["n01", "n02", "n03"]
            .iter()
            .map(|id| {
                store
                    .get_node_raw(id)
                    .unwrap()
                    .profile
                    .network_devices
                    .get("default")
                    .and_then(|d| d.ipaddr.get())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        assert_eq!(addrs, vec!["10.10.0.1", "10.10.0.2", "10.10.0.3"]);
    }
}
