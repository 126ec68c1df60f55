//! `cinder profile add|set|list|delete` (§6).

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::commands::field_args::{self, FieldArgs};
use crate::config;
use crate::domain::store::ConfigStore;
use crate::util::validate_name;

#[derive(Subcommand)]
pub enum ProfileCommands {
    Add {
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    Set {
        id: String,
        #[command(flatten)]
        fields: FieldArgs,
    },
    List,
    Delete { id: String },
}

pub fn run(cmd: &ProfileCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(cmd))
}

async fn run_async(cmd: &ProfileCommands) -> Result<()> {
    let path = config::default_nodes_path();
    let mut store = if path.exists() {
        ConfigStore::open(&path).await.context("loading node/profile document")?
    } else {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.ok();
        }
        ConfigStore::empty(&path)
    };

    match cmd {
        ProfileCommands::Add { id, fields } => {
            validate_name(id)?;
            store.add_profile(id)?;
            let mut record = store.get_profile_raw(id)?;
            field_args::apply(&mut record, fields)?;
            store.update_profile(id, record)?;
            store.persist().await?;
            println!("{} added profile {}", "::".blue().bold(), id.green());
            Ok(())
        }
        ProfileCommands::Set { id, fields } => {
            let mut record = store.get_profile_raw(id)?;
            field_args::apply(&mut record, fields)?;
            store.update_profile(id, record)?;
            store.persist().await?;
            println!("{} updated profile {}", "::".blue().bold(), id.green());
            Ok(())
        }
        ProfileCommands::List => {
            for id in store.list_profiles() {
                println!("{id}");
            }
            Ok(())
        }
        ProfileCommands::Delete { id } => {
            store.delete_profile(id)?;
            store.persist().await?;
            println!("{} deleted profile {}", "::".blue().bold(), id.green());
            Ok(())
        }
    }
}
