//! Configuration store (C1): the in-memory handle over the profiles/nodes
//! document plus atomic persistence.
//!
//! Mirrors the teacher's `ReportStore::write` tmp-file-then-rename pattern,
//! generalized from a single cached report to the whole configuration
//! document, and the Go source's `GetNode` deep-copy discipline — raw
//! accessors here always return an owned clone, never a reference into the
//! live document, so callers cannot observe or cause aliasing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{CinderError, CinderResult};

use super::node::NodeRecord;
use super::profile::ProfileRecord;

/// The crate's current understanding of the document schema. A document
/// whose `schema_version` differs is still loaded — only a structural
/// parse failure is fatal.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default = "default_schema_version", rename = "WW_INTERNAL")]
    pub schema_version: u32,
    #[serde(default, rename = "nodeprofiles")]
    pub profiles: BTreeMap<String, ProfileRecord>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeRecord>,
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            profiles: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }
}

/// Guards writes so two concurrent CLI invocations (or a CLI invocation
/// racing the daemon's discovery-bind path) never interleave a
/// load-mutate-persist cycle. Reads do not need the lock; `ConfigStore` is
/// meant to be used by a single owner per process (the CLI command, or the
/// daemon's `ServerState` snapshot — see `server.rs`).
pub struct ConfigStore {
    path: PathBuf,
    doc: ConfigDocument,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the document from `path`. A missing file is fatal (matching
    /// spec's "missing file or parse error -> fatal to the caller"); callers
    /// that want a fresh document should create one explicitly via
    /// `ConfigStore::empty` and `persist()` it first.
    pub async fn open(path: impl Into<PathBuf>) -> CinderResult<Self> {
        let path = path.into();
        let bytes = tokio::fs::read(&path).await?;
        let doc: ConfigDocument = serde_yaml::from_slice(&bytes)?;
        if doc.schema_version != CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                found = doc.schema_version,
                expected = CURRENT_SCHEMA_VERSION,
                "configuration document schema version mismatch, proceeding"
            );
        }
        Ok(Self { path, doc, write_lock: Mutex::new(()) })
    }

    /// Create a fresh, empty document at `path` (not yet persisted).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), doc: ConfigDocument::default(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.doc
    }

    pub fn get_node_raw(&self, id: &str) -> CinderResult<NodeRecord> {
        self.doc
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| CinderError::not_found(format!("node {id}")))
    }

    pub fn get_profile_raw(&self, id: &str) -> CinderResult<ProfileRecord> {
        self.doc
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| CinderError::not_found(format!("profile {id}")))
    }

    /// Deterministic (lexicographic) id list — `BTreeMap` keys are already
    /// sorted, so this is just a clone of the key iterator.
    pub fn list_nodes(&self) -> Vec<String> {
        self.doc.nodes.keys().cloned().collect()
    }

    pub fn list_profiles(&self) -> Vec<String> {
        self.doc.profiles.keys().cloned().collect()
    }

    pub fn add_node(&mut self, id: &str) -> CinderResult<()> {
        if self.doc.nodes.contains_key(id) {
            return Err(CinderError::conflict(format!("node {id} already exists")));
        }
        self.doc.nodes.insert(id.to_string(), NodeRecord::new());
        Ok(())
    }

    pub fn update_node(&mut self, id: &str, record: NodeRecord) -> CinderResult<()> {
        if !self.doc.nodes.contains_key(id) {
            return Err(CinderError::not_found(format!("node {id}")));
        }
        self.doc.nodes.insert(id.to_string(), record);
        Ok(())
    }

    pub fn delete_node(&mut self, id: &str) -> CinderResult<()> {
        self.doc
            .nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CinderError::not_found(format!("node {id}")))
    }

    pub fn add_profile(&mut self, id: &str) -> CinderResult<()> {
        if self.doc.profiles.contains_key(id) {
            return Err(CinderError::conflict(format!("profile {id} already exists")));
        }
        self.doc.profiles.insert(id.to_string(), ProfileRecord::new());
        Ok(())
    }

    pub fn update_profile(&mut self, id: &str, record: ProfileRecord) -> CinderResult<()> {
        if !self.doc.profiles.contains_key(id) {
            return Err(CinderError::not_found(format!("profile {id}")));
        }
        self.doc.profiles.insert(id.to_string(), record);
        Ok(())
    }

    pub fn delete_profile(&mut self, id: &str) -> CinderResult<()> {
        self.doc
            .profiles
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CinderError::not_found(format!("profile {id}")))
    }

    /// Atomic write: serialize to a temp file in the document's own
    /// directory, fsync, then rename over the real path.
    pub async fn persist(&self) -> CinderResult<()> {
        let _guard = self.write_lock.lock().await;
        let bytes = serde_yaml::to_string(&self.doc)
            .map_err(CinderError::from)?
            .into_bytes();

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("cinder-config")
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &self.path).await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persist_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.yaml");
        let mut store = ConfigStore::empty(&path);
        store.add_profile("default").unwrap();
        store.add_node("n1").unwrap();
        store.persist().await.unwrap();

        let reopened = ConfigStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_nodes(), vec!["n1".to_string()]);
        assert_eq!(reopened.list_profiles(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn unknown_node_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        assert!(matches!(store.get_node_raw("missing"), Err(CinderError::NotFound(_))));
    }

    #[tokio::test]
    async fn add_node_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::empty(dir.path().join("nodes.yaml"));
        store.add_node("n1").unwrap();
        assert!(matches!(store.add_node("n1"), Err(CinderError::Conflict(_))));
    }
}
