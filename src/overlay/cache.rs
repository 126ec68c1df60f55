//! Overlay cache & build coordinator (C6).
//!
//! Single-flight build coordination: `Mutex<HashMap<ImageKey, Arc<InFlight>>>`
//! plus a `Notify` per in-flight build. The first caller for a key builds
//! and wakes everyone else; a failed build removes its own entry so the
//! next caller retries rather than replaying a cached failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, Notify, OnceCell};

use crate::config::ControllerConfig;
use crate::domain::node::MergedNode;
use crate::error::{CinderError, CinderResult};
use crate::overlay::builder::{self, OverlayContext};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageKey {
    pub node_id: String,
    /// Sorted, deduplicated overlay names — used for the cache path and
    /// for hashing/equality. The builder itself walks overlays in the
    /// caller-supplied (config) order, which is tracked separately so
    /// layering semantics are preserved even though the key is sorted.
    pub overlays: Vec<String>,
    pub context: OverlayContext,
}

impl ImageKey {
    pub fn new(node_id: &str, overlay_names: &[String], context: OverlayContext) -> Self {
        let mut overlays: Vec<String> = overlay_names.to_vec();
        overlays.sort();
        overlays.dedup();
        Self { node_id: node_id.to_string(), overlays, context }
    }

    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        let joined = self.overlays.join("-");
        let joined = if joined.is_empty() { "empty".to_string() } else { joined };
        cache_dir
            .join(&self.node_id)
            .join(format!("{joined}.{}.img.gz", self.context.as_str()))
    }
}

struct InFlight {
    notify: Notify,
    result: OnceCell<Result<PathBuf, String>>,
}

/// Parameters required to (re)build one image, threaded through from the
/// provisioning handler so the coordinator itself stays source-agnostic.
pub struct BuildRequest<'a> {
    pub overlay_dir: &'a Path,
    pub container_dir: &'a Path,
    pub config_dir: &'a Path,
    pub cache_dir: &'a Path,
    pub overlay_names: &'a [String],
    pub node: &'a MergedNode,
    pub all_nodes: &'a [MergedNode],
    pub controller: &'a ControllerConfig,
    pub context: OverlayContext,
    pub build_host: &'a str,
    pub node_record_mtime: Option<SystemTime>,
    pub config_mtime: Option<SystemTime>,
    pub autobuild: bool,
}

#[derive(Default)]
pub struct BuildCoordinator {
    inflight: Mutex<HashMap<ImageKey, Arc<InFlight>>>,
}

impl BuildCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the path to an up-to-date image for `key`, building it if
    /// necessary (subject to `request.autobuild`).
    pub async fn get_or_build(&self, key: ImageKey, request: BuildRequest<'_>) -> CinderResult<PathBuf> {
        let dest_path = key.cache_path(request.cache_dir);

        if !is_stale(&dest_path, &request) {
            return Ok(dest_path);
        }

        if !request.autobuild {
            if dest_path.exists() {
                tracing::warn!(path = %dest_path.display(), "serving stale overlay image, autobuild disabled");
                return Ok(dest_path);
            }
            return Err(CinderError::not_found(format!(
                "overlay image for {} not built and autobuild disabled",
                key.node_id
            )));
        }

        let existing_or_new = {
            let mut guard = self.inflight.lock().await;
            if let Some(existing) = guard.get(&key) {
                Some(existing.clone())
            } else {
                let entry = Arc::new(InFlight { notify: Notify::new(), result: OnceCell::new() });
                guard.insert(key.clone(), entry.clone());
                None
            }
        };

        if let Some(inflight) = existing_or_new {
            // Someone else is already building this key; wait for them.
            loop {
                if let Some(result) = inflight.result.get() {
                    return result
                        .clone()
                        .map_err(|msg| CinderError::Configuration(msg));
                }
                inflight.notify.notified().await;
            }
        }

        // We are the builder for this key.
        let build_result = builder::build(
            request.overlay_dir,
            request.container_dir,
            request.config_dir,
            request.overlay_names,
            request.node,
            request.all_nodes,
            request.controller,
            request.context,
            &dest_path,
            request.build_host,
            chrono_now_unix(),
        );

        let mut guard = self.inflight.lock().await;
        let inflight = guard.remove(&key).expect("this task registered the inflight entry");
        drop(guard);

        match build_result {
            Ok(()) => {
                let _ = inflight.result.set(Ok(dest_path.clone()));
                inflight.notify.notify_waiters();
                Ok(dest_path)
            }
            Err(err) => {
                let msg = err.to_string();
                let _ = inflight.result.set(Err(msg.clone()));
                inflight.notify.notify_waiters();
                Err(CinderError::Configuration(msg))
            }
        }
    }
}

fn is_stale(dest_path: &Path, request: &BuildRequest<'_>) -> bool {
    let image_mtime = match std::fs::metadata(dest_path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return true,
    };

    if let Some(node_mtime) = request.node_record_mtime {
        if node_mtime > image_mtime {
            return true;
        }
    }
    if let Some(config_mtime) = request.config_mtime {
        if config_mtime > image_mtime {
            return true;
        }
    }

    for name in request.overlay_names {
        let root = request.overlay_dir.join(name);
        if let Some(newest) = newest_mtime_under(&root) {
            if newest > image_mtime {
                return true;
            }
        }
    }

    false
}

/// Walk `root`'s subtree and return the most recent file mtime found. A
/// directory's own mtime does not change when a file nested inside it is
/// edited in place, so the cache must compare against file mtimes directly
/// rather than the overlay root's `std::fs::metadata`.
fn newest_mtime_under(root: &Path) -> Option<SystemTime> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .filter_map(|meta| meta.modified().ok())
        .max()
}

fn chrono_now_unix() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> MergedNode {
        MergedNode {
            id: "n01".to_string(),
            valid: true,
            primary_netdev: None,
            comment: None,
            cluster_name: None,
            container: None,
            kernel_version: None,
            kernel_override: None,
            kernel_args: vec![],
            ipxe_template: None,
            init: None,
            root: None,
            asset_key: None,
            system_overlay: vec![],
            runtime_overlay: vec![],
            discoverable: false,
            ipmi: Default::default(),
            network_devices: Default::default(),
            tags: Default::default(),
        }
    }

    fn leaked_request(
        overlay_dir: &'static Path,
        container_dir: &'static Path,
        config_dir: &'static Path,
        cache_dir: &'static Path,
        node_record_mtime: Option<SystemTime>,
    ) -> BuildRequest<'static> {
        let overlay_names: &'static [String] = Box::leak(Box::new(Vec::new()));
        let node: &'static MergedNode = Box::leak(Box::new(sample_node()));
        let all_nodes: &'static [MergedNode] = Box::leak(Box::new(Vec::new()));
        let controller: &'static ControllerConfig = Box::leak(Box::new(ControllerConfig::default()));

        BuildRequest {
            overlay_dir,
            container_dir,
            config_dir,
            cache_dir,
            overlay_names,
            node,
            all_nodes,
            controller,
            context: OverlayContext::Runtime,
            build_host: "test-host",
            node_record_mtime,
            config_mtime: None,
            autobuild: true,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_for_the_same_key_converge_on_one_build() {
        let dir = tempfile::tempdir().unwrap();
        let overlay_dir: &'static Path = Box::leak(dir.path().join("overlays").into_boxed_path());
        let container_dir: &'static Path = Box::leak(dir.path().join("containers").into_boxed_path());
        let config_dir: &'static Path = Box::leak(dir.path().join("config").into_boxed_path());
        let cache_dir: &'static Path = Box::leak(dir.path().join("cache").into_boxed_path());

        let coordinator = Arc::new(BuildCoordinator::new());
        let key = ImageKey::new("n01", &[], OverlayContext::Runtime);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            let key = key.clone();
            let request = leaked_request(overlay_dir, container_dir, config_dir, cache_dir, None);
            handles.push(tokio::spawn(async move { coordinator.get_or_build(key, request).await }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }

        let first = &paths[0];
        assert!(paths.iter().all(|p| p == first));
        assert!(first.exists());

        // std::mem::forget the tempdir handle isn't needed: `dir` stays in
        // scope until the end of the test, keeping the backing directory
        // alive for the leaked 'static paths above.
        drop(dir);
    }

    #[tokio::test]
    async fn stale_node_record_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let overlay_dir: &'static Path = Box::leak(dir.path().join("overlays").into_boxed_path());
        let container_dir: &'static Path = Box::leak(dir.path().join("containers").into_boxed_path());
        let config_dir: &'static Path = Box::leak(dir.path().join("config").into_boxed_path());
        let cache_dir: &'static Path = Box::leak(dir.path().join("cache").into_boxed_path());

        let coordinator = BuildCoordinator::new();
        let key = ImageKey::new("n01", &[], OverlayContext::Runtime);

        let first = coordinator
            .get_or_build(key.clone(), leaked_request(overlay_dir, container_dir, config_dir, cache_dir, None))
            .await
            .unwrap();
        let first_mtime = std::fs::metadata(&first).unwrap().modified().unwrap();

        // Re-requesting with no newer mtimes at all serves the fresh image
        // without rebuilding.
        let second = coordinator
            .get_or_build(key.clone(), leaked_request(overlay_dir, container_dir, config_dir, cache_dir, None))
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), first_mtime);

        std::thread::sleep(std::time::Duration::from_millis(20));
        let third = coordinator
            .get_or_build(
                key,
                leaked_request(overlay_dir, container_dir, config_dir, cache_dir, Some(SystemTime::now())),
            )
            .await
            .unwrap();
        let third_mtime = std::fs::metadata(&third).unwrap().modified().unwrap();
        assert!(third_mtime > first_mtime);
    }

    #[tokio::test]
    async fn in_place_edit_of_an_overlay_file_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let overlay_dir: &'static Path = Box::leak(dir.path().join("overlays").into_boxed_path());
        let container_dir: &'static Path = Box::leak(dir.path().join("containers").into_boxed_path());
        let config_dir: &'static Path = Box::leak(dir.path().join("config").into_boxed_path());
        let cache_dir: &'static Path = Box::leak(dir.path().join("cache").into_boxed_path());

        let generic = overlay_dir.join("generic");
        std::fs::create_dir_all(&generic).unwrap();
        let template_path = generic.join("motd");
        std::fs::write(&template_path, "hello").unwrap();

        let overlay_names: &'static [String] = Box::leak(Box::new(vec!["generic".to_string()]));
        let node: &'static MergedNode = Box::leak(Box::new(sample_node()));
        let all_nodes: &'static [MergedNode] = Box::leak(Box::new(Vec::new()));
        let controller: &'static ControllerConfig = Box::leak(Box::new(ControllerConfig::default()));

        let request = |node_record_mtime: Option<SystemTime>| BuildRequest {
            overlay_dir,
            container_dir,
            config_dir,
            cache_dir,
            overlay_names,
            node,
            all_nodes,
            controller,
            context: OverlayContext::Runtime,
            build_host: "test-host",
            node_record_mtime,
            config_mtime: None,
            autobuild: true,
        };

        let coordinator = BuildCoordinator::new();
        let key = ImageKey::new("n01", overlay_names, OverlayContext::Runtime);

        let first = coordinator.get_or_build(key.clone(), request(None)).await.unwrap();
        let first_mtime = std::fs::metadata(&first).unwrap().modified().unwrap();

        // A no-op re-request serves the cached image.
        let second = coordinator.get_or_build(key.clone(), request(None)).await.unwrap();
        assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), first_mtime);

        // Editing the file in place (not its parent directory) must still be
        // observed: only the file's own mtime moves forward on Linux.
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&template_path, "hello, updated").unwrap();
        let file_mtime = std::fs::metadata(&template_path).unwrap().modified().unwrap();
        assert!(file_mtime > first_mtime);

        let third = coordinator.get_or_build(key, request(None)).await.unwrap();
        let third_mtime = std::fs::metadata(&third).unwrap().modified().unwrap();
        assert!(third_mtime > first_mtime);
    }
}
