//! Provisioning Request Handler (C7) and the plaintext info endpoints (§4.7,
//! §6). One axum `Router` mounted on `ServerState`; the pipeline is parse →
//! resolve → authorize → dispatch → compression negotiation → stream →
//! record status, each step its own function per the ordering guarantee in
//! §5.

use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{body::Body, Router};
use serde::Deserialize;

use crate::discovery::Stage;
use crate::domain::merge;
use crate::domain::node::MergedNode;
use crate::error::{CinderError, CinderResult};
use crate::overlay::{BuildRequest, ImageKey, OverlayContext};
use crate::server::{ConfigSnapshot, ServerState};
use crate::template::Renderer;

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/provision/{stage}", get(provision))
        .route("/info/nodes", get(info_nodes))
        .route("/info/ready", get(info_ready))
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionStage {
    Ipxe,
    GrubCfg,
    Kernel,
    Kmods,
    Container,
    Shim,
    Grub,
    System,
    Runtime,
}

impl ProvisionStage {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ipxe" => Self::Ipxe,
            "grub.cfg" => Self::GrubCfg,
            "kernel" => Self::Kernel,
            "kmods" => Self::Kmods,
            "container" => Self::Container,
            "shim" => Self::Shim,
            "grub" => Self::Grub,
            "system" => Self::System,
            "runtime" => Self::Runtime,
            _ => return None,
        })
    }

    fn is_rendered_template(self) -> bool {
        matches!(self, Self::Ipxe | Self::GrubCfg)
    }

    /// The bucket this URL-level stage rolls up to in the five-valued
    /// status record vocabulary (spec.md §3) — documented mapping, see
    /// DESIGN.md.
    fn status_stage(self) -> Stage {
        match self {
            Self::Ipxe | Self::GrubCfg => Stage::Ipxe,
            Self::Kernel | Self::Container => Stage::Kernel,
            Self::Kmods | Self::Shim | Self::Grub => Stage::KmodsOverlay,
            Self::System => Stage::SystemOverlay,
            Self::Runtime => Stage::RuntimeOverlay,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProvisionParams {
    hwaddr: Option<String>,
    assetkey: Option<String>,
    overlay: Option<String>,
    compress: Option<String>,
}

async fn provision(
    State(state): State<Arc<ServerState>>,
    Path(stage_raw): Path<String>,
    Query(params): Query<ProvisionParams>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    match provision_inner(&state, &stage_raw, &params, remote).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::info!(
                hwaddr = params.hwaddr.as_deref().unwrap_or(""),
                remote = %remote,
                stage = %stage_raw,
                error = %err,
                "provisioning request failed"
            );
            err.into_response()
        }
    }
}

async fn provision_inner(
    state: &ServerState,
    stage_raw: &str,
    params: &ProvisionParams,
    remote: SocketAddr,
) -> CinderResult<Response> {
    // 1. Parse.
    let stage = ProvisionStage::parse(stage_raw)
        .ok_or_else(|| CinderError::invalid(format!("unknown stage '{stage_raw}'")))?;
    let hwaddr = params
        .hwaddr
        .clone()
        .ok_or_else(|| CinderError::invalid("missing hwaddr"))?;

    // 2. Resolve node.
    let snapshot = state.current().await;
    let node_id = resolve_node_id(state, &snapshot, &hwaddr).await?;

    let node_id = match node_id {
        Some(id) => id,
        None if stage == ProvisionStage::Ipxe => {
            let artifact = "unconfigured.ipxe";
            state
                .status
                .record(&hwaddr, Stage::Ipxe, artifact, remote.ip())
                .await;
            return Ok(render_unconfigured(&hwaddr));
        }
        None => {
            return Err(CinderError::unavailable(format!(
                "no node resolved for hardware address {hwaddr}"
            )))
        }
    };

    // Node resolution may have raced a reload; re-fetch against the latest
    // snapshot so a just-bound discoverable node is visible immediately.
    let snapshot = state.current().await;
    let (node, _) = merge::resolve(&snapshot.store, &node_id)?;

    // 3. Authorize.
    if let Err(err) = authorize(&node, params, &snapshot.controller, remote, stage) {
        state
            .status
            .record(&node.id, stage.status_stage(), "BAD_ASSET", remote.ip())
            .await;
        return Err(err);
    }

    // 4. Dispatch by stage.
    let outcome = dispatch(state, &snapshot, &node, stage, params).await;
    let outcome = match outcome {
        Ok(o) => o,
        Err(err) => {
            let artifact = match &err {
                CinderError::NotFound(_) => "NOT_FOUND",
                CinderError::InvalidInput(_) => "BAD_REQUEST",
                _ => "BAD_REQUEST",
            };
            state
                .status
                .record(&node.id, stage.status_stage(), artifact, remote.ip())
                .await;
            return Err(err);
        }
    };

    // 7. Record status (success path).
    state
        .status
        .record(&node.id, stage.status_stage(), &outcome.artifact, remote.ip())
        .await;

    Ok(outcome.into_response())
}

async fn resolve_node_id(
    state: &ServerState,
    snapshot: &ConfigSnapshot,
    hwaddr: &str,
) -> CinderResult<Option<String>> {
    if let Some(node) = merge::find_by_hwaddr(&snapshot.store, hwaddr)? {
        return Ok(Some(node.id));
    }

    if !snapshot.controller.warewulf.discoverable {
        return Ok(None);
    }

    match state.discovery.get_or_discover(hwaddr, true).await {
        Ok(node_id) => {
            if let Err(err) = state.reload().await {
                tracing::warn!(error = %err, "reload after discovery bind failed");
            }
            Ok(Some(node_id))
        }
        Err(_) => Ok(None),
    }
}

fn authorize(
    node: &MergedNode,
    params: &ProvisionParams,
    controller: &crate::config::ControllerConfig,
    remote: SocketAddr,
    stage: ProvisionStage,
) -> CinderResult<()> {
    if let Some(expected) = &node.asset_key {
        if params.assetkey.as_deref() != Some(expected.as_str()) {
            return Err(CinderError::unauthorized("asset key mismatch"));
        }
    }

    if controller.warewulf.secure && stage == ProvisionStage::Runtime && remote.port() >= 1024 {
        return Err(CinderError::unauthorized(
            "secure mode requires a privileged source port for runtime requests",
        ));
    }

    Ok(())
}

struct Artifact {
    bytes: Vec<u8>,
    content_type: &'static str,
    filename: String,
    artifact: String,
}

impl IntoResponse for Artifact {
    fn into_response(self) -> Response {
        let len = self.bytes.len();
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, self.content_type)
            .header(header::CONTENT_LENGTH, len)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", self.filename),
            )
            .body(Body::from(self.bytes))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

async fn dispatch(
    state: &ServerState,
    snapshot: &ConfigSnapshot,
    node: &MergedNode,
    stage: ProvisionStage,
    params: &ProvisionParams,
) -> CinderResult<Artifact> {
    let controller = &snapshot.controller;

    match stage {
        ProvisionStage::Ipxe | ProvisionStage::GrubCfg => {
            render_boot_template(snapshot, node, stage).await
        }
        ProvisionStage::Kernel => {
            if let Some(ovr) = &node.kernel_override {
                let path = controller.paths.kernel_dir.join(ovr);
                serve_file(&path, params.compress.as_deref()).await
            } else if let Some(container) = &node.container {
                let path = controller
                    .paths
                    .container_dir
                    .join(container)
                    .join("rootfs")
                    .join("boot")
                    .join("vmlinuz");
                if !path.exists() {
                    tracing::warn!(node = %node.id, container = %container, "no kernel extracted from container");
                }
                serve_file(&path, params.compress.as_deref()).await
            } else {
                tracing::warn!(node = %node.id, "no kernel override and no container configured");
                Err(CinderError::not_found("no kernel available"))
            }
        }
        ProvisionStage::Kmods => {
            let Some(ovr) = &node.kernel_override else {
                tracing::warn!(node = %node.id, "kmods requested but no kernel override set");
                return Err(CinderError::not_found("no kmods archive available"));
            };
            let path = controller.paths.kernel_dir.join(format!("{ovr}.kmods"));
            serve_file(&path, params.compress.as_deref()).await
        }
        ProvisionStage::Container => {
            let container = node
                .container
                .as_deref()
                .ok_or_else(|| CinderError::not_found("node has no container configured"))?;
            let path = controller
                .paths
                .container_dir
                .join(container)
                .join("rootfs.img");
            serve_file(&path, params.compress.as_deref()).await
        }
        ProvisionStage::Shim | ProvisionStage::Grub => {
            let container = node
                .container
                .as_deref()
                .ok_or_else(|| CinderError::not_found("node has no container configured"))?;
            let binary = if stage == ProvisionStage::Shim { "bootx64.efi" } else { "grubx64.efi" };
            let path = controller
                .paths
                .container_dir
                .join(container)
                .join("rootfs")
                .join("boot")
                .join(binary);
            serve_file(&path, params.compress.as_deref()).await
        }
        ProvisionStage::System => build_overlay(state, snapshot, node, OverlayContext::System, &node.system_overlay).await,
        ProvisionStage::Runtime => {
            if let Some(name) = &params.overlay {
                build_overlay(state, snapshot, node, OverlayContext::Legacy, std::slice::from_ref(name)).await
            } else {
                build_overlay(state, snapshot, node, OverlayContext::Runtime, &node.runtime_overlay).await
            }
        }
    }
}

async fn render_boot_template(
    snapshot: &ConfigSnapshot,
    node: &MergedNode,
    stage: ProvisionStage,
) -> CinderResult<Artifact> {
    let controller = &snapshot.controller;
    let dir = if stage == ProvisionStage::GrubCfg { &controller.paths.grub_dir } else { &controller.paths.ipxe_dir };
    let default_name = if stage == ProvisionStage::GrubCfg { "default.grub.cfg" } else { "default.ipxe" };
    let template_name = node.ipxe_template.clone().unwrap_or_else(|| default_name.to_string());
    let template_path = dir.join(&template_name);

    let source = tokio::fs::read_to_string(&template_path).await.map_err(|_| {
        CinderError::not_found(format!("boot template '{}' not found", template_path.display()))
    })?;

    let all_nodes = merge::resolve_all(&snapshot.store)?;
    let mut renderer = Renderer::new(controller.paths.config_dir.clone(), controller.paths.container_dir.clone())?;
    let build_time = unix_now();
    let rendered = renderer.render_str(
        &template_name,
        &source,
        node,
        &all_nodes,
        controller,
        "cinder",
        build_time,
    )?;

    Ok(Artifact {
        bytes: rendered.bytes,
        content_type: "text/plain",
        filename: template_name,
        artifact: if stage == ProvisionStage::GrubCfg { "grub.cfg".to_string() } else { "ipxe".to_string() },
    })
}

fn render_unconfigured(hwaddr: &str) -> Response {
    let body = format!("#!ipxe\n# unconfigured node, hwaddr={hwaddr}\necho cinder: no node claims this hardware address\nshell\n");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn build_overlay(
    state: &ServerState,
    snapshot: &ConfigSnapshot,
    node: &MergedNode,
    context: OverlayContext,
    overlay_names: &[String],
) -> CinderResult<Artifact> {
    let controller = &snapshot.controller;
    let all_nodes = merge::resolve_all(&snapshot.store)?;
    let key = ImageKey::new(&node.id, overlay_names, context);

    let node_record_mtime = tokio::fs::metadata(snapshot.store.path()).await.ok().and_then(|m| m.modified().ok());

    let dest_path = state
        .overlay_cache
        .get_or_build(
            key,
            BuildRequest {
                overlay_dir: &controller.paths.overlay_dir,
                container_dir: &controller.paths.container_dir,
                config_dir: &controller.paths.config_dir,
                cache_dir: &controller.paths.overlay_cache_dir,
                overlay_names,
                node,
                all_nodes: &all_nodes,
                controller,
                context,
                build_host: "cinder",
                node_record_mtime,
                config_mtime: None,
                autobuild: controller.warewulf.autobuild_overlays,
            },
        )
        .await
        .map_err(|err| CinderError::unavailable(err.to_string()))?;

    let bytes = tokio::fs::read(&dest_path)
        .await
        .map_err(|_| CinderError::not_found(format!("overlay image {} missing", dest_path.display())))?;
    let filename = dest_path.file_name().and_then(|n| n.to_str()).unwrap_or("overlay.img.gz").to_string();

    Ok(Artifact { bytes, content_type: "application/gzip", filename: filename.clone(), artifact: filename })
}

/// Serves a plain file from disk, honoring the `compress` negotiation step:
/// `""`/absent serves `path` itself, `gz` serves `path.gz`, anything else is
/// a 404 per the Open Question resolution in DESIGN.md.
async fn serve_file(path: &FsPath, compress: Option<&str>) -> CinderResult<Artifact> {
    let resolved = match compress {
        None | Some("") => path.to_path_buf(),
        Some("gz") => append_gz(path),
        Some(_) => return Err(CinderError::not_found("unknown compression token")),
    };

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| CinderError::not_found(format!("{} not found", resolved.display())))?;
    let filename = resolved.file_name().and_then(|n| n.to_str()).unwrap_or("artifact").to_string();
    let content_type = sniff_content_type(&bytes);

    Ok(Artifact { bytes, content_type, filename: filename.clone(), artifact: filename })
}

fn append_gz(path: &FsPath) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".gz");
    PathBuf::from(os)
}

/// Minimal magic-byte sniffer covering the artifact kinds this daemon ever
/// serves — gzip overlays/kernels, ELF/PE boot binaries, plain text — so a
/// `Content-Type` can be set without pulling in a MIME-detection crate.
fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x1f, 0x8b]) {
        "application/gzip"
    } else if bytes.starts_with(b"\x7fELF") {
        "application/x-elf"
    } else if bytes.starts_with(b"MZ") {
        "application/x-msdownload"
    } else {
        "application/octet-stream"
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn info_nodes(State(state): State<Arc<ServerState>>) -> Response {
    let snapshot = state.current().await;
    let ids = snapshot.store.list_nodes();
    let mut out = String::new();
    for id in ids {
        match merge::resolve(&snapshot.store, &id) {
            Ok((node, _)) => {
                out.push_str(&format!(
                    "{}\t{}\t{}\n",
                    node.id,
                    node.cluster_name.as_deref().unwrap_or("-"),
                    node.container.as_deref().unwrap_or("-"),
                ));
            }
            Err(err) => out.push_str(&format!("{id}\tERROR\t{err}\n")),
        }
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], out).into_response()
}

async fn info_ready(State(state): State<Arc<ServerState>>) -> Response {
    let snapshot = state.current().await;
    let records = state.status.snapshot().await;
    let mut out = String::new();
    for id in snapshot.store.list_nodes() {
        match records.get(&id) {
            Some(r) => out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                id, r.stage, r.last_artifact, r.client_ip, r.updated_at_unix
            )),
            None => out.push_str(&format!("{id}\tNEVER\t-\t-\t-\n")),
        }
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], out).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(asset_key: Option<&str>) -> MergedNode {
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
            asset_key: asset_key.map(str::to_string),
            system_overlay: vec![],
            runtime_overlay: vec![],
            discoverable: false,
            ipmi: Default::default(),
            network_devices: Default::default(),
            tags: Default::default(),
        }
    }

    fn params(assetkey: Option<&str>) -> ProvisionParams {
        ProvisionParams {
            hwaddr: None,
            assetkey: assetkey.map(str::to_string),
            overlay: None,
            compress: None,
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn rejects_mismatched_asset_key() {
        let node = sample_node(Some("secret-key"));
        let controller = crate::config::ControllerConfig::default();

        let err = authorize(&node, &params(Some("wrong-key")), &controller, addr(4000), ProvisionStage::Kernel)
            .unwrap_err();
        assert!(matches!(err, CinderError::Unauthorized(_)));
    }

    #[test]
    fn accepts_matching_asset_key() {
        let node = sample_node(Some("secret-key"));
        let controller = crate::config::ControllerConfig::default();

        authorize(&node, &params(Some("secret-key")), &controller, addr(4000), ProvisionStage::Kernel).unwrap();
    }

    #[test]
    fn secure_mode_rejects_unprivileged_runtime_port() {
        let node = sample_node(None);
        let mut controller = crate::config::ControllerConfig::default();
        controller.warewulf.secure = true;

        let err = authorize(&node, &params(None), &controller, addr(5000), ProvisionStage::Runtime).unwrap_err();
        assert!(matches!(err, CinderError::Unauthorized(_)));

        authorize(&node, &params(None), &controller, addr(900), ProvisionStage::Runtime)
            .expect("privileged source port is accepted");
    }

    #[test]
    fn secure_mode_does_not_constrain_non_runtime_stages() {
        let node = sample_node(None);
        let mut controller = crate::config::ControllerConfig::default();
        controller.warewulf.secure = true;

        authorize(&node, &params(None), &controller, addr(5000), ProvisionStage::Kernel)
            .expect("secure mode only gates the runtime stage");
    }
}
