//! Overlay builder (C5): layer a named sequence of overlay source trees
//! into a single compressed archive for one node.
//!
//! Layering, `.ww` rendering, and archive construction follow the Go
//! source's overlay build step but expressed with `tar`+`flate2`+`walkdir`
//! rather than a hand-rolled archive writer — the same crates the pack's
//! container-image builder reaches for.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::ControllerConfig;
use crate::domain::node::MergedNode;
use crate::error::{CinderError, CinderResult};
use crate::template::Renderer;

/// Mirrors the cache key's context dimension (spec §3's `(node-id, sorted
/// overlay set, context)` tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlayContext {
    System,
    Runtime,
    Legacy,
}

impl OverlayContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Runtime => "runtime",
            Self::Legacy => "legacy",
        }
    }
}

struct LayeredEntry {
    source_root: PathBuf,
    rel_path: PathBuf,
    metadata: Metadata,
}

/// Walk each overlay directory in order, later overlays replacing earlier
/// ones by relative path.
fn layer_tree(overlay_dir: &Path, overlay_names: &[String]) -> CinderResult<Vec<LayeredEntry>> {
    let mut layered: BTreeMap<PathBuf, LayeredEntry> = BTreeMap::new();

    for name in overlay_names {
        let root = overlay_dir.join(name);
        if !root.exists() {
            tracing::warn!(overlay = %name, path = %root.display(), "overlay source directory missing, skipping");
            continue;
        }
        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| CinderError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
                .to_path_buf();
            let metadata = entry.metadata().map_err(|e| {
                CinderError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
            layered.insert(
                rel.clone(),
                LayeredEntry { source_root: root.clone(), rel_path: rel, metadata },
            );
        }
    }

    Ok(layered.into_values().collect())
}

/// Build the archive for `node` from `overlay_names` (config order, *not*
/// the sorted order used for the cache key) and write it atomically to
/// `dest_path`.
#[allow(clippy::too_many_arguments)]
pub fn build(
    overlay_dir: &Path,
    container_dir: &Path,
    config_dir: &Path,
    overlay_names: &[String],
    node: &MergedNode,
    all_nodes: &[MergedNode],
    controller: &ControllerConfig,
    context: OverlayContext,
    dest_path: &Path,
    build_host: &str,
    build_time_unix: i64,
) -> CinderResult<()> {
    let entries = layer_tree(overlay_dir, overlay_names)?;
    let mut renderer = Renderer::new(config_dir, container_dir)?;

    let dest_dir = dest_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dest_dir)?;
    let tmp_path = dest_dir.join(format!(
        ".{}.tmp",
        dest_path.file_name().and_then(|n| n.to_str()).unwrap_or("overlay")
    ));

    let result = (|| -> CinderResult<()> {
        let file = std::fs::File::create(&tmp_path)?;
        let mut firmware_prefix: Option<Vec<u8>> = None;

        if context == OverlayContext::System {
            let firmware_root = entries
                .iter()
                .find(|e| e.rel_path.starts_with("firmware"))
                .map(|e| e.source_root.clone());
            if let Some(root) = firmware_root {
                firmware_prefix = Some(build_firmware_segment(&root, &entries)?);
            }
        }

        if let Some(prefix) = &firmware_prefix {
            let mut f = &file;
            f.write_all(prefix)?;
        }

        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar_builder = tar::Builder::new(encoder);

        for entry in &entries {
            write_entry(&mut tar_builder, entry, node, all_nodes, controller, &mut renderer, build_host, build_time_unix)?;
        }

        let encoder = tar_builder.into_inner().map_err(CinderError::from)?;
        let file = encoder.finish().map_err(CinderError::from)?;
        file.sync_all()?;
        file.set_permissions(std::fs::Permissions::from_mode(0o640))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            std::fs::rename(&tmp_path, dest_path)?;
            Ok(())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(err)
        }
    }
}

/// An uncompressed tar segment covering just the `firmware/` subtree,
/// concatenated ahead of the gzip stream so early-boot microcode loading
/// doesn't need to inflate the whole archive first. See Design Note 3
/// (Open Question resolution) for why this is an uncompressed prefix
/// rather than a true cpio early header.
fn build_firmware_segment(firmware_root: &Path, entries: &[LayeredEntry]) -> CinderResult<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        for entry in entries.iter().filter(|e| e.source_root == *firmware_root) {
            let full_path = entry.source_root.join(&entry.rel_path);
            let mut file = std::fs::File::open(&full_path)?;
            builder
                .append_file(&entry.rel_path, &mut file)
                .map_err(CinderError::from)?;
        }
        builder.finish().map_err(CinderError::from)?;
    }
    Ok(buf)
}

#[allow(clippy::too_many_arguments)]
fn write_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    entry: &LayeredEntry,
    node: &MergedNode,
    all_nodes: &[MergedNode],
    controller: &ControllerConfig,
    renderer: &mut Renderer,
    build_host: &str,
    build_time_unix: i64,
) -> CinderResult<()> {
    let full_path = entry.source_root.join(&entry.rel_path);
    let file_name = entry.rel_path.to_string_lossy();

    if let Some(stripped) = file_name.strip_suffix(".ww") {
        let source = std::fs::read_to_string(&full_path)?;
        let rendered = renderer.render_str(
            &file_name,
            &source,
            node,
            all_nodes,
            controller,
            build_host,
            build_time_unix,
        )?;
        if !rendered.write {
            return Ok(());
        }
        // A backup-requesting file is archived under an extra `.wwbackup`-suffixed
        // entry alongside the real one, so the unpacking client can stage a copy of
        // the previous on-disk file before overwriting it with the real entry.
        if rendered.backup {
            let mut backup_header = tar::Header::new_gnu();
            backup_header.set_size(rendered.bytes.len() as u64);
            backup_header.set_mode(entry.metadata.permissions().mode());
            backup_header.set_uid(entry.metadata.uid() as u64);
            backup_header.set_gid(entry.metadata.gid() as u64);
            backup_header.set_cksum();
            builder
                .append_data(&mut backup_header, format!("{stripped}.wwbackup"), rendered.bytes.as_slice())
                .map_err(CinderError::from)?;
        }
        let mut header = tar::Header::new_gnu();
        header.set_size(rendered.bytes.len() as u64);
        header.set_mode(entry.metadata.permissions().mode());
        header.set_uid(entry.metadata.uid() as u64);
        header.set_gid(entry.metadata.gid() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, stripped, rendered.bytes.as_slice())
            .map_err(CinderError::from)?;
    } else {
        let mut file = std::fs::File::open(&full_path)?;
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&entry.metadata);
        header.set_mode(entry.metadata.permissions().mode());
        header.set_uid(entry.metadata.uid() as u64);
        header.set_gid(entry.metadata.gid() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, entry.rel_path.as_path(), &mut file)
            .map_err(CinderError::from)?;
    }
    Ok(())
}
