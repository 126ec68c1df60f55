//! Template renderer (C4), built on `tera`.
//!
//! Binding environment and helper functions mirror the Go source's
//! `overlay.TemplateStruct` and `funcmap.go`: `include`/`include_block`/
//! `include_from_container` warn and return empty string on any failure
//! rather than propagating an error, since a missing include is usually an
//! operator mistake in an overlay file, not a fatal condition for the
//! whole render.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Tera, Value};

use crate::config::ControllerConfig;
use crate::domain::node::MergedNode;
use crate::error::{CinderError, CinderResult};

/// Leading sentinel line a template may emit to ask the overlay builder to
/// skip writing this file entirely.
pub const SKIP_SENTINEL: &str = "{{ cinder_skip }}";

/// Leading sentinel line a template may emit to ask the overlay builder to
/// back up the previous copy of this file before overwriting it (mirrors
/// warewulf's `.wwbackup` convention).
pub const BACKUP_SENTINEL: &str = "{{ cinder_backup }}";

#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub write: bool,
    pub backup: bool,
    pub bytes: Vec<u8>,
}

#[derive(Serialize)]
struct BuildMeta {
    build_host: String,
    build_time: String,
    build_time_unix: i64,
}

/// Everything a template may reference: the merged node under render, the
/// full node set (for host tables), the controller's own globals, and
/// build metadata. Serialized into the Tera context as top-level keys.
#[derive(Serialize)]
pub struct TemplateContext<'a> {
    #[serde(flatten)]
    pub node: &'a MergedNode,
    pub this_node: &'a MergedNode,
    pub all_nodes: &'a [MergedNode],
    pub controller: &'a ControllerConfig,
    pub build: BuildMeta,
}

pub struct Renderer {
    tera: Tera,
    config_dir: PathBuf,
    container_dir: PathBuf,
}

impl Renderer {
    pub fn new(config_dir: impl Into<PathBuf>, container_dir: impl Into<PathBuf>) -> CinderResult<Self> {
        let mut tera = Tera::default();
        let config_dir = config_dir.into();
        let container_dir = container_dir.into();

        tera.register_function("include", make_include_fn(config_dir.clone()));
        tera.register_function("include_block", make_include_block_fn(config_dir.clone()));
        tera.register_function(
            "include_from_container",
            make_include_from_container_fn(container_dir.clone()),
        );

        Ok(Self { tera, config_dir, container_dir })
    }

    /// Render `source` (already read from disk) as a one-off template named
    /// `name`. Returns whether the render asked to be skipped via the
    /// leading sentinel.
    pub fn render_str(
        &mut self,
        name: &str,
        source: &str,
        node: &MergedNode,
        all_nodes: &[MergedNode],
        controller: &ControllerConfig,
        build_host: &str,
        build_time_unix: i64,
    ) -> CinderResult<RenderedFile> {
        let trimmed = source.trim_start();
        let skip = trimmed.starts_with(SKIP_SENTINEL);
        let body = if skip { trimmed.strip_prefix(SKIP_SENTINEL).unwrap_or("") } else { source };

        let body_trimmed = body.trim_start();
        let backup = !skip && body_trimmed.starts_with(BACKUP_SENTINEL);
        let body = if backup { body_trimmed.strip_prefix(BACKUP_SENTINEL).unwrap_or("") } else { body };

        self.tera
            .add_raw_template(name, body)
            .map_err(CinderError::from)?;

        let ctx = TemplateContext {
            node,
            this_node: node,
            all_nodes,
            controller,
            build: BuildMeta {
                build_host: build_host.to_string(),
                build_time: chrono::DateTime::from_timestamp(build_time_unix, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                build_time_unix,
            },
        };
        let tera_ctx = tera::Context::from_serialize(&ctx).map_err(CinderError::from)?;
        let rendered = self.tera.render(name, &tera_ctx).map_err(CinderError::from)?;

        Ok(RenderedFile { write: !skip, backup, bytes: rendered.into_bytes() })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }
}

fn make_include_fn(config_dir: PathBuf) -> impl tera::Function {
    move |args: &std::collections::HashMap<String, Value>| -> tera::Result<Value> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("include: missing `path` argument"))?;
        let resolved = resolve_relative(&config_dir, path);
        match std::fs::read_to_string(&resolved) {
            Ok(contents) => Ok(Value::String(contents)),
            Err(err) => {
                tracing::warn!(path = %resolved.display(), error = %err, "include: file not readable");
                Ok(Value::String(String::new()))
            }
        }
    }
}

fn make_include_block_fn(config_dir: PathBuf) -> impl tera::Function {
    move |args: &std::collections::HashMap<String, Value>| -> tera::Result<Value> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("include_block: missing `path` argument"))?;
        let sentinel = args.get("sentinel").and_then(Value::as_str).unwrap_or("");
        let resolved = resolve_relative(&config_dir, path);
        match std::fs::read_to_string(&resolved) {
            Ok(contents) => {
                let mut out = String::new();
                for line in contents.lines() {
                    out.push_str(line);
                    out.push('\n');
                    if !sentinel.is_empty() && line.contains(sentinel) {
                        break;
                    }
                }
                Ok(Value::String(out))
            }
            Err(err) => {
                tracing::warn!(path = %resolved.display(), error = %err, "include_block: file not readable");
                Ok(Value::String(String::new()))
            }
        }
    }
}

fn make_include_from_container_fn(container_dir: PathBuf) -> impl tera::Function {
    move |args: &std::collections::HashMap<String, Value>| -> tera::Result<Value> {
        let container = args
            .get("container")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("include_from_container: missing `container` argument"))?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("include_from_container: missing `path` argument"))?;
        let resolved = container_dir.join(container).join("rootfs").join(path.trim_start_matches('/'));
        match std::fs::read_to_string(&resolved) {
            Ok(contents) => Ok(Value::String(contents)),
            Err(err) => {
                tracing::warn!(
                    container = %container,
                    path = %resolved.display(),
                    error = %err,
                    "include_from_container: container or file not readable"
                );
                Ok(Value::String(String::new()))
            }
        }
    }
}

fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
