//! Controller configuration — the daemon's own settings.
//!
//! Distinct from the node/profile document (see `domain::store`): this is
//! where the controller's network identity, paths, and the globals exposed
//! to the template renderer live. Loaded with `figment` so a value can come
//! from the YAML file or be overridden by a `CINDER_*` environment variable,
//! per the "no hidden globals" design note — the path is always passed in
//! explicitly rather than read from a process-wide variable.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

fn env_var(name: &str) -> Option<PathBuf> {
    std::env::var_os(name).map(PathBuf::from)
}

/// Resolve the controller config file path: `CINDER_CONFIG` env var, else
/// `<config_dir>/cinder/controller.yaml`.
pub fn default_config_path() -> PathBuf {
    env_var("CINDER_CONFIG").unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("cinder")
            .join("controller.yaml")
    })
}

/// Resolve the node/profile document path: `CINDER_NODES_FILE` env var,
/// else `<config_dir>/cinder/nodes.yaml`.
pub fn default_nodes_path() -> PathBuf {
    env_var("CINDER_NODES_FILE").unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("cinder")
            .join("nodes.yaml")
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub warewulf: DaemonSection,
    #[serde(default)]
    pub dhcp: DhcpConfig,
    #[serde(default)]
    pub nfs: NfsConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub tftp: TftpConfig,
    /// Primary IPv4 address of the controller, used in template globals and
    /// iPXE bindings.
    #[serde(default)]
    pub ipaddr: String,
    #[serde(default)]
    pub ipaddr6: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub network: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_level: default_log_level(),
            paths: PathsConfig::default(),
            warewulf: DaemonSection::default(),
            dhcp: DhcpConfig::default(),
            nfs: NfsConfig::default(),
            ssh: SshConfig::default(),
            tftp: TftpConfig::default(),
            ipaddr: String::new(),
            ipaddr6: String::new(),
            netmask: String::new(),
            network: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "default_overlay_dir")]
    pub overlay_dir: PathBuf,
    #[serde(default = "default_overlay_cache_dir")]
    pub overlay_cache_dir: PathBuf,
    #[serde(default = "default_container_dir")]
    pub container_dir: PathBuf,
    #[serde(default = "default_kernel_dir")]
    pub kernel_dir: PathBuf,
    #[serde(default = "default_ipxe_dir")]
    pub ipxe_dir: PathBuf,
    #[serde(default = "default_grub_dir")]
    pub grub_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            overlay_dir: default_overlay_dir(),
            overlay_cache_dir: default_overlay_cache_dir(),
            container_dir: default_container_dir(),
            kernel_dir: default_kernel_dir(),
            ipxe_dir: default_ipxe_dir(),
            grub_dir: default_grub_dir(),
        }
    }
}

/// Mirrors the original `Warewulf:` config section: daemon-level knobs that
/// aren't paths or protocol globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Require a privileged source port for `runtime` stage requests.
    #[serde(default)]
    pub secure: bool,
    /// Build stale overlay images on demand rather than serving stale bytes.
    #[serde(default = "default_true")]
    pub autobuild_overlays: bool,
    /// Enable MAC auto-discovery for unconfigured nodes.
    #[serde(default = "default_true")]
    pub discoverable: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            secure: false,
            autobuild_overlays: true,
            discoverable: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub range_start: String,
    #[serde(default)]
    pub range_end: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NfsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub export_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub key_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TftpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tftp_root: String,
}

fn default_http_addr() -> String {
    "0.0.0.0:9873".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    9873
}
fn default_true() -> bool {
    true
}
fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/cinder")
}
fn default_overlay_dir() -> PathBuf {
    PathBuf::from("/var/lib/cinder/overlays")
}
fn default_overlay_cache_dir() -> PathBuf {
    PathBuf::from("/var/lib/cinder/cache")
}
fn default_container_dir() -> PathBuf {
    PathBuf::from("/var/lib/cinder/containers")
}
fn default_kernel_dir() -> PathBuf {
    PathBuf::from("/var/lib/cinder/kernels")
}
fn default_ipxe_dir() -> PathBuf {
    PathBuf::from("/etc/cinder/ipxe")
}
fn default_grub_dir() -> PathBuf {
    PathBuf::from("/etc/cinder/grub")
}

/// Required fields a daemon start validates as fatal per the Configuration
/// error kind (§7): controller address, netmask, and a usable DHCP range
/// when DHCP rendering globals are consumed by templates.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("controller ipaddr is not set")]
    MissingIpaddr,
    #[error("controller netmask is not set")]
    MissingNetmask,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ipaddr.is_empty() {
            return Err(ConfigError::MissingIpaddr);
        }
        if self.netmask.is_empty() {
            return Err(ConfigError::MissingNetmask);
        }
        Ok(())
    }
}

/// Load the controller config from `path` (YAML), layering `CINDER_`
/// prefixed environment variables on top. Missing file falls back to
/// defaults — only a parse error on an existing file is fatal.
pub fn load(path: &std::path::Path) -> anyhow::Result<ControllerConfig> {
    let mut figment = Figment::from(Serialized::defaults(ControllerConfig::default()));
    if path.exists() {
        figment = figment.merge(Yaml::file(path));
    }
    let config: ControllerConfig = figment
        .merge(Env::prefixed("CINDER_").split("__"))
        .extract()?;
    Ok(config)
}
