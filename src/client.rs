//! Typed HTTP client for the provisioning daemon's plaintext `/info/*`
//! endpoints (§6, §4.8). `cinder query ready|nodes` is the thin CLI wrapper
//! around this — the daemon itself never exposes JSON, so the client reads
//! the same tab-separated plaintext a human operator would see with `curl`.

use anyhow::{Context, Result};
use reqwest::Client;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9873";

pub struct CinderClient {
    base_url: String,
    http: Client,
}

impl CinderClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// `None` → the default local daemon address; `Some(addr)` → an
    /// explicit `host:port` (or full URL) supplied via `--node`.
    pub fn from_target(target: Option<&str>) -> Result<Self> {
        match target {
            None => Self::new(DEFAULT_BASE_URL),
            Some(addr) if addr.starts_with("http://") || addr.starts_with("https://") => {
                Self::new(addr)
            }
            Some(addr) => Self::new(&format!("http://{addr}")),
        }
    }

    pub async fn nodes(&self) -> Result<String> {
        self.get_text("/info/nodes").await
    }

    pub async fn ready(&self) -> Result<String> {
        self.get_text("/info/ready").await
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} returned {}", url, resp.status());
        }

        resp.text().await.with_context(|| format!("reading response body from {url}"))
    }
}
