use std::path::PathBuf;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    /// External launcher invoked with the artifact path as its one argument.
    pub launcher_path: PathBuf,
    pub upload_dir: PathBuf,
    pub log_dir: PathBuf,
    pub model_base_url: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let launcher_path = PathBuf::from(get("LAUNCHER_PATH")?);
        let upload_dir = PathBuf::from(env_or("UPLOAD_DIR", "uploads"));
        let log_dir = PathBuf::from(env_or("MODEL_LOG_DIR", "model_logs"));
        let model_base_url = env_or("MODEL_BASE_URL", "http://127.0.0.1:8080");
        let bind_addr = env_or("GATEWAY_BIND_ADDR", "0.0.0.0:5000");

        let max_upload_bytes = match std::env::var("MAX_UPLOAD_BYTES") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("MAX_UPLOAD_BYTES is not a number: {v}"))?,
            Err(_) => 6 * 1024 * 1024 * 1024, // 6 GiB
        };

        // Tiny sanity checks (fail fast, fail loud)
        if !model_base_url.starts_with("http://") && !model_base_url.starts_with("https://") {
            bail!("MODEL_BASE_URL must start with http:// or https://");
        }

        Ok(Self {
            bind_addr,
            launcher_path,
            upload_dir,
            log_dir,
            model_base_url,
            max_upload_bytes,
        })
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.model_base_url.trim_end_matches('/'))
    }

    pub fn completion_url(&self) -> String {
        format!("{}/completion", self.model_base_url.trim_end_matches('/'))
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
