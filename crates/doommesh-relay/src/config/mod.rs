//! Relay config loader (strict parsing).

pub mod schema;

use std::fs;

use doommesh_core::error::{RelayError, Result};

pub use schema::{IdentitySection, LimitsSection, RelayConfig, RelaySection, TtlSection};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DOOMMESH_CONFIG";
/// Config file used when `DOOMMESH_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "doommesh.yaml";

pub fn config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_from_file(path: &str) -> Result<RelayConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| RelayError::Internal(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<RelayConfig> {
    let cfg: RelayConfig = serde_yaml::from_str(s)
        .map_err(|e| RelayError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
