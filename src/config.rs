use crate::paths::ArchivePaths;
use crate::{ArchiverError, Result};
use serde::{Deserialize, Serialize};

pub const ENV_PROXY_URL: &str = "SITE_ARCHIVER_PROXY_URL";
pub const ENV_TIMEOUT_SECS: &str = "SITE_ARCHIVER_TIMEOUT_SECS";
pub const ENV_ABSOLUTE_PATHS: &str = "SITE_ARCHIVER_ABSOLUTE_PATHS";

const DEFAULT_PROXY_URL: &str = "socks5h://127.0.0.1:9050";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DIR_MODE: u32 = 0o777;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// SOCKS5 endpoint every request goes through.
    pub proxy_url: String,
    pub timeout_secs: u64,
    /// Rewrite image sources to `<site url>/<image>` instead of archive-relative paths.
    pub use_absolute_paths: bool,
    pub dir_mode: u32,
    pub user_agent: String,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_absolute_paths: false,
            dir_mode: DEFAULT_DIR_MODE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ArchiverConfig {
    pub fn rewrite_mode(&self) -> crate::extract::RewriteMode {
        if self.use_absolute_paths {
            crate::extract::RewriteMode::Absolute
        } else {
            crate::extract::RewriteMode::Relative
        }
    }
}

/// Defaults, then the optional config file, then environment overrides.
pub fn load_archiver_config(paths: &ArchivePaths) -> Result<ArchiverConfig> {
    let mut config = load_config_file(paths)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

pub fn load_config_file(paths: &ArchivePaths) -> Result<ArchiverConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(ArchiverConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: ArchiverConfig = serde_json::from_slice(&bytes).map_err(|e| {
        ArchiverError::InvalidConfig(format!(
            "failed to parse {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_config_file(paths: &ArchivePaths, config: &ArchiverConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

pub fn apply_env_overrides<F>(config: &mut ArchiverConfig, mut lookup: F) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(v) = non_empty(lookup(ENV_PROXY_URL)) {
        config.proxy_url = v;
    }

    if let Some(v) = non_empty(lookup(ENV_TIMEOUT_SECS)) {
        let secs = v.parse::<u64>().map_err(|_| {
            ArchiverError::InvalidConfig(format!("{ENV_TIMEOUT_SECS} must be an integer, got {v}"))
        })?;
        config.timeout_secs = secs.max(1);
    }

    if let Some(v) = non_empty(lookup(ENV_ABSOLUTE_PATHS)) {
        config.use_absolute_paths = match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(ArchiverError::InvalidConfig(format!(
                    "{ENV_ABSOLUTE_PATHS} must be a boolean, got {other}"
                )))
            }
        };
    }

    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
