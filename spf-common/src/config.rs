// spf-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use tracing::debug;

use super::error::{Result, SpfError};

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PROMPT_CEILING: usize = 1;
const FALLBACK_CACHE_DIR: &str = ".spf-cache";

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub index_url: Option<String>,
    pub extra_index_urls: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub no_input: bool,
    pub use_netrc: bool,
    pub use_keyring: bool,
    /// Credential prompts allowed per host in one run.
    pub prompt_ceiling: usize,
    pub timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading spf configuration");
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. `load` uses
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let cache_dir = match var("SPF_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir(),
        };
        debug!("Effective cache directory: {}", cache_dir.display());

        let timeout = match var("SPF_TIMEOUT") {
            Some(raw) => {
                let secs = raw.trim().parse::<f64>().map_err(|_| {
                    SpfError::Config(format!("SPF_TIMEOUT must be a number of seconds, got '{raw}'"))
                })?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(SpfError::Config(format!(
                        "SPF_TIMEOUT must be a non-negative number of seconds, got '{raw}'"
                    )));
                }
                Duration::from_secs_f64(secs)
            }
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let prompt_ceiling = match var("SPF_PROMPT_CEILING") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                SpfError::Config(format!("SPF_PROMPT_CEILING must be a whole number, got '{raw}'"))
            })?,
            None => DEFAULT_PROMPT_CEILING,
        };

        let config = Self {
            cache_dir,
            index_url: var("SPF_INDEX_URL").map(|s| s.trim().to_string()),
            extra_index_urls: split_list(var("SPF_EXTRA_INDEX_URL")),
            trusted_hosts: split_list(var("SPF_TRUSTED_HOST")),
            no_input: var("SPF_NO_INPUT").is_some_and(|v| is_truthy(&v)),
            use_netrc: !var("SPF_NO_NETRC").is_some_and(|v| is_truthy(&v)),
            use_keyring: !var("SPF_NO_KEYRING").is_some_and(|v| is_truthy(&v)),
            prompt_ceiling,
            timeout,
        };
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache root for revalidated index pages.
    pub fn http_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("http")
    }

    /// Every configured index URL, primary first.
    pub fn index_urls(&self) -> Vec<String> {
        self.index_url
            .iter()
            .chain(self.extra_index_urls.iter())
            .cloned()
            .collect()
    }
}

fn default_cache_dir() -> PathBuf {
    match ProjectDirs::from("", "", "spf") {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => {
            debug!(
                "No home directory found, falling back to '{}' for the cache",
                FALLBACK_CACHE_DIR
            );
            PathBuf::from(FALLBACK_CACHE_DIR)
        }
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
