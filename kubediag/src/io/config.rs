//! Diagnoser configuration stored as TOML (default `kubediag.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Diagnoser configuration (TOML).
///
/// Missing fields default to the values the tool ships with, so an empty or
/// absent file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnoserConfig {
    /// Upper bound on backend calls per session.
    pub max_cycles: u32,

    /// Consecutive backend failures tolerated before the session aborts.
    pub max_backend_failures: u32,

    /// Base delay before retrying after a backend failure; doubles per
    /// consecutive failure.
    pub backend_retry_delay_ms: u64,

    /// Consecutive re-proposals of already executed commands tolerated.
    pub max_repeated_proposals: u32,

    /// Wall-clock budget for the whole session in seconds.
    pub session_timeout_secs: u64,

    /// Per-command timeout in seconds.
    pub command_timeout_secs: u64,

    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub command_output_limit_bytes: usize,

    /// Token that starts an inspection command line.
    pub command_prefix: String,

    pub backend: BackendConfig,

    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Connection flags every inspection command must carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            insecure_skip_tls_verify: true,
        }
    }
}

impl ClusterConfig {
    /// Flags as they must appear on the command line, in a stable order.
    pub fn connection_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(path) = &self.kubeconfig {
            flags.push(format!("--kubeconfig={}", path.display()));
        }
        if let Some(context) = &self.context {
            flags.push(format!("--context={context}"));
        }
        if self.insecure_skip_tls_verify {
            flags.push("--insecure-skip-tls-verify".to_string());
        }
        flags
    }
}

impl Default for DiagnoserConfig {
    fn default() -> Self {
        Self {
            max_cycles: 30,
            max_backend_failures: 3,
            backend_retry_delay_ms: 2_000,
            max_repeated_proposals: 3,
            session_timeout_secs: 15 * 60,
            command_timeout_secs: 60,
            command_output_limit_bytes: 100_000,
            command_prefix: "kubectl".to_string(),
            backend: BackendConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl DiagnoserConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if self.max_backend_failures == 0 {
            return Err(anyhow!("max_backend_failures must be > 0"));
        }
        if self.max_repeated_proposals == 0 {
            return Err(anyhow!("max_repeated_proposals must be > 0"));
        }
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.command_prefix.trim().is_empty()
            || self.command_prefix.contains(char::is_whitespace)
        {
            return Err(anyhow!("command_prefix must be a single non-empty token"));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(anyhow!("backend.base_url must not be empty"));
        }
        if self.backend.model.trim().is_empty() {
            return Err(anyhow!("backend.model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(anyhow!("backend.temperature must be within 0.0..=2.0"));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(anyhow!("backend.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn backend_retry_delay(&self) -> Duration {
        Duration::from_millis(self.backend_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DiagnoserConfig::default()`.
pub fn load_config(path: &Path) -> Result<DiagnoserConfig> {
    if !path.exists() {
        let cfg = DiagnoserConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DiagnoserConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DiagnoserConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
