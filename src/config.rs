//! Agent configuration, loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::backend::OrchestratorBackend;
use crate::diff::PatchMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub chain: ChainConfig,
    pub sandbox: SandboxConfig,
    pub patch: PatchConfig,
}

/// Model endpoint and per-step model choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    /// Used for planning, analysis and conclusion.
    pub reasoning_model: String,
    /// Used for every step that may call tools.
    pub tool_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".into(),
            base_url: "https://api.anthropic.com".into(),
            reasoning_model: "opus".into(),
            tool_model: "sonnet".into(),
            max_tokens: 4000,
            temperature: 0.2,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub max_follow_up_rounds: usize,
    /// Tool results echoed back to the model are cut to this many chars.
    pub tool_result_preview_chars: usize,
    /// Backends tried in order until one initializes.
    pub backends: Vec<OrchestratorBackend>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_follow_up_rounds: 5,
            tool_result_preview_chars: 1000,
            backends: vec![
                OrchestratorBackend::FrameworkBacked,
                OrchestratorBackend::DirectApi,
                OrchestratorBackend::PlainChat,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container CLI (`docker`, `podman`).
    pub runtime_binary: String,
    pub image: String,
    /// Where the workspace is bind-mounted inside the container.
    pub mount_point: String,
    pub working_dir: String,
    pub shell: String,
    pub exec_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".into(),
            image: "python:3.11-slim".into(),
            mount_point: "/app/data".into(),
            working_dir: "/app".into(),
            shell: "bash".into(),
            exec_timeout_secs: 30,
            install_timeout_secs: 120,
        }
    }
}

impl SandboxConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub mode: PatchMode,
}

impl AgentConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse(yaml, "<inline>")
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&raw, &display)
    }

    fn parse(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = if yaml.trim().is_empty() {
            AgentConfig::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("chain.max_follow_up_rounds", self.chain.max_follow_up_rounds as u64),
            ("llm.max_tokens", u64::from(self.llm.max_tokens)),
            ("llm.request_timeout_secs", self.llm.request_timeout_secs),
            ("sandbox.exec_timeout_secs", self.sandbox.exec_timeout_secs),
            ("sandbox.install_timeout_secs", self.sandbox.install_timeout_secs),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((field, _)) = zero {
            return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
        }
        if self.chain.backends.is_empty() {
            return Err(ConfigError::Invalid("chain.backends must not be empty".into()));
        }
        if !self.sandbox.mount_point.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "sandbox.mount_point must be absolute, got {}",
                self.sandbox.mount_point
            )));
        }
        Ok(())
    }
}
