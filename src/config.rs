//! Configuration management for annex-signals
//!
//! Read once at startup from an optional TOML file (explicit `--config` path,
//! or ~/.config/annex-signals/config.toml) and the environment, then handed
//! to the pipeline as an immutable value. Environment values win over the
//! file; the API key is only ever read from the environment.

use crate::error::PipelineError;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// OpenAI Responses API, used when only `OPENAI_API_KEY` is set.
pub const OPENAI_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection settings for the text-generation backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    /// Both an endpoint URL and a credential are present.
    pub fn is_configured(&self) -> bool {
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        let has_endpoint = self
            .endpoint
            .as_deref()
            .is_some_and(|e| url::Url::parse(e.trim()).is_ok());
        has_key && has_endpoint
    }
}

// Keep the credential out of logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,
    /// Propagate backend failures instead of degrading to "missing".
    pub require_llm: bool,
    /// Run the per-file model extraction stage.
    pub enable_extraction: bool,
    pub policy: Policy,
}

/// On-disk shape; every field optional so partial files work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub require_llm: Option<bool>,
    pub enable_extraction: Option<bool>,
    pub backend: BackendSection,
    pub policy: Option<Policy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("annex-signals"))
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load from an explicit file (errors are fatal) or the default location
    /// (a corrupt file is reported and ignored), then apply the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, PipelineError> {
        let file = match explicit {
            Some(path) => Some(ConfigFile::read(path)?),
            None => Self::default_path()
                .filter(|p| p.exists())
                .and_then(|path| match ConfigFile::read(&path) {
                    Ok(file) => Some(file),
                    Err(err) => {
                        warn!(path = %path.display(), "Ignoring unreadable config file: {}", err);
                        None
                    }
                }),
        };
        Ok(Self::resolve(file, |name| std::env::var(name).ok()))
    }

    /// Environment-only configuration.
    pub fn from_env() -> Self {
        Self::resolve(None, |name| std::env::var(name).ok())
    }

    /// Combine a config file with an environment lookup.
    pub fn resolve<F>(file: Option<ConfigFile>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let openai_key = env("OPENAI_API_KEY");
        let api_key = env("LLM_API_KEY").or_else(|| openai_key.clone());
        let endpoint = env("LLM_ENDPOINT")
            .or(file.backend.endpoint)
            .or_else(|| openai_key.as_ref().map(|_| OPENAI_RESPONSES_URL.to_string()));
        let model = env("LLM_MODEL")
            .or_else(|| env("OPENAI_MODEL"))
            .or(file.backend.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = env("LLM_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse().ok())
            .or(file.backend.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            backend: BackendConfig {
                endpoint,
                api_key,
                model,
                timeout_secs,
            },
            require_llm: env("REQUIRE_LLM")
                .map(|v| parse_flag(&v))
                .or(file.require_llm)
                .unwrap_or(false),
            enable_extraction: env("ENABLE_LLM_EXTRACTION")
                .map(|v| parse_flag(&v))
                .or(file.enable_extraction)
                .unwrap_or(false),
            policy: file.policy.unwrap_or_default(),
        }
    }

    pub fn with_require_llm(mut self, require: bool) -> Self {
        self.require_llm = require;
        self
    }

    pub fn with_extraction(mut self, enable: bool) -> Self {
        self.enable_extraction = enable;
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let threshold = self.policy.gate.overlap_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PipelineError::Config(format!(
                "overlap_threshold must be within 0..=1, got {}",
                threshold
            )));
        }
        if self.policy.extraction.concurrency == 0 {
            return Err(PipelineError::Config(
                "extraction concurrency must be at least 1".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(PipelineError::Config(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_default_is_unconfigured() {
        let config = Config::resolve(None, env_of(&[]));
        assert!(!config.backend.is_configured());
        assert!(!config.require_llm);
        assert!(!config.enable_extraction);
        assert_eq!(config.backend.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_openai_key_alone_targets_responses_api() {
        let config = Config::resolve(None, env_of(&[("OPENAI_API_KEY", "sk-test")]));
        assert_eq!(config.backend.endpoint.as_deref(), Some(OPENAI_RESPONSES_URL));
        assert_eq!(config.backend.api_key.as_deref(), Some("sk-test"));
        assert!(config.backend.is_configured());
    }

    #[test]
    fn test_flags_accept_only_literal_true() {
        let config = Config::resolve(
            None,
            env_of(&[("REQUIRE_LLM", "TRUE"), ("ENABLE_LLM_EXTRACTION", "yes")]),
        );
        assert!(config.require_llm);
        assert!(!config.enable_extraction);
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let file = ConfigFile::parse(
            r#"
            require_llm = true
            enable_extraction = true

            [backend]
            endpoint = "https://gateway.internal/v1/generate"
            model = "file-model"
            timeout_secs = 15

            [policy.gate]
            overlap_threshold = 0.3
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            Some(file),
            env_of(&[("LLM_MODEL", "env-model"), ("LLM_API_KEY", "k")]),
        );
        assert_eq!(config.backend.model, "env-model");
        assert_eq!(
            config.backend.endpoint.as_deref(),
            Some("https://gateway.internal/v1/generate")
        );
        assert_eq!(config.backend.timeout_secs, 15);
        assert!(config.require_llm);
        assert!(config.enable_extraction);
        assert_eq!(config.policy.gate.overlap_threshold, 0.3);
        assert!(config.backend.is_configured());
    }

    #[test]
    fn test_debug_output_redacts_api_key() {
        let config = Config::resolve(None, env_of(&[("LLM_API_KEY", "sk-secret-value")]));
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.backend.timeout_secs = DEFAULT_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
        config.policy.gate.overlap_threshold = 1.5;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
