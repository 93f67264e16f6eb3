use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::scoring::DuplicatePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Root directory for the `fs` backend.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Prefix used to build public download URLs for stored blobs.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

fn default_storage_backend() -> String {
    "fs".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_batch_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    /// Model used for document analysis.
    #[serde(default = "ModelConfig::analysis_defaults")]
    pub analysis: ModelConfig,
    /// Model used for requirement question drafting.
    #[serde(default = "ModelConfig::drafting_defaults")]
    pub drafting: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            analysis: ModelConfig::analysis_defaults(),
            drafting: ModelConfig::drafting_defaults(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Override for the provider's base URL (Azure OpenAI deployments, proxies, test servers).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Extra query string sent with every request (e.g. `api-version` for Azure).
    #[serde(default)]
    pub api_version: Option<String>,
    /// Google Cloud project, required by the `vertex` provider.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_location() -> String {
    "asia-northeast1".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    pub fn analysis_defaults() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            api_version: None,
            project: None,
            location: default_location(),
            temperature: Some(0.1),
            top_p: Some(0.8),
            max_output_tokens: Some(8192),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn drafting_defaults() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(0.95),
            max_output_tokens: Some(800),
            ..Self::analysis_defaults()
        }
    }

    /// Fills sampling settings left unset with those of `defaults`.
    fn fill_sampling(&mut self, defaults: &ModelConfig) {
        self.temperature = self.temperature.or(defaults.temperature);
        self.top_p = self.top_p.or(defaults.top_p);
        self.max_output_tokens = self.max_output_tokens.or(defaults.max_output_tokens);
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    fn validate(&self, section: &str) -> Result<()> {
        match self.provider.as_str() {
            "disabled" | "gemini" | "vertex" | "openai" => {}
            other => anyhow::bail!(
                "Unknown model provider in [models.{}]: '{}'. Must be disabled, gemini, vertex, or openai.",
                section,
                other
            ),
        }

        if !self.is_enabled() {
            return Ok(());
        }

        if self.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
            anyhow::bail!(
                "models.{}.model must be specified when provider is '{}'",
                section,
                self.provider
            );
        }
        if self.provider == "vertex" && self.project.is_none() {
            anyhow::bail!("models.{}.project is required for the vertex provider", section);
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                anyhow::bail!("models.{}.temperature must be in [0.0, 2.0]", section);
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("models.{}.top_p must be in [0.0, 1.0]", section);
            }
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("models.{}.timeout_secs must be > 0", section);
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config
        .models
        .analysis
        .fill_sampling(&ModelConfig::analysis_defaults());
    config
        .models
        .drafting
        .fill_sampling(&ModelConfig::drafting_defaults());
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }
    if config.server.max_upload_bytes == 0 {
        anyhow::bail!("server.max_upload_bytes must be > 0");
    }

    match config.storage.backend.as_str() {
        "fs" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                anyhow::bail!("[storage.s3] section is required when storage.backend = \"s3\"");
            }
        }
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be fs or s3.",
            other
        ),
    }

    if config.analysis.concurrency == 0 {
        anyhow::bail!("analysis.concurrency must be >= 1");
    }
    if config.analysis.batch_timeout_secs == 0 {
        anyhow::bail!("analysis.batch_timeout_secs must be >= 1");
    }

    config.models.analysis.validate("analysis")?;
    config.models.drafting.validate("drafting")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "./data/ehub.sqlite"

[server]
bind = "127.0.0.1:7340"

[storage]
root = "./data/blobs"
"#;

    #[test]
    fn minimal_file_uses_defaults() {
        let cfg = parse_config(BASE).unwrap();
        assert_eq!(cfg.storage.backend, "fs");
        assert_eq!(cfg.analysis.concurrency, 4);
        assert_eq!(cfg.analysis.batch_timeout_secs, 300);
        assert_eq!(cfg.scoring.duplicate_policy, DuplicatePolicy::Latest);
        assert!(!cfg.models.analysis.is_enabled());
        assert_eq!(cfg.models.analysis.temperature, Some(0.1));
        assert_eq!(cfg.models.drafting.max_output_tokens, Some(800));
    }

    #[test]
    fn parses_model_sections() {
        let content = format!(
            "{}\n[scoring]\nduplicate_policy = \"average\"\n\n[models.analysis]\nprovider = \"gemini\"\nmodel = \"gemini-1.5-pro-002\"\n\n[models.drafting]\nprovider = \"openai\"\nmodel = \"gpt-4\"\ntemperature = 0.7\n",
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        assert_eq!(cfg.scoring.duplicate_policy, DuplicatePolicy::Average);
        assert_eq!(cfg.models.analysis.provider, "gemini");
        assert_eq!(cfg.models.drafting.model.as_deref(), Some("gpt-4"));
        assert_eq!(cfg.models.analysis.location, "asia-northeast1");
        // Sampling left out of an explicit section keeps that section's defaults.
        assert_eq!(cfg.models.analysis.temperature, Some(0.1));
        assert_eq!(cfg.models.analysis.max_output_tokens, Some(8192));
        assert_eq!(cfg.models.drafting.top_p, Some(0.95));
    }

    #[test]
    fn rejects_unknown_provider() {
        let content = format!("{}\n[models.analysis]\nprovider = \"bard\"\n", BASE);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("Unknown model provider"));
    }

    #[test]
    fn enabled_provider_requires_model() {
        let content = format!("{}\n[models.analysis]\nprovider = \"openai\"\n", BASE);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("models.analysis.model"));
    }

    #[test]
    fn s3_backend_requires_section() {
        let content = BASE.replace("root = \"./data/blobs\"", "backend = \"s3\"");
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("[storage.s3]"));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse_config(include_str!("../config/ehub.example.toml")).unwrap();
        assert_eq!(cfg.models.analysis.provider, "vertex");
        assert_eq!(cfg.models.analysis.project.as_deref(), Some("my-gcp-project"));
        assert_eq!(cfg.server.max_upload_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let content = format!("{}\n[analysis]\nconcurrency = 0\n", BASE);
        assert!(parse_config(&content).is_err());
    }
}
