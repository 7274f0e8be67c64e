use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::GenerationConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub generation: BackendConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: None,
        }
    }
}

impl BackendConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_rewrite_query")]
    pub rewrite_query: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            rewrite_query: default_rewrite_query(),
        }
    }
}

fn default_max_results() -> u32 {
    5
}
fn default_rewrite_query() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct AutosaveConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    750
}

/// Defaults applied to new documents when the CLI flags are omitted.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_target_words")]
    pub target_words: u32,
    #[serde(default)]
    pub allowed_elements: Vec<String>,
    #[serde(default)]
    pub denied_elements: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            target_words: default_target_words(),
            allowed_elements: Vec::new(),
            denied_elements: Vec::new(),
        }
    }
}

fn default_tone() -> String {
    "neutral".to_string()
}
fn default_target_words() -> u32 {
    1200
}

impl DefaultsConfig {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            tone: self.tone.clone(),
            target_words: self.target_words,
            allowed_elements: self.allowed_elements.clone(),
            denied_elements: self.denied_elements.clone(),
            knowledge_base: None,
            model: None,
        }
    }
}

impl Config {
    /// A config with every section at its default and the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/draft.sqlite"),
            },
            generation: BackendConfig::default(),
            knowledge: KnowledgeConfig::default(),
            autosave: AutosaveConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.generation.is_enabled() && config.generation.model.trim().is_empty() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    if config.knowledge.max_results < 1 {
        anyhow::bail!("knowledge.max_results must be >= 1");
    }

    if config.defaults.target_words == 0 {
        anyhow::bail!("defaults.target_words must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert!(!cfg.generation.is_enabled());
        assert_eq!(cfg.knowledge.max_results, 5);
        assert!(cfg.knowledge.rewrite_query);
        assert_eq!(cfg.autosave.debounce_ms, 750);
        assert_eq!(cfg.defaults.target_words, 1200);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[generation]\nprovider = \"llama\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn test_zero_target_words_rejected() {
        let err =
            parse_config("[db]\npath = \"x\"\n[defaults]\ntarget_words = 0\n").unwrap_err();
        assert!(err.to_string().contains("target_words"));
    }

    #[test]
    fn test_defaults_become_generation_config() {
        let cfg = parse_config(
            "[db]\npath = \"x\"\n[defaults]\ntone = \"playful\"\ndenied_elements = [\"violence\"]\n",
        )
        .unwrap();
        let generation = cfg.defaults.generation_config();
        assert_eq!(generation.tone, "playful");
        assert_eq!(generation.denied_elements, vec!["violence".to_string()]);
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/draft.example.toml")).unwrap();
        assert!(cfg.generation.is_enabled());
        assert_eq!(cfg.autosave.debounce_ms, 750);
    }
}
