use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Connection settings for the chat-completions endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl LlmConfig {
    pub fn is_ready(&self) -> bool {
        !self.base_url.trim().is_empty()
            && !self.model.trim().is_empty()
            && !self.api_key.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
    #[serde(default = "default_export_folder")]
    pub export_folder: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_file: default_cache_file(),
            export_folder: default_export_folder(),
        }
    }
}

fn default_cache_file() -> String {
    ".novel-wizard/project.json".to_string()
}
fn default_export_folder() -> String {
    "output".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Loads the config file, falling back to defaults when it does not exist yet.
    pub fn load_or_default() -> Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            Self::load()
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(CONFIG_FILE)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.llm.is_ready()
    }

    /// Stricter than `is_ready`: the base URL must also be a valid absolute URL.
    pub fn validate(&self) -> Result<()> {
        if !self.llm.is_ready() {
            anyhow::bail!("LLM base_url, model and api_key must all be set");
        }
        url::Url::parse(self.llm.base_url.trim())
            .with_context(|| format!("Invalid LLM base_url: {}", self.llm.base_url))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.export_folder)?;
        if let Some(parent) = Path::new(&self.storage.cache_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: Config = serde_yaml_ng::from_str("llm:\n  model: gpt-4o-mini\n").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.llm.base_url.is_empty());
        assert_eq!(config.storage.cache_file, ".novel-wizard/project.json");
        assert_eq!(config.storage.export_folder, "output");
        assert!(!config.is_ready());
    }

    #[test]
    fn test_ready_requires_all_three_fields() {
        let mut config = Config::default();
        config.llm.base_url = "https://api.example.com/v1".to_string();
        config.llm.model = "m".to_string();
        assert!(!config.is_ready());
        config.llm.api_key = "   ".to_string();
        assert!(!config.is_ready());
        config.llm.api_key = "sk-test".to_string();
        assert!(config.is_ready());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_url() {
        let mut config = Config::default();
        config.llm.base_url = "not a url".to_string();
        config.llm.model = "m".to_string();
        config.llm.api_key = "k".to_string();
        assert!(config.is_ready());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.llm.base_url = "https://api.example.com/v1".to_string();
        config.llm.model = "writer".to_string();
        config.llm.api_key = "sk-test".to_string();
        config.save_to(&path)?;

        let loaded = Config::load_from(&path)?;
        assert_eq!(loaded.llm.model, "writer");
        assert_eq!(loaded.storage.export_folder, "output");
        assert!(Config::load_from(dir.path().join("missing.yml")).is_err());
        Ok(())
    }
}
