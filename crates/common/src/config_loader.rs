use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, info};

/// Supported configuration file formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// Loads typed configuration from a file and layers `{prefix}KEY` environment overrides on top.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: env_prefix.into(),
        }
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    pub async fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = Self::parse_str(&content, ConfigFormat::from_path(path))
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Parses `content` in the given format; with no format, tries TOML then JSON.
    pub fn parse_str<T: DeserializeOwned>(content: &str, format: Option<ConfigFormat>) -> Result<T> {
        match format {
            Some(ConfigFormat::Toml) => toml::from_str(content).context("Failed to parse TOML config"),
            Some(ConfigFormat::Json) => {
                serde_json::from_str(content).context("Failed to parse JSON config")
            }
            Some(ConfigFormat::Yaml) => {
                serde_yaml::from_str(content).context("Failed to parse YAML config")
            }
            None => toml::from_str(content)
                .or_else(|_| serde_json::from_str(content))
                .context("Failed to parse config file"),
        }
    }

    /// Raw value of `{prefix}{key}`, if set and non-empty.
    pub fn env_var(&self, key: &str) -> Option<String> {
        let name = format!("{}{}", self.env_prefix, key);
        match env::var(&name) {
            Ok(value) if !value.trim().is_empty() => {
                debug!("Using environment override {}", name);
                Some(value)
            }
            _ => None,
        }
    }

    /// Parsed value of `{prefix}{key}`; a value that does not parse is an error.
    pub fn env_override<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.env_var(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid value for {}{}: {}", self.env_prefix, key, e)),
            None => Ok(None),
        }
    }

    pub async fn save<T: Serialize>(&self, path: &Path, config: &T) -> Result<()> {
        let content = match ConfigFormat::from_path(path).unwrap_or(ConfigFormat::Toml) {
            ConfigFormat::Toml => toml::to_string_pretty(config).context("Failed to serialize TOML")?,
            ConfigFormat::Json => {
                serde_json::to_string_pretty(config).context("Failed to serialize JSON")?
            }
            ConfigFormat::Yaml => serde_yaml::to_string(config).context("Failed to serialize YAML")?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }
        fs::write(path, content)
            .await
            .context("Failed to write config file")?;
        info!("Saved configuration to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Sample {
        owner: String,
        max_concurrency: usize,
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("run.toml")), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_path(Path::new("run.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("run.json")), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_path(Path::new("run")), None);
    }

    #[test]
    fn test_unknown_format_falls_back_to_json() {
        let parsed: Sample =
            ConfigLoader::parse_str(r#"{"owner": "ci", "max_concurrency": 4}"#, None).unwrap();
        assert_eq!(parsed.max_concurrency, 4);
    }

    #[tokio::test]
    async fn test_load_and_save_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.yaml");
        let loader = ConfigLoader::new("TEST_CFG_");
        let original = Sample {
            owner: "perf-team".into(),
            max_concurrency: 8,
        };

        loader.save(&path, &original).await.unwrap();
        let loaded: Sample = loader.load(&path).await.unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_env_override_parse_error() {
        let loader = ConfigLoader::new("COMMON_LOADER_TEST_");
        std::env::set_var("COMMON_LOADER_TEST_MAX", "not-a-number");
        assert!(loader.env_override::<usize>("MAX").is_err());
        std::env::set_var("COMMON_LOADER_TEST_MAX", "12");
        assert_eq!(loader.env_override::<usize>("MAX").unwrap(), Some(12));
        std::env::remove_var("COMMON_LOADER_TEST_MAX");
        assert_eq!(loader.env_override::<usize>("MAX").unwrap(), None);
    }
}
