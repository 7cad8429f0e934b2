//! Persistence configuration module
//!
//! Parses and manages world-save settings from YAML files.
//!
//! Uses serde_yaml for parsing: every field has a default, so an empty file
//! is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::persistence::store::{LoadOptions, SaveOptions, SaveStrategy};
use crate::persistence::validation::DanglingPolicy;

/// Maximum length of the world file name
pub const WORLD_FILE_MAX: usize = 255;

/// World save configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistConfig {
    // ============================================
    // Location
    // ============================================
    /// Directory holding the world file and its backup
    #[serde(default = "default_save_dir")]
    pub save_dir: String,

    /// World file name inside `save_dir`
    #[serde(default = "default_world_file")]
    pub world_file: String,

    /// Keep the previous save as `<world_file>.bak` and fall back to it
    #[serde(default = "default_keep_backup")]
    pub keep_backup: bool,

    // ============================================
    // Save
    // ============================================
    /// zlib-compress the world body
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// `standard` or `parallel`
    #[serde(default)]
    pub strategy: SaveStrategy,

    // ============================================
    // Load
    // ============================================
    /// `drop`, `log_and_drop` or `fail`
    #[serde(default)]
    pub dangling_policy: DanglingPolicy,

    /// Skip objects whose decoder leaves indexed bytes unread
    #[serde(default = "default_strict_length")]
    pub strict_length: bool,
}

// ============================================
// Default value functions
// These are called by serde when a field is missing
// ============================================

fn default_save_dir() -> String {
    "./save/".to_string()
}

fn default_world_file() -> String {
    "world.bin".to_string()
}

fn default_keep_backup() -> bool {
    true
}

fn default_compress() -> bool {
    true
}

fn default_strict_length() -> bool {
    true
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            world_file: default_world_file(),
            keep_backup: default_keep_backup(),
            compress: default_compress(),
            strategy: SaveStrategy::default(),
            dangling_policy: DanglingPolicy::default(),
            strict_length: default_strict_length(),
        }
    }
}

impl PersistConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use shardkeep::config::PersistConfig;
    ///
    /// let config = PersistConfig::from_file("conf/persist.yaml")
    ///     .expect("Failed to load config");
    /// println!("World file: {}", config.world_path().display());
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: PersistConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    ///
    /// Useful for testing
    pub fn from_str(contents: &str) -> Result<Self> {
        // serde_yaml reads an empty document as unit, not an empty map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PersistConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.save_dir.is_empty(), "save_dir cannot be empty");
        anyhow::ensure!(!self.world_file.is_empty(), "world_file cannot be empty");

        anyhow::ensure!(
            self.world_file.len() <= WORLD_FILE_MAX,
            "world_file too long: {} chars (max {})",
            self.world_file.len(),
            WORLD_FILE_MAX
        );

        // A bare file name; directories belong in save_dir
        anyhow::ensure!(
            !self.world_file.contains('/') && !self.world_file.contains('\\'),
            "world_file must be a file name, got {}",
            self.world_file
        );

        Ok(())
    }

    /// Save configuration to a YAML file
    ///
    /// Useful for generating config templates
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Full path of the world file
    pub fn world_path(&self) -> PathBuf {
        Path::new(&self.save_dir).join(&self.world_file)
    }

    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            strategy: self.strategy,
            compress: self.compress,
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            dangling_policy: self.dangling_policy,
            strict_length: self.strict_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PersistConfig::from_str("").unwrap();
        assert_eq!(config, PersistConfig::default());
    }

    #[test]
    fn test_default_values() {
        let config = PersistConfig::from_str("compress: true\n").unwrap();

        assert_eq!(config.save_dir, "./save/");
        assert_eq!(config.world_file, "world.bin");
        assert!(config.keep_backup);
        assert!(config.compress);
        assert_eq!(config.strategy, SaveStrategy::Standard);
        assert_eq!(config.dangling_policy, DanglingPolicy::LogAndDrop);
        assert!(config.strict_length);
    }

    #[test]
    fn test_full_config() {
        let config_str = r#"
# World save configuration
save_dir: "/var/shard/save"
world_file: "britain.bin"
keep_backup: false

compress: false
strategy: parallel

dangling_policy: fail
strict_length: false
"#;

        let config = PersistConfig::from_str(config_str).unwrap();

        assert_eq!(config.save_dir, "/var/shard/save");
        assert_eq!(config.world_file, "britain.bin");
        assert!(!config.keep_backup);
        assert!(!config.compress);
        assert_eq!(config.strategy, SaveStrategy::Parallel);
        assert_eq!(config.dangling_policy, DanglingPolicy::Fail);
        assert!(!config.strict_length);
        assert_eq!(config.world_path(), PathBuf::from("/var/shard/save/britain.bin"));
    }

    #[test]
    fn test_options_follow_config() {
        let config = PersistConfig::from_str("strategy: parallel\ndangling_policy: drop\n").unwrap();

        let save = config.save_options();
        assert_eq!(save.strategy, SaveStrategy::Parallel);
        assert!(save.compress);

        let load = config.load_options();
        assert_eq!(load.dangling_policy, DanglingPolicy::Drop);
        assert!(load.strict_length);
    }

    #[test]
    fn test_unknown_policy() {
        let result = PersistConfig::from_str("dangling_policy: ignore\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        let config_str = r#"
save_dir: [this is not valid yaml
"#;

        let result = PersistConfig::from_str(config_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_type() {
        let result = PersistConfig::from_str("compress: \"sometimes\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_empty_world_file() {
        let result = PersistConfig::from_str("world_file: \"\"\n");
        assert!(result.is_err());

        let err_msg = format!("{}", result.unwrap_err());
        assert!(err_msg.contains("world_file"));
    }

    #[test]
    fn test_world_file_with_directory() {
        let result = PersistConfig::from_str("world_file: \"saves/world.bin\"\n");
        assert!(result.is_err());

        let err_msg = format!("{}", result.unwrap_err());
        assert!(err_msg.contains("must be a file name"));
    }

    #[test]
    fn test_save_and_load() {
        let config = PersistConfig {
            strategy: SaveStrategy::Parallel,
            ..PersistConfig::default()
        };

        let temp_file = std::env::temp_dir().join("test_save_persist_config.yaml");

        config.save(&temp_file).unwrap();
        let loaded = PersistConfig::from_file(&temp_file).unwrap();
        assert_eq!(config, loaded);

        std::fs::remove_file(temp_file).ok();
    }
}
