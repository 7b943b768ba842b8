use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::system::FileSystemInterface;

use super::types::Config;

/// Configuration loader that uses dependency injection for file system operations
pub struct ConfigLoader<F: FileSystemInterface> {
    file_system: F,
    config_path: PathBuf,
}

impl<F: FileSystemInterface> ConfigLoader<F> {
    pub fn new(file_system: F, config_path: PathBuf) -> Self {
        Self {
            file_system,
            config_path,
        }
    }

    /// Load configuration from the configured path
    pub fn load_config(&self) -> Result<Config> {
        debug!("Loading configuration from: {}", self.config_path.display());

        if !self.file_system.config_file_exists(&self.config_path) {
            info!("Configuration file not found, creating default configuration");
            return Ok(self.create_default_config());
        }

        let config_content = self
            .file_system
            .read_config_file(&self.config_path)
            .with_context(|| {
                format!(
                    "Failed to read configuration file: {}",
                    self.config_path.display()
                )
            })?;

        let config: Config = toml::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse configuration file: {}",
                self.config_path.display()
            )
        })?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to the configured path
    pub fn save_config(&self, config: &Config) -> Result<()> {
        debug!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            self.file_system
                .create_config_dir(parent)
                .with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
        }

        let config_content =
            toml::to_string_pretty(config).context("Failed to serialize configuration")?;

        self.file_system
            .write_config_file(&self.config_path, &config_content)
            .with_context(|| {
                format!(
                    "Failed to write configuration file: {}",
                    self.config_path.display()
                )
            })?;

        info!("Configuration saved to: {}", self.config_path.display());
        Ok(())
    }

    /// Get the configuration file path
    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.file_system.config_file_exists(&self.config_path)
    }

    /// Defaults, written out on a best-effort basis
    fn create_default_config(&self) -> Config {
        let config = Config::default();

        if let Err(e) = self.save_config(&config) {
            warn!(
                "Could not save default config to {}: {:#}. Using default config.",
                self.config_path.display(),
                e
            );
            return config;
        }

        info!(
            "Created default configuration file: {}",
            self.config_path.display()
        );
        config
    }
}

// Convenience constructor for production use with StandardFileSystem
impl ConfigLoader<crate::system::StandardFileSystem> {
    pub fn new_production(config_path: PathBuf) -> Self {
        Self::new(crate::system::StandardFileSystem, config_path)
    }

    /// Create a production config loader with the default path
    pub fn new_with_default_path() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self::new_production(config_path))
    }

    /// `~/.config/bluetooth-audio-monitor/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("bluetooth-audio-monitor/config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MockFileSystem;
    use std::path::PathBuf;

    #[test]
    fn test_load_nonexistent_config_creates_default() {
        let mock_fs = MockFileSystem::new();
        let config_path = PathBuf::from("/test/config.toml");
        let loader = ConfigLoader::new(mock_fs.clone(), config_path.clone());

        let config = loader.load_config().unwrap();

        assert_eq!(config, Config::default());
        assert!(mock_fs.file_content(&config_path).is_some());
    }

    #[test]
    fn test_default_config_survives_unwritable_directory() {
        let mock_fs = MockFileSystem::new();
        mock_fs.set_create_dir_failure(true);
        let loader = ConfigLoader::new(mock_fs.clone(), PathBuf::from("/readonly/config.toml"));

        let config = loader.load_config().unwrap();

        assert_eq!(config.polling.interval_ms, 2000);
        assert!(mock_fs.get_write_calls().is_empty());
    }

    #[test]
    fn test_load_existing_config() {
        let mock_fs = MockFileSystem::new();
        let config_path = PathBuf::from("/test/config.toml");

        let config_content = r#"
[general]
log_level = "debug"

[polling]
interval_ms = 500

[mixer]
program = "/usr/bin/pactl"

[notifications]
show_pairing_results = false
show_device_switches = true
"#;
        mock_fs.add_file(&config_path, config_content.to_string());

        let loader = ConfigLoader::new(mock_fs, config_path);
        let config = loader.load_config().unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.mixer.program, "/usr/bin/pactl");
        assert_eq!(config.mixer.a2dp_profile, "a2dp_sink");
        assert!(!config.notifications.show_pairing_results);
        assert!(config.notifications.show_device_switches);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mock_fs = MockFileSystem::new();
        let config_path = PathBuf::from("/test/broken.toml");
        mock_fs.add_file(&config_path, "[polling\ninterval_ms = ".to_string());

        let loader = ConfigLoader::new(mock_fs, config_path);
        let err = loader.load_config().unwrap_err();

        assert!(err.to_string().contains("/test/broken.toml"));
    }

    #[test]
    fn test_save_config() {
        let mock_fs = MockFileSystem::new();
        let config_path = PathBuf::from("/test/config.toml");
        let loader = ConfigLoader::new(mock_fs.clone(), config_path.clone());

        loader.save_config(&Config::default()).unwrap();

        let write_calls = mock_fs.get_write_calls();
        assert_eq!(write_calls.len(), 1);
        assert_eq!(write_calls[0].0, config_path);
        assert!(write_calls[0].1.contains("[timings]"));

        let dir_calls = mock_fs.get_directory_creation_calls();
        assert_eq!(dir_calls, vec![PathBuf::from("/test")]);
    }

    #[test]
    fn test_config_exists() {
        let mock_fs = MockFileSystem::new();
        let config_path = PathBuf::from("/test/config.toml");
        let loader = ConfigLoader::new(mock_fs.clone(), config_path.clone());

        assert!(!loader.config_exists());

        mock_fs.add_file(&config_path, "test content".to_string());
        assert!(loader.config_exists());
    }
}
