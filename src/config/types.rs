use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub mixer: MixerConfig,

    #[serde(default)]
    pub bluetooth: BluetoothConfig,

    #[serde(default)]
    pub timings: TimingConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub file_logging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub program: String,
    /// Card profile that exposes a Bluetooth device as a streaming sink
    pub a2dp_profile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Reconnect paired devices when the daemon starts
    pub auto_connect_paired: bool,
    pub agent_pin_code: String,
    pub scan_duration_ms: u64,
}

/// Settle delays. These are waits, never timeouts: nothing fails when one elapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub pair_settle_ms: u64,
    pub connect_settle_ms: u64,
    pub profile_settle_ms: u64,
    pub signal_settle_ms: u64,
    pub final_refresh_ms: u64,
    pub sweep_refresh_ms: u64,
    pub endpoint_match_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub show_pairing_results: bool,
    pub show_device_switches: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            file_logging: true,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            program: "pactl".to_string(),
            a2dp_profile: "a2dp_sink".to_string(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            auto_connect_paired: true,
            agent_pin_code: "0000".to_string(),
            scan_duration_ms: 10_000,
        }
    }
}

impl BluetoothConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pair_settle_ms: 5000,
            connect_settle_ms: 5000,
            profile_settle_ms: 2000,
            signal_settle_ms: 3000,
            final_refresh_ms: 3000,
            sweep_refresh_ms: 6000,
            endpoint_match_attempts: 3,
        }
    }
}

impl TimingConfig {
    /// All delays zero; used where waiting would only slow things down.
    pub fn immediate() -> Self {
        Self {
            pair_settle_ms: 0,
            connect_settle_ms: 0,
            profile_settle_ms: 0,
            signal_settle_ms: 0,
            final_refresh_ms: 0,
            sweep_refresh_ms: 0,
            ..Self::default()
        }
    }

    pub fn pair_settle(&self) -> Duration {
        Duration::from_millis(self.pair_settle_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn profile_settle(&self) -> Duration {
        Duration::from_millis(self.profile_settle_ms)
    }

    pub fn signal_settle(&self) -> Duration {
        Duration::from_millis(self.signal_settle_ms)
    }

    pub fn final_refresh(&self) -> Duration {
        Duration::from_millis(self.final_refresh_ms)
    }

    pub fn sweep_refresh(&self) -> Duration {
        Duration::from_millis(self.sweep_refresh_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            show_pairing_results: true,
            show_device_switches: false,
        }
    }
}

impl Config {
    /// Load from `config_path`, or the default location when `None`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let loader = match config_path {
            Some(path) => ConfigLoader::new_production(PathBuf::from(path)),
            None => ConfigLoader::new_with_default_path()?,
        };
        let config = loader.load_config()?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            bail!("polling.interval_ms must be greater than zero");
        }
        if self.timings.endpoint_match_attempts == 0 {
            bail!("timings.endpoint_match_attempts must be at least 1");
        }
        let pin_len = self.bluetooth.agent_pin_code.chars().count();
        if !(1..=16).contains(&pin_len) {
            bail!("bluetooth.agent_pin_code must be 1-16 characters, got {pin_len}");
        }
        if self.mixer.program.trim().is_empty() {
            bail!("mixer.program must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.interval(), Duration::from_secs(2));
        assert_eq!(config.timings.signal_settle(), Duration::from_secs(3));
        assert_eq!(config.mixer.a2dp_profile, "a2dp_sink");
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config = toml::from_str(
            r#"
[timings]
profile_settle_ms = 500

[bluetooth]
agent_pin_code = "1234"
"#,
        )
        .unwrap();

        assert_eq!(config.timings.profile_settle_ms, 500);
        assert_eq!(config.timings.pair_settle_ms, 5000);
        assert_eq!(config.bluetooth.agent_pin_code, "1234");
        assert!(config.bluetooth.auto_connect_paired);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.polling.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timings.endpoint_match_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.bluetooth.agent_pin_code = String::new();
        assert!(config.validate().is_err());

        config.bluetooth.agent_pin_code = "0".repeat(17);
        assert!(config.validate().is_err());
    }
}
