use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioCard, AudioDevice, DeviceKind};
use crate::bluetooth::{AgentPolicy, BluetoothAddress, BluetoothDevice, ConnectionSignal};
use crate::error::{BluetoothResult, MixerResult};

/// Trait for mixer operations - abstracts the PulseAudio-compatible CLI.
///
/// Calls block on an external process; async callers go through
/// [`MixerHandle`](crate::audio::MixerHandle).
pub trait MixerInterface: Send + Sync {
    /// List all sinks or sources with their levels
    fn list_devices(&self, kind: DeviceKind) -> MixerResult<Vec<AudioDevice>>;

    /// List sound cards and their active profiles
    fn list_cards(&self) -> MixerResult<Vec<AudioCard>>;

    /// Name of the current default sink/source as reported by the mixer
    fn get_default(&self, kind: DeviceKind) -> MixerResult<String>;

    fn set_default(&self, kind: DeviceKind, id: &str) -> MixerResult<()>;

    /// Front-left volume in percent
    fn get_volume(&self, kind: DeviceKind, id: &str) -> MixerResult<u8>;

    fn set_volume(&self, kind: DeviceKind, id: &str, percent: u8) -> MixerResult<()>;

    fn get_mute(&self, kind: DeviceKind, id: &str) -> MixerResult<bool>;

    fn set_mute(&self, kind: DeviceKind, id: &str, muted: bool) -> MixerResult<()>;

    fn set_card_profile(&self, card: &str, profile: &str) -> MixerResult<()>;
}

/// Trait for Bluetooth daemon operations - abstracts BlueZ over D-Bus
#[async_trait]
pub trait BluetoothInterface: Send + Sync {
    /// Every device on the default adapter's object tree
    async fn list_devices(&self) -> BluetoothResult<Vec<BluetoothDevice>>;

    async fn set_trusted(&self, address: BluetoothAddress, trusted: bool) -> BluetoothResult<()>;

    /// Pair with a device. Reports `AlreadyPaired` when the daemon says so.
    async fn pair(&self, address: BluetoothAddress) -> BluetoothResult<()>;

    async fn connect(&self, address: BluetoothAddress) -> BluetoothResult<()>;

    /// Remove (unpair) a device from the adapter
    async fn remove_device(&self, address: BluetoothAddress) -> BluetoothResult<()>;

    async fn start_discovery(&self) -> BluetoothResult<()>;

    async fn stop_discovery(&self) -> BluetoothResult<()>;

    /// Stream of "Connected" property changes until `cancel` fires
    async fn connection_signals(
        &self,
        cancel: CancellationToken,
    ) -> BluetoothResult<mpsc::UnboundedReceiver<ConnectionSignal>>;

    /// Register the pairing agent and request it as the default agent
    async fn register_agent(&self, policy: AgentPolicy) -> BluetoothResult<()>;

    async fn unregister_agent(&self) -> BluetoothResult<()>;
}

/// Trait for file system operations - abstracts std::fs for testability
pub trait FileSystemInterface {
    /// Read the entire contents of a configuration file
    fn read_config_file(&self, path: &Path) -> Result<String>;

    /// Write configuration content to a file
    fn write_config_file(&self, path: &Path, content: &str) -> Result<()>;

    /// Check if a configuration file exists
    fn config_file_exists(&self, path: &Path) -> bool;

    /// Create the directory structure for config files
    fn create_config_dir(&self, path: &Path) -> Result<()>;

    /// Remove a file (used for the service unit)
    fn remove_file(&self, path: &Path) -> Result<()>;
}
