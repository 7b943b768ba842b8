pub mod audio;
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod notifications;
pub mod service;
pub mod system;

pub use audio::{AudioDevice, DeviceKind, DeviceSnapshot};
pub use bluetooth::{BluetoothAddress, BluetoothDevice, PairingOutcome};
pub use config::Config;
pub use error::{BluetoothError, MixerError, OperationError, PairingError};
pub use events::{EngineEvent, RefreshNow, RefreshReason};
pub use service::ReconciliationEngine;
