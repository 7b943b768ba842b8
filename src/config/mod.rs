pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{
    BluetoothConfig, Config, GeneralConfig, MixerConfig, NotificationConfig, PollingConfig,
    TimingConfig,
};
