pub mod device;
pub mod mixer;
pub mod parser;
pub mod poller;
pub mod store;

pub use device::{AudioCard, AudioDevice, DeviceKind, DeviceSnapshot};
pub use mixer::MixerHandle;
pub use poller::Poller;
pub use store::SnapshotStore;
