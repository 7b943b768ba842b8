pub mod agent;
pub mod device;
pub mod pairing;

pub use agent::AgentPolicy;
pub use device::{BluetoothAddress, BluetoothDevice, ConnectionSignal};
pub use pairing::{PairingCoordinator, PairingMode, PairingOutcome, PairingSession, PairingState};
