//! Error types for mixer, Bluetooth daemon and pairing operations.

use thiserror::Error;

use crate::bluetooth::{BluetoothAddress, PairingState};

/// Failure talking to the mixer command-line tool.
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {output:?}")]
    Unparsable { command: String, output: String },

    #[error("mixer worker failed: {0}")]
    Worker(String),
}

/// Failure reported by (or while reaching) the Bluetooth daemon.
#[derive(Debug, Clone, Error)]
pub enum BluetoothError {
    #[error("device {0} not found")]
    DeviceNotFound(BluetoothAddress),

    #[error("device {0} is already paired")]
    AlreadyPaired(BluetoothAddress),

    #[error("Bluetooth daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("{operation} failed: {message}")]
    Daemon { operation: String, message: String },

    #[error("invalid Bluetooth address: {0:?}")]
    InvalidAddress(String),
}

impl BluetoothError {
    pub fn daemon(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Daemon {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Session-fatal pairing errors. The `Display` text is what the user sees.
#[derive(Debug, Clone, Error)]
pub enum PairingError {
    #[error("another pairing session is in progress for {active}")]
    Busy { active: BluetoothAddress },

    #[error("Bluetooth device {address} was not found")]
    DeviceNotFound { address: BluetoothAddress },

    #[error("no audio card found for Bluetooth device {address}")]
    CardNotFound { address: BluetoothAddress },

    #[error("Bluetooth daemon unavailable while handling {address}: {message}")]
    DaemonUnavailable {
        address: BluetoothAddress,
        message: String,
    },

    #[error("{step} failed for {address}: {source}")]
    Daemon {
        address: BluetoothAddress,
        step: PairingState,
        #[source]
        source: BluetoothError,
    },

    #[error("session for {address} cancelled during {step}")]
    Cancelled {
        address: BluetoothAddress,
        step: PairingState,
    },
}

impl PairingError {
    /// Wrap a daemon error raised during `step`, keeping the "not found" and
    /// "unavailable" cases distinct.
    pub fn from_daemon(address: BluetoothAddress, step: PairingState, err: BluetoothError) -> Self {
        match err {
            BluetoothError::DeviceNotFound(_) => Self::DeviceNotFound { address },
            BluetoothError::DaemonUnavailable(message) => {
                Self::DaemonUnavailable { address, message }
            }
            source => Self::Daemon {
                address,
                step,
                source,
            },
        }
    }
}

/// Errors from one-shot worker operations (scan, unpair, manual selection).
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("a {operation} is already running")]
    Busy { operation: &'static str },

    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error("operation cancelled")]
    Cancelled,
}

pub type MixerResult<T> = Result<T, MixerError>;
pub type BluetoothResult<T> = Result<T, BluetoothError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> BluetoothAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_from_daemon_maps_not_found() {
        let err = PairingError::from_daemon(
            addr(),
            PairingState::Connecting,
            BluetoothError::DeviceNotFound(addr()),
        );
        assert!(matches!(err, PairingError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_daemon_error_message_names_step_and_address() {
        let err = PairingError::from_daemon(
            addr(),
            PairingState::Pairing,
            BluetoothError::daemon("Pair", "org.bluez.Error.AuthenticationFailed"),
        );
        let message = err.to_string();
        assert!(message.contains("Pairing"));
        assert!(message.contains("AA:BB:CC:DD:EE:FF"));
        assert!(message.contains("AuthenticationFailed"));
    }
}
