use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BluetoothError;

/// 48-bit Bluetooth device address, displayed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BluetoothAddress([u8; 6]);

impl BluetoothAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Lowercase, underscore-separated form the mixer embeds in card and endpoint names.
    pub fn endpoint_key(&self) -> String {
        self.to_string().replace(':', "_").to_ascii_lowercase()
    }

    pub fn from_endpoint_key(key: &str) -> Option<Self> {
        key.replace('_', ":").parse().ok()
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for BluetoothAddress {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BluetoothError::InvalidAddress(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BluetoothAddress> for String {
    fn from(address: BluetoothAddress) -> Self {
        address.to_string()
    }
}

/// A device known to the Bluetooth daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothDevice {
    pub address: BluetoothAddress,
    pub name: String,
    pub paired: bool,
    pub connected: bool,
}

impl BluetoothDevice {
    pub fn new(address: BluetoothAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            paired: false,
            connected: false,
        }
    }

    pub fn paired(mut self, paired: bool) -> Self {
        self.paired = paired;
        self
    }

    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }
}

impl fmt::Display for BluetoothDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.address)?;
        match (self.paired, self.connected) {
            (_, true) => write!(f, " (connected)"),
            (true, false) => write!(f, " (paired)"),
            (false, false) => Ok(()),
        }
    }
}

/// Raw "Connected" property change from the daemon's signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSignal {
    pub address: BluetoothAddress,
    pub connected: bool,
}
