//! Test utility builders for creating audio endpoints and Bluetooth devices
//!
//! Individual methods may not be used by all tests, so dead code warnings are suppressed.

#![allow(dead_code)]

use bluetooth_audio_monitor::audio::{AudioDevice, DeviceKind, DeviceSnapshot};
use bluetooth_audio_monitor::bluetooth::{BluetoothAddress, BluetoothDevice};

pub const HEADSET: &str = "AA:BB:CC:DD:EE:FF";
pub const SPEAKER: &str = "11:22:33:44:55:66";

pub fn address(text: &str) -> BluetoothAddress {
    text.parse().unwrap()
}

/// Builder for creating test AudioDevice instances
pub struct AudioDeviceBuilder {
    id: String,
    description: String,
    kind: DeviceKind,
    volume: u8,
    muted: bool,
}

impl AudioDeviceBuilder {
    pub fn new() -> Self {
        Self {
            id: "alsa_output.pci-0000_00_1f.3.analog-stereo".to_string(),
            description: "Built-in Audio".to_string(),
            kind: DeviceKind::Sink,
            volume: 50,
            muted: false,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn sink(mut self) -> Self {
        self.kind = DeviceKind::Sink;
        self
    }

    pub fn source(mut self) -> Self {
        self.kind = DeviceKind::Source;
        self
    }

    pub fn volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    /// `bluez_output.<key>.1` / `bluez_input.<key>.0` for `address`
    pub fn bluetooth(mut self, address: &str) -> Self {
        let key = self::address(address).endpoint_key();
        self.id = match self.kind {
            DeviceKind::Sink => format!("bluez_output.{key}.1"),
            DeviceKind::Source => format!("bluez_input.{key}.0"),
        };
        self
    }

    pub fn build(self) -> AudioDevice {
        AudioDevice::new(self.id, self.description, self.kind)
            .with_volume(self.volume)
            .set_muted(self.muted)
    }
}

impl Default for AudioDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn built_in_sink() -> AudioDevice {
    AudioDeviceBuilder::new().build()
}

pub fn built_in_source() -> AudioDevice {
    AudioDeviceBuilder::new()
        .source()
        .id("alsa_input.pci-0000_00_1f.3.analog-stereo")
        .description("Built-in Microphone")
        .build()
}

pub fn headset_sink(address: &str) -> AudioDevice {
    AudioDeviceBuilder::new()
        .sink()
        .bluetooth(address)
        .description("Headset")
        .volume(70)
        .build()
}

pub fn headset_source(address: &str) -> AudioDevice {
    AudioDeviceBuilder::new()
        .source()
        .bluetooth(address)
        .description("Headset Microphone")
        .volume(80)
        .build()
}

/// Builder for creating test BluetoothDevice instances
pub struct BluetoothDeviceBuilder {
    address: BluetoothAddress,
    name: String,
    paired: bool,
    connected: bool,
}

impl BluetoothDeviceBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            address: self::address(address),
            name: "Headset".to_string(),
            paired: false,
            connected: false,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn paired(mut self) -> Self {
        self.paired = true;
        self
    }

    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    pub fn build(self) -> BluetoothDevice {
        BluetoothDevice::new(self.address, self.name)
            .paired(self.paired)
            .connected(self.connected)
    }
}

pub fn snapshot(sinks: Vec<AudioDevice>, sources: Vec<AudioDevice>) -> DeviceSnapshot {
    let default_sink = sinks.first().map(|d| d.id.clone()).unwrap_or_default();
    let default_source = sources.first().map(|d| d.id.clone()).unwrap_or_default();
    DeviceSnapshot {
        sinks,
        sources,
        default_sink,
        default_source,
    }
}
