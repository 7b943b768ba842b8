use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bluetooth::BluetoothAddress;

/// Name prefixes the mixer gives to endpoints backed by a Bluetooth card.
const BLUEZ_SINK_PREFIXES: &[&str] = &["bluez_sink.", "bluez_output."];
const BLUEZ_SOURCE_PREFIXES: &[&str] = &["bluez_source.", "bluez_input."];
const BLUEZ_CARD_PREFIX: &str = "bluez_card.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Sink,
    Source,
}

impl DeviceKind {
    /// Word used in mixer subcommands (`set-sink-volume`, `list sources`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Sink => "sink",
            DeviceKind::Source => "source",
        }
    }

    pub fn bluetooth_prefixes(&self) -> &'static [&'static str] {
        match self {
            DeviceKind::Sink => BLUEZ_SINK_PREFIXES,
            DeviceKind::Source => BLUEZ_SOURCE_PREFIXES,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Sink => write!(f, "Output"),
            DeviceKind::Source => write!(f, "Input"),
        }
    }
}

/// One mixer endpoint. `id` is the mixer-assigned name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub index: u32,
    pub id: String,
    pub kind: DeviceKind,
    pub description: String,
    pub volume: u8,
    pub muted: bool,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}% [{}]",
            self.description,
            self.kind,
            self.volume,
            if self.muted { "Muted" } else { "Live" }
        )
    }
}

impl AudioDevice {
    pub fn new(id: impl Into<String>, description: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            index: 0,
            id: id.into(),
            kind,
            description: description.into(),
            volume: 0,
            muted: false,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume.min(100);
        self
    }

    pub fn set_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Whether this endpoint belongs to the Bluetooth device at `address`.
    pub fn matches_address(&self, address: &BluetoothAddress) -> bool {
        let key = address.endpoint_key();
        let id = self.id.to_ascii_lowercase();
        self.kind
            .bluetooth_prefixes()
            .iter()
            .any(|prefix| id.starts_with(&format!("{prefix}{key}")))
    }

    /// Recover the Bluetooth address encoded in a `bluez_*` endpoint name.
    pub fn bluetooth_address(&self) -> Option<BluetoothAddress> {
        let id = self.id.to_ascii_lowercase();
        let rest = self
            .kind
            .bluetooth_prefixes()
            .iter()
            .find_map(|prefix| id.strip_prefix(prefix))?;
        BluetoothAddress::from_endpoint_key(rest.get(..17)?)
    }
}

/// A sound card as reported by the mixer; only the fields needed for profile switching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCard {
    pub index: u32,
    pub name: String,
    pub active_profile: Option<String>,
}

impl AudioCard {
    pub fn matches_address(&self, address: &BluetoothAddress) -> bool {
        self.name
            .to_ascii_lowercase()
            .starts_with(&format!("{BLUEZ_CARD_PREFIX}{}", address.endpoint_key()))
    }
}

/// Immutable view of the mixer's endpoints and defaults at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub sinks: Vec<AudioDevice>,
    pub sources: Vec<AudioDevice>,
    pub default_sink: String,
    pub default_source: String,
}

impl DeviceSnapshot {
    pub fn devices(&self, kind: DeviceKind) -> &[AudioDevice] {
        match kind {
            DeviceKind::Sink => &self.sinks,
            DeviceKind::Source => &self.sources,
        }
    }

    pub fn devices_mut(&mut self, kind: DeviceKind) -> &mut Vec<AudioDevice> {
        match kind {
            DeviceKind::Sink => &mut self.sinks,
            DeviceKind::Source => &mut self.sources,
        }
    }

    pub fn default_id(&self, kind: DeviceKind) -> &str {
        match kind {
            DeviceKind::Sink => &self.default_sink,
            DeviceKind::Source => &self.default_source,
        }
    }

    pub fn set_default_id(&mut self, kind: DeviceKind, id: impl Into<String>) {
        match kind {
            DeviceKind::Sink => self.default_sink = id.into(),
            DeviceKind::Source => self.default_source = id.into(),
        }
    }

    pub fn find(&self, kind: DeviceKind, id: &str) -> Option<&AudioDevice> {
        self.devices(kind).iter().find(|d| d.id == id)
    }

    pub fn default_device(&self, kind: DeviceKind) -> Option<&AudioDevice> {
        self.find(kind, self.default_id(kind))
    }

    /// Human label for an endpoint id, falling back to the id itself.
    pub fn display_name(&self, kind: DeviceKind, id: &str) -> String {
        self.find(kind, id)
            .map(|d| d.description.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// First endpoint of `kind` belonging to the Bluetooth device at `address`.
    pub fn match_endpoint(&self, kind: DeviceKind, address: &BluetoothAddress) -> Option<&AudioDevice> {
        self.devices(kind).iter().find(|d| d.matches_address(address))
    }

    /// True when both endpoint lists equal the given ones by value; defaults
    /// are not compared.
    pub fn same_endpoints(&self, sinks: &[AudioDevice], sources: &[AudioDevice]) -> bool {
        self.sinks == sinks && self.sources == sources
    }

    /// A non-empty default that names no listed endpoint. Tolerated until the next poll.
    pub fn dangling_default(&self, kind: DeviceKind) -> bool {
        let id = self.default_id(kind);
        !id.is_empty() && self.find(kind, id).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> BluetoothAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_matches_pulseaudio_and_pipewire_names() {
        let legacy = AudioDevice::new("bluez_sink.aa_bb_cc_dd_ee_ff.a2dp_sink", "Headset", DeviceKind::Sink);
        let pipewire = AudioDevice::new("bluez_output.AA_BB_CC_DD_EE_FF.1", "Headset", DeviceKind::Sink);
        let other = AudioDevice::new("bluez_sink.11_22_33_44_55_66.a2dp_sink", "Other", DeviceKind::Sink);

        assert!(legacy.matches_address(&address()));
        assert!(pipewire.matches_address(&address()));
        assert!(!other.matches_address(&address()));
    }

    #[test]
    fn test_source_prefix_does_not_match_sink() {
        let sink_named_source =
            AudioDevice::new("bluez_source.aa_bb_cc_dd_ee_ff.hfp", "Mic", DeviceKind::Sink);
        assert!(!sink_named_source.matches_address(&address()));
    }

    #[test]
    fn test_bluetooth_address_round_trip_from_name() {
        let device = AudioDevice::new("bluez_source.aa_bb_cc_dd_ee_ff.handsfree", "Mic", DeviceKind::Source);
        assert_eq!(device.bluetooth_address(), Some(address()));

        let wired = AudioDevice::new("alsa_input.pci-0000_00_1f.3.analog-stereo", "Mic", DeviceKind::Source);
        assert_eq!(wired.bluetooth_address(), None);
    }

    #[test]
    fn test_card_match() {
        let card = AudioCard {
            index: 3,
            name: "bluez_card.AA_BB_CC_DD_EE_FF".to_string(),
            active_profile: None,
        };
        assert!(card.matches_address(&address()));
    }

    #[test]
    fn test_dangling_default() {
        let mut snapshot = DeviceSnapshot {
            sinks: vec![AudioDevice::new("speakers", "Speakers", DeviceKind::Sink)],
            default_sink: "speakers".to_string(),
            ..Default::default()
        };
        assert!(!snapshot.dangling_default(DeviceKind::Sink));
        assert!(!snapshot.dangling_default(DeviceKind::Source));

        snapshot.sinks.clear();
        assert!(snapshot.dangling_default(DeviceKind::Sink));
    }
}
