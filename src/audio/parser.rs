//! Parsing of `pactl` text output.
//!
//! This is the only place that knows the mixer's output format. Everything
//! above it works with [`AudioDevice`], [`AudioCard`] and plain values.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::device::{AudioCard, AudioDevice, DeviceKind};

static FRONT_LEFT_VOLUME: LazyLock<Option<Regex>> =
    LazyLock::new(|| match Regex::new(r"front-left:.*?(\d+)%") {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "Invalid volume pattern");
            None
        }
    });

/// Default name some PipeWire setups report instead of a real endpoint.
const PLACEHOLDER_DEFAULT: &str = "pipewire";

/// Parse `pactl list sinks` / `pactl list sources` output.
///
/// Blocks start at `Sink #N` / `Source #N`; within a block the first
/// `Name:`, `Description:`, `Mute:` and `Volume:` lines are used.
pub fn parse_device_list(output: &str, kind: DeviceKind) -> Vec<AudioDevice> {
    let header = match kind {
        DeviceKind::Sink => "Sink #",
        DeviceKind::Source => "Source #",
    };

    let mut devices = Vec::new();
    let mut current: Option<PartialDevice> = None;

    for line in output.lines().map(str::trim) {
        if let Some(index) = line.strip_prefix(header) {
            if let Some(device) = current.take().and_then(|p| p.finish(kind)) {
                devices.push(device);
            }
            current = Some(PartialDevice {
                index: index.trim().parse().unwrap_or_default(),
                ..Default::default()
            });
            continue;
        }

        let Some(partial) = current.as_mut() else {
            continue;
        };

        if let Some(name) = field(line, "Name:") {
            partial.name.get_or_insert_with(|| name.to_string());
        } else if let Some(description) = field(line, "Description:") {
            partial.description.get_or_insert_with(|| description.to_string());
        } else if line.starts_with("Mute:") {
            partial.muted.get_or_insert_with(|| parse_mute(line));
        } else if line.starts_with("Volume:") && partial.volume.is_none() {
            partial.volume = parse_volume(line);
        }
    }

    if let Some(device) = current.and_then(|p| p.finish(kind)) {
        devices.push(device);
    }

    debug!("Parsed {} {}s", devices.len(), kind.as_str());
    devices
}

/// Parse `pactl list cards` output into card names and active profiles.
pub fn parse_card_list(output: &str) -> Vec<AudioCard> {
    let mut cards = Vec::new();
    let mut current: Option<AudioCard> = None;

    for line in output.lines().map(str::trim) {
        if let Some(index) = line.strip_prefix("Card #") {
            cards.extend(current.take().filter(|c| !c.name.is_empty()));
            current = Some(AudioCard {
                index: index.trim_end_matches(':').trim().parse().unwrap_or_default(),
                name: String::new(),
                active_profile: None,
            });
            continue;
        }

        let Some(card) = current.as_mut() else {
            continue;
        };

        if let Some(name) = field(line, "Name:") {
            if card.name.is_empty() {
                card.name = name.to_string();
            }
        } else if let Some(profile) = field(line, "Active Profile:") {
            card.active_profile = Some(profile.to_string());
        }
    }

    cards.extend(current.filter(|c| !c.name.is_empty()));
    cards
}

/// Extract the front-left channel percentage from `get-*-volume` or a `Volume:` line.
pub fn parse_volume(output: &str) -> Option<u8> {
    FRONT_LEFT_VOLUME
        .as_ref()?
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|percent| percent.min(100) as u8)
}

/// `Mute: yes` / `Mute: no`.
pub fn parse_mute(output: &str) -> bool {
    output.to_ascii_lowercase().contains("yes")
}

/// Resolve the raw `get-default-*` answer against the listed endpoints.
///
/// A placeholder default (`pipewire`) resolves to the first listed endpoint.
pub fn resolve_default(raw: &str, devices: &[AudioDevice]) -> String {
    let name = raw.trim();
    if name.eq_ignore_ascii_case(PLACEHOLDER_DEFAULT) {
        if let Some(first) = devices.first() {
            debug!("Default reported as {name:?}, using first endpoint {}", first.id);
            return first.id.clone();
        }
    }
    name.to_string()
}

#[derive(Default)]
struct PartialDevice {
    index: u32,
    name: Option<String>,
    description: Option<String>,
    volume: Option<u8>,
    muted: Option<bool>,
}

impl PartialDevice {
    fn finish(self, kind: DeviceKind) -> Option<AudioDevice> {
        let name = self.name?;
        let description = self.description.unwrap_or_else(|| name.clone());
        Some(
            AudioDevice::new(name, description, kind)
                .with_index(self.index)
                .with_volume(self.volume.unwrap_or_default())
                .set_muted(self.muted.unwrap_or_default()),
        )
    }
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}
