//! Ready-made mixer/daemon setups shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use bluetooth_audio_monitor::audio::{DeviceKind, MixerHandle, Poller, SnapshotStore};
use bluetooth_audio_monitor::bluetooth::PairingCoordinator;
use bluetooth_audio_monitor::config::{Config, TimingConfig};
use bluetooth_audio_monitor::events::EngineEvent;
use bluetooth_audio_monitor::notifications::{NotificationManager, TestNotificationSender};
use bluetooth_audio_monitor::system::{MockBluetooth, MockMixer};
use bluetooth_audio_monitor::ReconciliationEngine;

use super::builders::*;

pub const PROFILE: &str = "a2dp_sink";

/// Built-in sink and source, both the defaults
pub fn desktop_mixer() -> MockMixer {
    let mixer = MockMixer::new();
    let sink = built_in_sink();
    let source = built_in_source();
    mixer.set_mock_default(DeviceKind::Sink, &sink.id);
    mixer.set_mock_default(DeviceKind::Source, &source.id);
    mixer.add_device(sink);
    mixer.add_device(source);
    mixer
}

pub fn card_name(device: &str) -> String {
    format!("bluez_card.{}", address(device).endpoint_key())
}

/// Register a card for `address` whose endpoints appear after the profile switch
pub fn stage_headset(mixer: &MockMixer, address: &str) {
    let card = card_name(address);
    mixer.add_card(&card, Some("headset_head_unit"));
    mixer.stage_endpoints(&card, vec![headset_sink(address), headset_source(address)]);
}

pub fn poller(mixer: &MockMixer) -> (Arc<Poller<MockMixer>>, broadcast::Receiver<EngineEvent>) {
    let (events, rx) = broadcast::channel(64);
    let poller = Poller::new(
        MixerHandle::new(mixer.clone()),
        Arc::new(SnapshotStore::new()),
        events,
        Config::default().polling.interval(),
    );
    (Arc::new(poller), rx)
}

pub fn coordinator(
    mixer: &MockMixer,
    bluetooth: &MockBluetooth,
) -> PairingCoordinator<MockMixer, MockBluetooth> {
    let (poller, _) = poller(mixer);
    PairingCoordinator::new(
        Arc::new(bluetooth.clone()),
        poller,
        TimingConfig::immediate(),
        PROFILE,
        CancellationToken::new(),
    )
}

/// Zero settle delays, a short scan and no startup sweep
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.timings = TimingConfig::immediate();
    config.bluetooth.auto_connect_paired = false;
    config.bluetooth.scan_duration_ms = 10;
    config.notifications.show_device_switches = true;
    config
}

pub fn engine(
    mixer: &MockMixer,
    bluetooth: &MockBluetooth,
    config: Config,
) -> (ReconciliationEngine<MockMixer, MockBluetooth>, TestNotificationSender) {
    let sender = TestNotificationSender::new();
    let notifications =
        NotificationManager::with_sender(&config.notifications, Box::new(sender.clone()));
    let engine = ReconciliationEngine::new(mixer.clone(), bluetooth.clone(), config, notifications);
    (engine, sender)
}
