use bluetooth_audio_monitor::audio::DeviceKind;
use bluetooth_audio_monitor::bluetooth::PairingState;
use bluetooth_audio_monitor::error::{BluetoothError, OperationError, PairingError};
use bluetooth_audio_monitor::events::{EngineEvent, RefreshReason};
use bluetooth_audio_monitor::system::{MockBluetooth, MockMixer};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

mod test_utils;
use test_utils::scenarios::{desktop_mixer, engine, stage_headset, test_config};
use test_utils::*;

/// Poll `condition` until it holds or five seconds pass
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn headset_env() -> (MockMixer, MockBluetooth) {
    let mixer = desktop_mixer();
    stage_headset(&mixer, HEADSET);
    let bluetooth = MockBluetooth::new();
    bluetooth.add_device(BluetoothDeviceBuilder::new(HEADSET).build());
    (mixer, bluetooth)
}

#[cfg(test)]
mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_start_reads_state_and_shutdown_cleans_up() {
        let (mixer, bluetooth) = headset_env();
        let mut config = test_config();
        config.bluetooth.agent_pin_code = "1234".to_string();
        let (engine, _) = engine(&mixer, &bluetooth, config);
        let engine = Arc::new(engine);

        assert_ok!(engine.start().await);

        assert_eq!(bluetooth.registered_agent().unwrap().pin_code(), "1234");
        let snapshot = engine.current_snapshot();
        assert_eq!(snapshot.sinks, vec![built_in_sink()]);
        assert_eq!(snapshot.default_source, built_in_source().id);
        assert_eq!(engine.bluetooth_devices().len(), 1);

        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .unwrap();

        assert!(bluetooth.registered_agent().is_none());
        assert_eq!(bluetooth.get_calls().last().unwrap(), "unregister-agent");
    }

    #[tokio::test]
    async fn test_settled_connection_refreshes_store() {
        let mixer = desktop_mixer();
        let bluetooth = MockBluetooth::new();
        let (engine, _) = engine(&mixer, &bluetooth, test_config());
        let engine = Arc::new(engine);
        let mut refresh = engine.subscribe_refresh();

        assert_ok!(engine.start().await);
        mixer.add_device(headset_sink(HEADSET));
        mixer.set_mock_default(DeviceKind::Sink, &headset_sink(HEADSET).id);
        assert!(bluetooth.emit_connection(address(HEADSET), true));

        let instruction = tokio::time::timeout(Duration::from_secs(5), refresh.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instruction.reason, RefreshReason::ConnectionSettled);

        eventually(|| engine.current_snapshot().default_sink == headset_sink(HEADSET).id).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_start_unregisters_agent() {
        let (mixer, bluetooth) = headset_env();
        bluetooth.set_signals_error(Some(BluetoothError::daemon(
            "subscribe",
            "org.freedesktop.DBus.Error.AccessDenied",
        )));
        let (engine, _) = engine(&mixer, &bluetooth, test_config());
        let engine = Arc::new(engine);

        assert_err!(engine.start().await);

        assert!(bluetooth.registered_agent().is_none());
        assert_eq!(bluetooth.get_calls().last().unwrap(), "unregister-agent");

        // Shutting down again after a failed start is harmless.
        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_startup_sweep_reconnects_paired_devices() {
        let mixer = desktop_mixer();
        stage_headset(&mixer, HEADSET);
        let bluetooth = MockBluetooth::new();
        bluetooth.add_device(BluetoothDeviceBuilder::new(HEADSET).paired().build());
        bluetooth.add_device(
            BluetoothDeviceBuilder::new(SPEAKER)
                .name("Speaker")
                .paired()
                .connected()
                .build(),
        );
        let mut config = test_config();
        config.bluetooth.auto_connect_paired = true;
        let (engine, _) = engine(&mixer, &bluetooth, config);
        let engine = Arc::new(engine);

        assert_ok!(engine.start().await);

        eventually(|| {
            engine
                .pairing()
                .last_session()
                .is_some_and(|s| s.state == PairingState::Done)
        })
        .await;

        assert_eq!(mixer.current_default(DeviceKind::Sink), headset_sink(HEADSET).id);
        let calls = bluetooth.get_calls();
        assert!(calls.contains(&format!("connect {HEADSET}")));
        assert!(!calls.contains(&format!("pair {HEADSET}")));
        assert!(!calls.contains(&format!("connect {SPEAKER}")));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_poller_changes_reach_subscribers() {
        let mixer = desktop_mixer();
        let bluetooth = MockBluetooth::new();
        let mut config = test_config();
        config.polling.interval_ms = 10;
        let (engine, _) = engine(&mixer, &bluetooth, config);
        let engine = Arc::new(engine);
        assert_ok!(engine.start().await);
        let mut events = engine.subscribe();

        mixer.add_device(headset_source(HEADSET));

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await.unwrap() {
                    EngineEvent::DevicesChanged => break EngineEvent::DevicesChanged,
                    EngineEvent::BluetoothListChanged => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, EngineEvent::DevicesChanged);
        assert_eq!(engine.current_snapshot().sources.len(), 2);
        engine.shutdown().await;
    }
}

#[cfg(test)]
mod mixer_operations {
    use super::*;

    #[tokio::test]
    async fn test_volume_round_trip() {
        let mixer = desktop_mixer();
        let (engine, _) = engine(&mixer, &MockBluetooth::new(), test_config());
        engine.refresh_all().await;
        let id = built_in_sink().id;

        assert_ok!(engine.set_volume(DeviceKind::Sink, &id, 42).await);

        assert_eq!(engine.get_volume(DeviceKind::Sink, &id).await.unwrap(), 42);
        assert_eq!(
            engine.current_snapshot().find(DeviceKind::Sink, &id).unwrap().volume,
            42
        );
    }

    #[tokio::test]
    async fn test_volume_is_clamped_and_unmutes() {
        let mixer = MockMixer::new();
        let sink = AudioDeviceBuilder::new().muted().build();
        mixer.add_device(sink.clone());
        let (engine, _) = engine(&mixer, &MockBluetooth::new(), test_config());

        engine.set_volume(DeviceKind::Sink, &sink.id, 0).await.unwrap();
        assert!(mixer.device(DeviceKind::Sink, &sink.id).unwrap().muted);

        engine.set_volume(DeviceKind::Sink, &sink.id, 250).await.unwrap();
        let after = mixer.device(DeviceKind::Sink, &sink.id).unwrap();
        assert_eq!(after.volume, 100);
        assert!(!after.muted);
    }

    #[tokio::test]
    async fn test_set_mute_updates_store() {
        let mixer = desktop_mixer();
        let (engine, _) = engine(&mixer, &MockBluetooth::new(), test_config());
        engine.refresh_all().await;
        let id = built_in_source().id;

        engine.set_mute(DeviceKind::Source, &id, true).await.unwrap();

        assert!(engine.current_snapshot().find(DeviceKind::Source, &id).unwrap().muted);
        assert!(mixer.get_calls().contains(&format!("set-source-mute {id} 1")));
    }

    #[tokio::test]
    async fn test_select_default_publishes_and_notifies() {
        let mixer = desktop_mixer();
        mixer.add_device(headset_sink(HEADSET));
        let (engine, sender) = engine(&mixer, &MockBluetooth::new(), test_config());
        engine.refresh_all().await;
        let id = headset_sink(HEADSET).id;

        let device = engine
            .select_default(DeviceKind::Sink, &id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(device.volume, 70);
        assert_eq!(mixer.current_default(DeviceKind::Sink), id);
        assert_eq!(engine.current_snapshot().default_sink, id);
        assert_eq!(
            sender.get_sent_notifications(),
            vec![(
                "Audio Device Switched".to_string(),
                "Output switched to Headset".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_select_unknown_default_fails_without_publishing() {
        let mixer = desktop_mixer();
        let (engine, _) = engine(&mixer, &MockBluetooth::new(), test_config());
        engine.refresh_all().await;
        let before = engine.current_snapshot();

        let error = engine
            .select_default(DeviceKind::Sink, "bluez_output.missing")
            .await
            .unwrap_err();

        assert!(matches!(error, OperationError::Mixer(_)));
        assert_eq!(*engine.current_snapshot(), *before);
    }
}

#[cfg(test)]
mod bluetooth_operations {
    use super::*;

    #[tokio::test]
    async fn test_pair_notifies_and_refreshes_list() {
        let (mixer, bluetooth) = headset_env();
        let (engine, sender) = engine(&mixer, &bluetooth, test_config());

        let outcome = engine.pair(address(HEADSET)).await.unwrap();

        assert_eq!(outcome.sink, Some(headset_sink(HEADSET).id));
        assert_eq!(
            sender.get_sent_notifications(),
            vec![(
                "Bluetooth Audio Connected".to_string(),
                "Headset is now the default output and input".to_string()
            )]
        );
        let listed = engine.bluetooth_devices();
        assert!(listed[0].paired && listed[0].connected);
    }

    #[tokio::test]
    async fn test_failed_pair_notifies_error() {
        let mixer = desktop_mixer();
        let bluetooth = MockBluetooth::new();
        let (engine, sender) = engine(&mixer, &bluetooth, test_config());

        let error = engine.activate(address(HEADSET)).await.unwrap_err();

        assert!(matches!(error, PairingError::DeviceNotFound { .. }));
        let sent = sender.get_sent_notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Bluetooth Audio Failed");
        assert_eq!(sent[0].1, error.to_string());
    }

    #[tokio::test]
    async fn test_unpair_removes_device_and_publishes_list() {
        let bluetooth = MockBluetooth::new();
        bluetooth.add_device(BluetoothDeviceBuilder::new(HEADSET).paired().build());
        bluetooth.add_device(BluetoothDeviceBuilder::new(SPEAKER).paired().build());
        let (engine, sender) = engine(&desktop_mixer(), &bluetooth, test_config());
        let mut events = engine.subscribe();

        engine.unpair(address(HEADSET)).await.unwrap();

        assert!(bluetooth.device(address(HEADSET)).is_none());
        let listed = engine.bluetooth_devices();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address, address(SPEAKER));
        assert_eq!(events.try_recv().unwrap(), EngineEvent::BluetoothListChanged);
        assert_eq!(sender.get_sent_notifications()[0].0, "Bluetooth Device Removed");
    }

    #[tokio::test]
    async fn test_unpair_unknown_device_reports_error() {
        let bluetooth = MockBluetooth::new();
        let (engine, sender) = engine(&desktop_mixer(), &bluetooth, test_config());

        let error = assert_err!(engine.unpair(address(HEADSET)).await);

        assert!(matches!(
            error,
            OperationError::Bluetooth(BluetoothError::DeviceNotFound(_))
        ));
        assert_eq!(sender.get_sent_notifications()[0].0, "Bluetooth Unpair Failed");

        // The guard is released after a failure.
        bluetooth.add_device(BluetoothDeviceBuilder::new(HEADSET).build());
        engine.unpair(address(HEADSET)).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_lists_discovered_devices() {
        let bluetooth = MockBluetooth::new();
        bluetooth.add_device(BluetoothDeviceBuilder::new(HEADSET).paired().build());
        bluetooth.add_discoverable(BluetoothDeviceBuilder::new(SPEAKER).name("Speaker").build());
        bluetooth.set_stop_discovery_error(Some(BluetoothError::daemon(
            "stop discovery",
            "org.bluez.Error.Failed",
        )));
        let (engine, _) = engine(&desktop_mixer(), &bluetooth, test_config());

        let devices = engine.scan().await.unwrap();

        assert_eq!(devices.len(), 2);
        assert!(devices.iter().any(|d| d.name == "Speaker"));
        assert!(!bluetooth.is_discovering());
        assert_eq!(engine.bluetooth_devices().len(), 2);
        assert!(bluetooth.get_calls().contains(&"stop-discovery".to_string()));
    }

    #[tokio::test]
    async fn test_overlapping_scan_is_busy() {
        let bluetooth = MockBluetooth::new();
        let (engine, _) = engine(&desktop_mixer(), &bluetooth, test_config());

        let (first, second) = tokio::join!(engine.scan(), engine.scan());

        assert!(first.is_ok());
        assert!(matches!(second, Err(OperationError::Busy { operation: "scan" })));
        assert_eq!(
            bluetooth
                .get_calls()
                .iter()
                .filter(|c| *c == "start-discovery")
                .count(),
            1
        );

        // Free again once the first scan is done.
        assert!(engine.scan().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_scan() {
        let bluetooth = MockBluetooth::new();
        let mut config = test_config();
        config.bluetooth.scan_duration_ms = 60_000;
        let (engine, _) = engine(&desktop_mixer(), &bluetooth, config);
        let engine = Arc::new(engine);

        let scan = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.scan().await }
        });
        eventually(|| bluetooth.is_discovering()).await;

        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), scan)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(OperationError::Cancelled)));
        assert!(!bluetooth.is_discovering());
        assert!(bluetooth.get_calls().contains(&"stop-discovery".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_session_waiting_to_settle() {
        let (mixer, bluetooth) = headset_env();
        let mut config = test_config();
        config.timings.connect_settle_ms = 60_000;
        let (engine, notifications) = engine(&mixer, &bluetooth, config);
        let engine = Arc::new(engine);

        let session = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.pair(address(HEADSET)).await }
        });
        eventually(|| bluetooth.get_calls().contains(&format!("connect {HEADSET}"))).await;

        tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(PairingError::Cancelled { step: PairingState::Pairing, .. })
        ));
        assert!(!engine.pairing().is_busy());
        assert_eq!(
            engine.pairing().last_session().unwrap().state,
            PairingState::Failed
        );
        assert_eq!(notifications.get_sent_notifications().len(), 1);
    }
}
