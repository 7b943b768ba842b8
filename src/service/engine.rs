//! The reconciliation engine.
//!
//! Owns the snapshot store, the poller, the pairing coordinator and the event
//! bridge. Construction wires them together; [`ReconciliationEngine::start`]
//! launches the background tasks and [`ReconciliationEngine::shutdown`] stops
//! them, joins them and unregisters the pairing agent.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioDevice, DeviceKind, DeviceSnapshot, MixerHandle, Poller, SnapshotStore};
use crate::bluetooth::{
    AgentPolicy, BluetoothAddress, BluetoothDevice, PairingCoordinator, PairingMode,
    PairingOutcome,
};
use crate::config::Config;
use crate::error::{BluetoothError, OperationError, PairingError};
use crate::events::{EngineEvent, EventBridge, RefreshNow, RefreshReason};
use crate::notifications::NotificationManager;
use crate::system::{BluerBluetooth, BluetoothInterface, MixerInterface, PactlMixer};

const EVENT_CAPACITY: usize = 64;

pub type ProductionEngine = ReconciliationEngine<PactlMixer, BluerBluetooth>;

pub struct ReconciliationEngine<M, B> {
    config: Config,
    bluetooth: Arc<B>,
    poller: Arc<Poller<M>>,
    pairing: Arc<PairingCoordinator<M, B>>,
    bluetooth_devices: ArcSwap<Vec<BluetoothDevice>>,
    events: broadcast::Sender<EngineEvent>,
    refresh_tx: broadcast::Sender<RefreshNow>,
    bridge: Mutex<Option<EventBridge>>,
    notifications: NotificationManager,
    scan_running: AtomicBool,
    unpair_running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProductionEngine {
    /// `pactl` for the mixer, the system Bluetooth daemon, desktop notifications
    pub async fn new_production(config: Config) -> Result<Self, BluetoothError> {
        let mixer = PactlMixer::new(config.mixer.program.clone());
        let bluetooth = BluerBluetooth::new().await?;
        let notifications = NotificationManager::new(&config.notifications);
        Ok(Self::new(mixer, bluetooth, config, notifications))
    }
}

impl<M, B> ReconciliationEngine<M, B>
where
    M: MixerInterface + 'static,
    B: BluetoothInterface + 'static,
{
    pub fn new(mixer: M, bluetooth: B, config: Config, notifications: NotificationManager) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let bluetooth = Arc::new(bluetooth);

        let poller = Arc::new(Poller::new(
            MixerHandle::new(mixer),
            Arc::new(SnapshotStore::new()),
            events.clone(),
            config.polling.interval(),
        ));
        let pairing = Arc::new(PairingCoordinator::new(
            Arc::clone(&bluetooth),
            Arc::clone(&poller),
            config.timings.clone(),
            config.mixer.a2dp_profile.clone(),
            cancel.child_token(),
        ));
        let bridge = EventBridge::new(config.timings.signal_settle(), EVENT_CAPACITY);

        Self {
            bluetooth,
            poller,
            pairing,
            bluetooth_devices: ArcSwap::from_pointee(Vec::new()),
            refresh_tx: bridge.sender(),
            bridge: Mutex::new(Some(bridge)),
            events,
            notifications,
            scan_running: AtomicBool::new(false),
            unpair_running: AtomicBool::new(false),
            cancel,
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Register the agent, take initial readings and launch the background
    /// tasks. Fails when the daemon's signal channel cannot be subscribed, in
    /// which case the engine is already shut down.
    pub async fn start(self: &Arc<Self>) -> Result<(), BluetoothError> {
        let Some(bridge) = self.bridge.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            warn!("Engine already started");
            return Ok(());
        };

        info!("Starting reconciliation engine");

        let policy = AgentPolicy::new(self.config.bluetooth.agent_pin_code.clone());
        if let Err(e) = self.bluetooth.register_agent(policy).await {
            warn!("Could not register pairing agent: {}", e);
        }

        if let Err(e) = self.poller.refresh().await {
            warn!("Initial device poll failed: {}", e);
        }
        if let Err(e) = self.refresh_bluetooth_list().await {
            warn!("Initial Bluetooth listing failed: {}", e);
        }

        let signals = match self
            .bluetooth
            .connection_signals(self.cancel.child_token())
            .await
        {
            Ok(signals) => signals,
            Err(e) => {
                error!("Could not subscribe to connection changes: {}", e);
                self.shutdown().await;
                return Err(e);
            }
        };

        let refresh_rx = bridge.subscribe();
        let mut tasks = vec![
            tokio::spawn(Arc::clone(&self.poller).run(self.cancel.child_token())),
            tokio::spawn(bridge.run(signals, self.events.subscribe(), self.cancel.child_token())),
            tokio::spawn(Arc::clone(self).refresh_worker(refresh_rx)),
        ];

        if self.config.bluetooth.auto_connect_paired {
            tasks.push(tokio::spawn(Arc::clone(self).reconnect_paired()));
        }

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(tasks);

        info!("Reconciliation engine started");
        Ok(())
    }

    /// Cancel background work, wait for it and unregister the agent
    pub async fn shutdown(&self) {
        info!("Shutting down reconciliation engine");
        self.cancel.cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        if let Err(e) = self.bluetooth.unregister_agent().await {
            warn!("Could not unregister pairing agent: {}", e);
        }
        info!("Reconciliation engine stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_snapshot(&self) -> Arc<DeviceSnapshot> {
        self.poller.store().current_snapshot()
    }

    pub fn bluetooth_devices(&self) -> Arc<Vec<BluetoothDevice>> {
        self.bluetooth_devices.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_refresh(&self) -> broadcast::Receiver<RefreshNow> {
        self.refresh_tx.subscribe()
    }

    pub fn pairing(&self) -> &PairingCoordinator<M, B> {
        &self.pairing
    }

    pub fn poller(&self) -> &Poller<M> {
        &self.poller
    }

    /// Pair (if needed), connect and route audio to `address`
    pub async fn pair(&self, address: BluetoothAddress) -> Result<PairingOutcome, PairingError> {
        self.run_session(address, PairingMode::Pair).await
    }

    /// Connect an already paired device and route audio to it
    pub async fn activate(&self, address: BluetoothAddress) -> Result<PairingOutcome, PairingError> {
        self.run_session(address, PairingMode::Activate).await
    }

    async fn run_session(
        &self,
        address: BluetoothAddress,
        mode: PairingMode,
    ) -> Result<PairingOutcome, PairingError> {
        let result = self.pairing.run(address, mode).await;
        match &result {
            Ok(outcome) => self.notifications.pairing_completed(outcome).await,
            Err(e) => self.notifications.pairing_failed(&e.to_string()).await,
        }
        if let Err(e) = self.refresh_bluetooth_list().await {
            warn!("Bluetooth listing after session failed: {}", e);
        }
        result
    }

    /// Remove a device from the adapter. One unpair at a time.
    pub async fn unpair(&self, address: BluetoothAddress) -> Result<(), OperationError> {
        let _running = Exclusive::acquire(&self.unpair_running, "unpair")?;
        info!("Unpairing {}", address);

        if let Err(e) = self.bluetooth.remove_device(address).await {
            error!("Unpair of {} failed: {}", address, e);
            self.notifications
                .unpair_failed(address, &e.to_string())
                .await;
            return Err(e.into());
        }

        self.notifications.unpair_completed(address).await;
        self.refresh_bluetooth_list().await?;
        Ok(())
    }

    /// Run discovery for the configured duration and return the device list.
    /// One scan at a time.
    pub async fn scan(&self) -> Result<Vec<BluetoothDevice>, OperationError> {
        let _running = Exclusive::acquire(&self.scan_running, "scan")?;
        let duration = self.config.bluetooth.scan_duration();
        info!("Scanning for Bluetooth devices for {:?}", duration);

        self.bluetooth.start_discovery().await?;

        let cancelled = tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        };

        if let Err(e) = self.bluetooth.stop_discovery().await {
            warn!("Could not stop discovery: {}", e);
        }
        if cancelled {
            return Err(OperationError::Cancelled);
        }

        let devices = self.refresh_bluetooth_list().await?;
        info!("Scan finished, {} devices known", devices.len());
        Ok(devices.to_vec())
    }

    /// Re-read the daemon's device list and publish it
    pub async fn refresh_bluetooth_list(&self) -> Result<Arc<Vec<BluetoothDevice>>, BluetoothError> {
        let devices = Arc::new(self.bluetooth.list_devices().await?);
        self.bluetooth_devices.store(Arc::clone(&devices));
        let _ = self.events.send(EngineEvent::BluetoothListChanged);
        Ok(devices)
    }

    /// Forced refresh of audio and Bluetooth state
    pub async fn refresh_all(&self) {
        if let Err(e) = self.poller.refresh().await {
            warn!("Device refresh failed: {}", e);
        }
        if let Err(e) = self.refresh_bluetooth_list().await {
            warn!("Bluetooth refresh failed: {}", e);
        }
    }

    /// Make `id` the default endpoint of its kind and publish its levels
    pub async fn select_default(
        &self,
        kind: DeviceKind,
        id: &str,
    ) -> Result<Option<AudioDevice>, OperationError> {
        let mixer = self.poller.mixer();
        mixer.set_default(kind, id).await?;
        info!("Default {} set to {}", kind.as_str(), id);

        let mut next = (*self.current_snapshot()).clone();
        next.set_default_id(kind, id);
        self.poller.publish(next);

        let device = self.publish_levels(kind, id).await?;
        if let Some(device) = &device {
            self.notifications.device_switched(device).await;
        }
        Ok(device)
    }

    /// Set volume in percent (clamped to 100). A muted endpoint is unmuted
    /// when the new volume is above zero.
    pub async fn set_volume(
        &self,
        kind: DeviceKind,
        id: &str,
        percent: u8,
    ) -> Result<(), OperationError> {
        self.poller
            .mixer()
            .set_volume_unmuting(kind, id, percent)
            .await?;
        self.publish_levels(kind, id).await?;
        Ok(())
    }

    pub async fn get_volume(&self, kind: DeviceKind, id: &str) -> Result<u8, OperationError> {
        Ok(self.poller.mixer().get_volume(kind, id).await?)
    }

    pub async fn set_mute(
        &self,
        kind: DeviceKind,
        id: &str,
        muted: bool,
    ) -> Result<(), OperationError> {
        self.poller.mixer().set_mute(kind, id, muted).await?;
        self.publish_levels(kind, id).await?;
        Ok(())
    }

    /// Read volume and mute of `id` into a new snapshot.
    async fn publish_levels(
        &self,
        kind: DeviceKind,
        id: &str,
    ) -> Result<Option<AudioDevice>, OperationError> {
        let (volume, muted) = self.poller.mixer().read_levels(kind, id).await?;

        let mut next = (*self.current_snapshot()).clone();
        let device = next
            .devices_mut(kind)
            .iter_mut()
            .find(|d| d.id == id)
            .map(|d| {
                d.volume = volume;
                d.muted = muted;
                d.clone()
            });
        self.poller.publish(next);
        Ok(device)
    }

    /// Acts on coalesced refresh instructions from the bridge.
    async fn refresh_worker(self: Arc<Self>, mut refresh_rx: broadcast::Receiver<RefreshNow>) {
        loop {
            let instruction = tokio::select! {
                _ = self.cancel.cancelled() => break,
                instruction = refresh_rx.recv() => instruction,
            };

            match instruction {
                Ok(RefreshNow {
                    reason: RefreshReason::ConnectionSettled,
                }) => {
                    info!("Bluetooth connection settled, refreshing");
                    self.refresh_all().await;
                }
                Ok(RefreshNow {
                    reason: RefreshReason::DevicesChanged,
                }) => debug!("Devices changed"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Refresh worker skipped {} instructions", skipped);
                    self.refresh_all().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Connect every paired but disconnected device, one session at a time.
    async fn reconnect_paired(self: Arc<Self>) {
        let devices = match self.bluetooth.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Reconnect sweep could not list devices: {}", e);
                return;
            }
        };

        let targets: Vec<_> = devices
            .into_iter()
            .filter(|d| d.paired && !d.connected)
            .collect();
        if targets.is_empty() {
            debug!("No paired devices to reconnect");
            return;
        }

        info!("Reconnecting {} paired devices", targets.len());
        for device in targets {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.pairing.run(device.address, PairingMode::Activate).await {
                Ok(outcome) => info!("Reconnected {}: {}", device, outcome.summary()),
                Err(PairingError::Busy { active }) => {
                    info!("Skipping {}: session for {} already running", device, active);
                }
                Err(e) => warn!("Could not reconnect {}: {}", device, e),
            }
        }

        self.pairing
            .schedule_refresh(self.config.timings.sweep_refresh());
        if let Err(e) = self.refresh_bluetooth_list().await {
            warn!("Bluetooth listing after sweep failed: {}", e);
        }
    }
}

/// Marks a one-at-a-time operation as running until dropped.
struct Exclusive<'a>(&'a AtomicBool);

impl<'a> Exclusive<'a> {
    fn acquire(flag: &'a AtomicBool, operation: &'static str) -> Result<Self, OperationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| OperationError::Busy { operation })?;
        Ok(Self(flag))
    }
}

impl Drop for Exclusive<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
