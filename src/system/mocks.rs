use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioCard, AudioDevice, DeviceKind};
use crate::bluetooth::{AgentPolicy, BluetoothAddress, BluetoothDevice, ConnectionSignal};
use crate::error::{BluetoothError, BluetoothResult, MixerError, MixerResult};
use crate::system::traits::{BluetoothInterface, FileSystemInterface, MixerInterface};

/// Mock mixer for testing - holds endpoint state in memory and records calls
#[derive(Clone, Default)]
pub struct MockMixer {
    pub sinks: Arc<Mutex<Vec<AudioDevice>>>,
    pub sources: Arc<Mutex<Vec<AudioDevice>>>,
    pub default_sink: Arc<Mutex<String>>,
    pub default_source: Arc<Mutex<String>>,
    pub cards: Arc<Mutex<Vec<AudioCard>>>,
    /// Endpoints that appear once the named card switches profile
    pub staged_endpoints: Arc<Mutex<HashMap<String, Vec<AudioDevice>>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub list_calls: Arc<AtomicUsize>,
    pub should_fail_list: Arc<Mutex<bool>>,
    pub should_fail_default_query: Arc<Mutex<bool>>,
    pub should_fail_profile: Arc<Mutex<bool>>,
}

impl MockMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_devices(&self, kind: DeviceKind, devices: Vec<AudioDevice>) {
        *self.list(kind).lock().unwrap() = devices;
    }

    pub fn add_device(&self, device: AudioDevice) {
        self.list(device.kind).lock().unwrap().push(device);
    }

    pub fn remove_device(&self, kind: DeviceKind, id: &str) {
        self.list(kind).lock().unwrap().retain(|d| d.id != id);
    }

    /// Raw value returned by `get_default`, placeholder names included
    pub fn set_mock_default(&self, kind: DeviceKind, id: &str) {
        *self.default_slot(kind).lock().unwrap() = id.to_string();
    }

    pub fn current_default(&self, kind: DeviceKind) -> String {
        self.default_slot(kind).lock().unwrap().clone()
    }

    pub fn add_card(&self, name: &str, active_profile: Option<&str>) {
        let mut cards = self.cards.lock().unwrap();
        let index = cards.len() as u32;
        cards.push(AudioCard {
            index,
            name: name.to_string(),
            active_profile: active_profile.map(str::to_string),
        });
    }

    /// Endpoints revealed when `card` has its profile switched
    pub fn stage_endpoints(&self, card: &str, devices: Vec<AudioDevice>) {
        self.staged_endpoints
            .lock()
            .unwrap()
            .insert(card.to_string(), devices);
    }

    pub fn device(&self, kind: DeviceKind, id: &str) -> Option<AudioDevice> {
        self.list(kind).lock().unwrap().iter().find(|d| d.id == id).cloned()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn set_list_failure(&self, should_fail: bool) {
        *self.should_fail_list.lock().unwrap() = should_fail;
    }

    pub fn set_default_query_failure(&self, should_fail: bool) {
        *self.should_fail_default_query.lock().unwrap() = should_fail;
    }

    pub fn set_profile_failure(&self, should_fail: bool) {
        *self.should_fail_profile.lock().unwrap() = should_fail;
    }

    fn list(&self, kind: DeviceKind) -> &Arc<Mutex<Vec<AudioDevice>>> {
        match kind {
            DeviceKind::Sink => &self.sinks,
            DeviceKind::Source => &self.sources,
        }
    }

    fn default_slot(&self, kind: DeviceKind) -> &Arc<Mutex<String>> {
        match kind {
            DeviceKind::Sink => &self.default_sink,
            DeviceKind::Source => &self.default_source,
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(command: &str) -> MixerError {
        MixerError::CommandFailed {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Mock mixer failure".to_string(),
        }
    }

    fn no_such_entity(command: &str, id: &str) -> MixerError {
        MixerError::CommandFailed {
            command: format!("{command} {id}"),
            status: "exit status: 1".to_string(),
            stderr: "Failure: No such entity".to_string(),
        }
    }

    fn with_device<T>(
        &self,
        kind: DeviceKind,
        id: &str,
        command: &str,
        f: impl FnOnce(&mut AudioDevice) -> T,
    ) -> MixerResult<T> {
        let mut devices = self.list(kind).lock().unwrap();
        devices
            .iter_mut()
            .find(|d| d.id == id)
            .map(f)
            .ok_or_else(|| Self::no_such_entity(command, id))
    }
}

impl MixerInterface for MockMixer {
    fn list_devices(&self, kind: DeviceKind) -> MixerResult<Vec<AudioDevice>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.should_fail_list.lock().unwrap() {
            return Err(Self::failure("list"));
        }
        Ok(self.list(kind).lock().unwrap().clone())
    }

    fn list_cards(&self) -> MixerResult<Vec<AudioCard>> {
        if *self.should_fail_list.lock().unwrap() {
            return Err(Self::failure("list cards"));
        }
        Ok(self.cards.lock().unwrap().clone())
    }

    fn get_default(&self, kind: DeviceKind) -> MixerResult<String> {
        if *self.should_fail_default_query.lock().unwrap() {
            return Err(Self::failure("get-default"));
        }
        Ok(self.current_default(kind))
    }

    fn set_default(&self, kind: DeviceKind, id: &str) -> MixerResult<()> {
        self.record(format!("set-default-{} {}", kind.as_str(), id));
        if self.device(kind, id).is_none() {
            return Err(Self::no_such_entity("set-default", id));
        }
        self.set_mock_default(kind, id);
        Ok(())
    }

    fn get_volume(&self, kind: DeviceKind, id: &str) -> MixerResult<u8> {
        self.with_device(kind, id, "get-volume", |d| d.volume)
    }

    fn set_volume(&self, kind: DeviceKind, id: &str, percent: u8) -> MixerResult<()> {
        self.record(format!("set-{}-volume {} {}%", kind.as_str(), id, percent));
        self.with_device(kind, id, "set-volume", |d| d.volume = percent.min(100))
    }

    fn get_mute(&self, kind: DeviceKind, id: &str) -> MixerResult<bool> {
        self.with_device(kind, id, "get-mute", |d| d.muted)
    }

    fn set_mute(&self, kind: DeviceKind, id: &str, muted: bool) -> MixerResult<()> {
        self.record(format!("set-{}-mute {} {}", kind.as_str(), id, muted as u8));
        self.with_device(kind, id, "set-mute", |d| d.muted = muted)
    }

    fn set_card_profile(&self, card: &str, profile: &str) -> MixerResult<()> {
        self.record(format!("set-card-profile {card} {profile}"));
        if *self.should_fail_profile.lock().unwrap() {
            return Err(Self::failure("set-card-profile"));
        }

        let mut cards = self.cards.lock().unwrap();
        let Some(entry) = cards.iter_mut().find(|c| c.name == card) else {
            return Err(Self::no_such_entity("set-card-profile", card));
        };
        entry.active_profile = Some(profile.to_string());
        drop(cards);

        let staged = self.staged_endpoints.lock().unwrap().remove(card);
        for device in staged.into_iter().flatten() {
            self.add_device(device);
        }
        Ok(())
    }
}

/// Mock Bluetooth daemon for testing - controllable devices, errors and signals
#[derive(Clone, Default)]
pub struct MockBluetooth {
    pub devices: Arc<Mutex<Vec<BluetoothDevice>>>,
    /// Devices that show up once discovery starts
    pub discoverable: Arc<Mutex<Vec<BluetoothDevice>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub list_error: Arc<Mutex<Option<BluetoothError>>>,
    pub pair_error: Arc<Mutex<Option<BluetoothError>>>,
    pub connect_error: Arc<Mutex<Option<BluetoothError>>>,
    pub trust_error: Arc<Mutex<Option<BluetoothError>>>,
    pub stop_discovery_error: Arc<Mutex<Option<BluetoothError>>>,
    pub signals_error: Arc<Mutex<Option<BluetoothError>>>,
    /// When set, `pair` waits for this before completing
    pub pair_gate: Arc<Mutex<Option<Arc<Notify>>>>,
    pub signal_sender: Arc<Mutex<Option<mpsc::UnboundedSender<ConnectionSignal>>>>,
    pub agent: Arc<Mutex<Option<AgentPolicy>>>,
    pub discovering: Arc<AtomicBool>,
}

impl MockBluetooth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: BluetoothDevice) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn add_discoverable(&self, device: BluetoothDevice) {
        self.discoverable.lock().unwrap().push(device);
    }

    pub fn device(&self, address: BluetoothAddress) -> Option<BluetoothDevice> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.address == address)
            .cloned()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_list_error(&self, error: Option<BluetoothError>) {
        *self.list_error.lock().unwrap() = error;
    }

    pub fn set_pair_error(&self, error: Option<BluetoothError>) {
        *self.pair_error.lock().unwrap() = error;
    }

    pub fn set_connect_error(&self, error: Option<BluetoothError>) {
        *self.connect_error.lock().unwrap() = error;
    }

    pub fn set_trust_error(&self, error: Option<BluetoothError>) {
        *self.trust_error.lock().unwrap() = error;
    }

    pub fn set_stop_discovery_error(&self, error: Option<BluetoothError>) {
        *self.stop_discovery_error.lock().unwrap() = error;
    }

    pub fn set_signals_error(&self, error: Option<BluetoothError>) {
        *self.signals_error.lock().unwrap() = error;
    }

    /// Make `pair` block until the returned handle is notified
    pub fn hold_pairing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.pair_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Push a raw "Connected" property change to the signal subscriber
    pub fn emit_connection(&self, address: BluetoothAddress, connected: bool) -> bool {
        match self.signal_sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(ConnectionSignal { address, connected }).is_ok(),
            None => false,
        }
    }

    pub fn registered_agent(&self) -> Option<AgentPolicy> {
        self.agent.lock().unwrap().clone()
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn update(
        &self,
        address: BluetoothAddress,
        f: impl FnOnce(&mut BluetoothDevice),
    ) -> BluetoothResult<()> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| d.address == address)
            .ok_or(BluetoothError::DeviceNotFound(address))?;
        f(device);
        Ok(())
    }
}

#[async_trait]
impl BluetoothInterface for MockBluetooth {
    async fn list_devices(&self) -> BluetoothResult<Vec<BluetoothDevice>> {
        self.record("list".to_string());
        if let Some(error) = self.list_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn set_trusted(&self, address: BluetoothAddress, trusted: bool) -> BluetoothResult<()> {
        self.record(format!("trust {address} {trusted}"));
        if let Some(error) = self.trust_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.update(address, |_| {})
    }

    async fn pair(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        self.record(format!("pair {address}"));

        let gate = self.pair_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.pair_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.update(address, |d| d.paired = true)
    }

    async fn connect(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        self.record(format!("connect {address}"));
        if let Some(error) = self.connect_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.update(address, |d| d.connected = true)
    }

    async fn remove_device(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        self.record(format!("remove {address}"));
        let mut devices = self.devices.lock().unwrap();
        let before = devices.len();
        devices.retain(|d| d.address != address);
        if devices.len() == before {
            return Err(BluetoothError::DeviceNotFound(address));
        }
        Ok(())
    }

    async fn start_discovery(&self) -> BluetoothResult<()> {
        self.record("start-discovery".to_string());
        self.discovering.store(true, Ordering::SeqCst);
        let found: Vec<_> = self.discoverable.lock().unwrap().drain(..).collect();
        self.devices.lock().unwrap().extend(found);
        Ok(())
    }

    async fn stop_discovery(&self) -> BluetoothResult<()> {
        self.record("stop-discovery".to_string());
        self.discovering.store(false, Ordering::SeqCst);
        match self.stop_discovery_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn connection_signals(
        &self,
        _cancel: CancellationToken,
    ) -> BluetoothResult<mpsc::UnboundedReceiver<ConnectionSignal>> {
        self.record("connection-signals".to_string());
        if let Some(error) = self.signals_error.lock().unwrap().clone() {
            return Err(error);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.signal_sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn register_agent(&self, policy: AgentPolicy) -> BluetoothResult<()> {
        self.record("register-agent".to_string());
        *self.agent.lock().unwrap() = Some(policy);
        Ok(())
    }

    async fn unregister_agent(&self) -> BluetoothResult<()> {
        self.record("unregister-agent".to_string());
        *self.agent.lock().unwrap() = None;
        Ok(())
    }
}

/// Mock file system for testing - provides controllable file operations
#[derive(Clone, Default)]
pub struct MockFileSystem {
    pub files: Arc<Mutex<HashMap<PathBuf, String>>>,
    pub read_calls: Arc<Mutex<Vec<PathBuf>>>,
    pub write_calls: Arc<Mutex<Vec<(PathBuf, String)>>>,
    pub directory_creation_calls: Arc<Mutex<Vec<PathBuf>>>,
    pub should_fail_read: Arc<Mutex<bool>>,
    pub should_fail_write: Arc<Mutex<bool>>,
    pub should_fail_create_dir: Arc<Mutex<bool>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the mock file system
    pub fn add_file<P: AsRef<Path>>(&self, path: P, content: String) {
        self.files
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), content);
    }

    pub fn file_content<P: AsRef<Path>>(&self, path: P) -> Option<String> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Get all write calls that were made
    pub fn get_write_calls(&self) -> Vec<(PathBuf, String)> {
        self.write_calls.lock().unwrap().clone()
    }

    /// Get all directory creation calls that were made
    pub fn get_directory_creation_calls(&self) -> Vec<PathBuf> {
        self.directory_creation_calls.lock().unwrap().clone()
    }

    pub fn set_read_failure(&self, should_fail: bool) {
        *self.should_fail_read.lock().unwrap() = should_fail;
    }

    pub fn set_write_failure(&self, should_fail: bool) {
        *self.should_fail_write.lock().unwrap() = should_fail;
    }

    pub fn set_create_dir_failure(&self, should_fail: bool) {
        *self.should_fail_create_dir.lock().unwrap() = should_fail;
    }
}

impl FileSystemInterface for MockFileSystem {
    fn read_config_file(&self, path: &Path) -> Result<String> {
        self.read_calls.lock().unwrap().push(path.to_path_buf());

        if *self.should_fail_read.lock().unwrap() {
            return Err(anyhow::anyhow!("Mock read failure"));
        }

        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("File not found: {}", path.display()))
    }

    fn write_config_file(&self, path: &Path, content: &str) -> Result<()> {
        self.write_calls
            .lock()
            .unwrap()
            .push((path.to_path_buf(), content.to_string()));

        if *self.should_fail_write.lock().unwrap() {
            return Err(anyhow::anyhow!("Mock write failure"));
        }

        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn config_file_exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn create_config_dir(&self, path: &Path) -> Result<()> {
        self.directory_creation_calls
            .lock()
            .unwrap()
            .push(path.to_path_buf());

        if *self.should_fail_create_dir.lock().unwrap() {
            return Err(anyhow::anyhow!("Mock create directory failure"));
        }

        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(drop)
            .ok_or_else(|| anyhow::anyhow!("File not found: {}", path.display()))
    }
}
