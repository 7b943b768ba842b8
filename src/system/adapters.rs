use anyhow::Result;
use async_trait::async_trait;
use bluer::agent::AgentHandle;
use bluer::{Adapter, AdapterEvent, Address, DeviceEvent, DeviceProperty, ErrorKind, Session};
use futures::stream::{SelectAll, Stream, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::pin::Pin;
use std::process::Command;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::parser;
use crate::audio::{AudioCard, AudioDevice, DeviceKind};
use crate::bluetooth::{AgentPolicy, BluetoothAddress, BluetoothDevice, ConnectionSignal};
use crate::error::{BluetoothError, BluetoothResult, MixerError, MixerResult};
use crate::system::traits::{BluetoothInterface, FileSystemInterface, MixerInterface};

/// Production implementation of MixerInterface using `pactl`
pub struct PactlMixer {
    program: String,
}

impl PactlMixer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> MixerResult<String> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Running: {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .env("LC_ALL", "C")
            .output()
            .map_err(|source| MixerError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(MixerError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MixerInterface for PactlMixer {
    fn list_devices(&self, kind: DeviceKind) -> MixerResult<Vec<AudioDevice>> {
        let list = format!("{}s", kind.as_str());
        let output = self.run(&["list", &list])?;
        Ok(parser::parse_device_list(&output, kind))
    }

    fn list_cards(&self) -> MixerResult<Vec<AudioCard>> {
        let output = self.run(&["list", "cards"])?;
        Ok(parser::parse_card_list(&output))
    }

    fn get_default(&self, kind: DeviceKind) -> MixerResult<String> {
        let output = self.run(&[&format!("get-default-{}", kind.as_str())])?;
        Ok(output.trim().to_string())
    }

    fn set_default(&self, kind: DeviceKind, id: &str) -> MixerResult<()> {
        self.run(&[&format!("set-default-{}", kind.as_str()), id])
            .map(drop)
    }

    fn get_volume(&self, kind: DeviceKind, id: &str) -> MixerResult<u8> {
        let command = format!("get-{}-volume", kind.as_str());
        let output = self.run(&[&command, id])?;
        parser::parse_volume(&output).ok_or_else(|| MixerError::Unparsable {
            command: format!("{} {} {}", self.program, command, id),
            output,
        })
    }

    fn set_volume(&self, kind: DeviceKind, id: &str, percent: u8) -> MixerResult<()> {
        let level = format!("{}%", percent.min(100));
        self.run(&[&format!("set-{}-volume", kind.as_str()), id, &level])
            .map(drop)
    }

    fn get_mute(&self, kind: DeviceKind, id: &str) -> MixerResult<bool> {
        let output = self.run(&[&format!("get-{}-mute", kind.as_str()), id])?;
        Ok(parser::parse_mute(&output))
    }

    fn set_mute(&self, kind: DeviceKind, id: &str, muted: bool) -> MixerResult<()> {
        let flag = if muted { "1" } else { "0" };
        self.run(&[&format!("set-{}-mute", kind.as_str()), id, flag])
            .map(drop)
    }

    fn set_card_profile(&self, card: &str, profile: &str) -> MixerResult<()> {
        self.run(&["set-card-profile", card, profile]).map(drop)
    }
}

impl Default for PactlMixer {
    fn default() -> Self {
        Self::new("pactl")
    }
}

type DeviceEventStream = Pin<Box<dyn Stream<Item = (Address, DeviceEvent)> + Send>>;

/// Production implementation of BluetoothInterface using BlueZ through `bluer`
pub struct BluerBluetooth {
    session: Session,
    adapter: Adapter,
    agent: Mutex<Option<AgentHandle>>,
    discovery: Mutex<Option<CancellationToken>>,
}

impl BluerBluetooth {
    /// Connect to the daemon and use its default adapter
    pub async fn new() -> BluetoothResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BluetoothError::DaemonUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| BluetoothError::DaemonUnavailable(e.to_string()))?;

        if let Err(e) = adapter.set_powered(true).await {
            warn!("Could not power on adapter {}: {}", adapter.name(), e);
        }
        info!("Using Bluetooth adapter {}", adapter.name());

        Ok(Self {
            session,
            adapter,
            agent: Mutex::new(None),
            discovery: Mutex::new(None),
        })
    }

    /// Device proxy for an address known to the adapter
    async fn device(&self, address: BluetoothAddress) -> BluetoothResult<bluer::Device> {
        let known = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| daemon_error("ListDevices", None, e))?;
        let addr = Address::new(address.octets());
        if !known.contains(&addr) {
            return Err(BluetoothError::DeviceNotFound(address));
        }
        self.adapter
            .device(addr)
            .map_err(|e| daemon_error("GetDevice", Some(address), e))
    }
}

#[async_trait]
impl BluetoothInterface for BluerBluetooth {
    async fn list_devices(&self) -> BluetoothResult<Vec<BluetoothDevice>> {
        let addresses = self
            .adapter
            .device_addresses()
            .await
            .map_err(|e| BluetoothError::DaemonUnavailable(e.to_string()))?;

        let mut devices = Vec::with_capacity(addresses.len());
        for addr in addresses {
            let address = BluetoothAddress::new(addr.0);
            let device = match self.adapter.device(addr) {
                Ok(device) => device,
                Err(e) => {
                    debug!("Skipping {}: {}", address, e);
                    continue;
                }
            };

            let name = match device.name().await {
                Ok(Some(name)) => name,
                _ => device.alias().await.unwrap_or_else(|_| address.to_string()),
            };
            let paired = device.is_paired().await.unwrap_or(false);
            let connected = device.is_connected().await.unwrap_or(false);

            devices.push(
                BluetoothDevice::new(address, name)
                    .paired(paired)
                    .connected(connected),
            );
        }

        debug!("Bluetooth daemon reports {} devices", devices.len());
        Ok(devices)
    }

    async fn set_trusted(&self, address: BluetoothAddress, trusted: bool) -> BluetoothResult<()> {
        self.device(address)
            .await?
            .set_trusted(trusted)
            .await
            .map_err(|e| daemon_error("SetTrusted", Some(address), e))
    }

    async fn pair(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        self.device(address)
            .await?
            .pair()
            .await
            .map_err(|e| daemon_error("Pair", Some(address), e))
    }

    async fn connect(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        match self.device(address).await?.connect().await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind, ErrorKind::AlreadyConnected) => {
                debug!("{} was already connected", address);
                Ok(())
            }
            Err(e) => Err(daemon_error("Connect", Some(address), e)),
        }
    }

    async fn remove_device(&self, address: BluetoothAddress) -> BluetoothResult<()> {
        self.device(address).await?;
        self.adapter
            .remove_device(Address::new(address.octets()))
            .await
            .map_err(|e| daemon_error("RemoveDevice", Some(address), e))
    }

    async fn start_discovery(&self) -> BluetoothResult<()> {
        let mut discovered = Box::pin(
            self.adapter
                .discover_devices()
                .await
                .map_err(|e| daemon_error("StartDiscovery", None, e))?,
        );

        let token = CancellationToken::new();
        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        // Discovery stays active for as long as the stream is held.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = discovered.next() => match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => debug!("Discovered {}", addr),
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            debug!("Discovery stream released");
        });

        Ok(())
    }

    async fn stop_discovery(&self) -> BluetoothResult<()> {
        let token = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(BluetoothError::daemon("StopDiscovery", "discovery is not running")),
        }
    }

    async fn connection_signals(
        &self,
        cancel: CancellationToken,
    ) -> BluetoothResult<mpsc::UnboundedReceiver<ConnectionSignal>> {
        let adapter = self.adapter.clone();
        let mut adapter_events = Box::pin(
            adapter
                .events()
                .await
                .map_err(|e| BluetoothError::DaemonUnavailable(e.to_string()))?,
        );
        let initial = adapter
            .device_addresses()
            .await
            .map_err(|e| BluetoothError::DaemonUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut watched = HashSet::new();
            let mut device_events: SelectAll<DeviceEventStream> = SelectAll::new();

            for addr in initial {
                watch_device(&adapter, addr, &mut watched, &mut device_events).await;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(event) = adapter_events.next() => match event {
                        AdapterEvent::DeviceAdded(addr) => {
                            watch_device(&adapter, addr, &mut watched, &mut device_events).await;
                        }
                        AdapterEvent::DeviceRemoved(addr) => {
                            watched.remove(&addr);
                        }
                        _ => {}
                    },
                    Some((addr, event)) = device_events.next() => {
                        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event {
                            let signal = ConnectionSignal {
                                address: BluetoothAddress::new(addr.0),
                                connected,
                            };
                            if tx.send(signal).is_err() {
                                break;
                            }
                        }
                    }
                    else => break,
                }
            }
            debug!("Connection signal listener stopped");
        });

        Ok(rx)
    }

    async fn register_agent(&self, policy: AgentPolicy) -> BluetoothResult<()> {
        match self.session.register_agent(policy.to_agent()).await {
            Ok(handle) => {
                *self.agent.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                info!("Pairing agent registered as default agent");
                Ok(())
            }
            Err(e) if matches!(e.kind, ErrorKind::AlreadyExists) => {
                warn!("A pairing agent is already registered: {}", e);
                Ok(())
            }
            Err(e) => Err(daemon_error("RegisterAgent", None, e)),
        }
    }

    async fn unregister_agent(&self) -> BluetoothResult<()> {
        // Dropping the handle unregisters the agent.
        let handle = self.agent.lock().unwrap_or_else(|e| e.into_inner()).take();
        if handle.is_some() {
            info!("Pairing agent unregistered");
        }
        Ok(())
    }
}

async fn watch_device(
    adapter: &Adapter,
    addr: Address,
    watched: &mut HashSet<Address>,
    streams: &mut SelectAll<DeviceEventStream>,
) {
    if !watched.insert(addr) {
        return;
    }
    let events = match adapter.device(addr) {
        Ok(device) => device.events().await,
        Err(e) => Err(e),
    };
    match events {
        Ok(events) => streams.push(Box::pin(events.map(move |event| (addr, event)))),
        Err(e) => {
            watched.remove(&addr);
            warn!("Cannot watch {}: {}", addr, e);
        }
    }
}

fn daemon_error(operation: &str, address: Option<BluetoothAddress>, err: bluer::Error) -> BluetoothError {
    match (&err.kind, address) {
        (ErrorKind::AlreadyExists, Some(address)) => BluetoothError::AlreadyPaired(address),
        (ErrorKind::DoesNotExist, Some(address)) => BluetoothError::DeviceNotFound(address),
        _ => BluetoothError::daemon(operation, err.to_string()),
    }
}

/// Production implementation of FileSystemInterface using std::fs
pub struct StandardFileSystem;

impl FileSystemInterface for StandardFileSystem {
    fn read_config_file(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))
    }

    fn write_config_file(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::write(path, content)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))
    }

    fn config_file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_config_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create directory {}: {}", path.display(), e))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to remove {}: {}", path.display(), e))
    }
}

impl Default for StandardFileSystem {
    fn default() -> Self {
        Self
    }
}
