//! Change notifications and the bridge that coalesces them.
//!
//! The poller publishes [`EngineEvent::DevicesChanged`]; the Bluetooth daemon
//! reports raw [`ConnectionSignal`]s. [`EventBridge`] merges both into one
//! stream of [`RefreshNow`] instructions. A "Connected" signal is held back
//! for a settle window so the mixer has time to create the new endpoints, and
//! any further signals inside that window fold into the same refresh.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bluetooth::ConnectionSignal;

/// Notifications for the presentation layer. No payload: consumers re-read
/// the store or the Bluetooth device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    DevicesChanged,
    BluetoothListChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// The poller saw the endpoint lists change.
    DevicesChanged,
    /// A device connected and its settle window has elapsed.
    ConnectionSettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshNow {
    pub reason: RefreshReason,
}

pub struct EventBridge {
    settle: Duration,
    refresh_tx: broadcast::Sender<RefreshNow>,
}

impl EventBridge {
    pub fn new(settle: Duration, capacity: usize) -> Self {
        let (refresh_tx, _) = broadcast::channel(capacity.max(1));
        Self { settle, refresh_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshNow> {
        self.refresh_tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<RefreshNow> {
        self.refresh_tx.clone()
    }

    /// Drive the bridge until `cancel` fires or both inputs close.
    pub async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<ConnectionSignal>,
        mut events: broadcast::Receiver<EngineEvent>,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;
        let mut signals_open = true;
        let mut events_open = true;

        info!("Event bridge started ({:?} settle window)", self.settle);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                signal = signals.recv(), if signals_open => match signal {
                    Some(ConnectionSignal { address, connected: true }) => {
                        if deadline.is_none() {
                            debug!("{} connected, refreshing in {:?}", address, self.settle);
                            deadline = Some(Instant::now() + self.settle);
                        } else {
                            debug!("{} connected inside the settle window", address);
                        }
                    }
                    Some(ConnectionSignal { address, connected: false }) => {
                        debug!("{} disconnected", address);
                    }
                    None => {
                        debug!("Connection signal stream closed");
                        signals_open = false;
                    }
                },

                event = events.recv(), if events_open => match event {
                    Ok(EngineEvent::DevicesChanged) => {
                        if deadline.is_some() {
                            debug!("Device change folded into pending refresh");
                        } else {
                            self.emit(RefreshReason::DevicesChanged);
                        }
                    }
                    Ok(EngineEvent::BluetoothListChanged) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event bridge lagged by {} events", skipped);
                        if deadline.is_none() {
                            self.emit(RefreshReason::DevicesChanged);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },

                _ = wait_for(deadline) => {
                    deadline = None;
                    self.emit(RefreshReason::ConnectionSettled);
                }
            }

            if !signals_open && !events_open && deadline.is_none() {
                break;
            }
        }

        info!("Event bridge stopped");
    }

    fn emit(&self, reason: RefreshReason) {
        debug!("Refresh requested: {:?}", reason);
        let _ = self.refresh_tx.send(RefreshNow { reason });
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
