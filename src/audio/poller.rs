use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device::{AudioDevice, DeviceKind, DeviceSnapshot};
use super::mixer::MixerHandle;
use super::parser::resolve_default;
use super::store::SnapshotStore;
use crate::error::MixerResult;
use crate::events::EngineEvent;
use crate::system::MixerInterface;

/// Samples the mixer and publishes changed snapshots into the store.
pub struct Poller<M> {
    mixer: MixerHandle<M>,
    store: Arc<SnapshotStore>,
    events: broadcast::Sender<EngineEvent>,
    interval: Duration,
}

impl<M: MixerInterface + 'static> Poller<M> {
    pub fn new(
        mixer: MixerHandle<M>,
        store: Arc<SnapshotStore>,
        events: broadcast::Sender<EngineEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            mixer,
            store,
            events,
            interval,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn mixer(&self) -> &MixerHandle<M> {
        &self.mixer
    }

    /// One scheduled tick. Publishes only when a sink or source list changed.
    ///
    /// Returns `Ok(true)` when a new snapshot was published. A failed query
    /// leaves the store untouched.
    pub async fn poll_once(&self) -> MixerResult<bool> {
        let (sinks, sources) = self.mixer.list_endpoints().await?;
        let previous = self.store.current_snapshot();

        if previous.same_endpoints(&sinks, &sources) {
            return Ok(false);
        }

        debug!(
            "Endpoint lists changed: {} sinks, {} sources",
            sinks.len(),
            sources.len()
        );
        let next = self.with_defaults(sinks, sources, &previous).await;
        Ok(self.publish(next))
    }

    /// Forced re-poll: lists and defaults are queried and published if
    /// anything differs from the current snapshot.
    pub async fn refresh(&self) -> MixerResult<bool> {
        let (sinks, sources) = self.mixer.list_endpoints().await?;
        let previous = self.store.current_snapshot();
        let next = self.with_defaults(sinks, sources, &previous).await;
        Ok(self.publish(next))
    }

    /// Replace the stored snapshot with `next` and notify subscribers if it differs.
    pub fn publish(&self, next: DeviceSnapshot) -> bool {
        if *self.store.current_snapshot() == next {
            return false;
        }
        self.store.replace(next);
        // No subscribers is fine; the store still holds the value.
        let _ = self.events.send(EngineEvent::DevicesChanged);
        true
    }

    /// Poll every interval until `cancel` fires. Failures are logged and the
    /// loop carries on with the next tick.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Device poller started ({:?} interval)", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device poller stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.poll_once().await {
                        Ok(true) => info!("Audio devices changed"),
                        Ok(false) => {}
                        Err(e) => warn!("Device poll failed: {}", e),
                    }
                }
            }
        }
    }

    async fn with_defaults(
        &self,
        sinks: Vec<AudioDevice>,
        sources: Vec<AudioDevice>,
        previous: &DeviceSnapshot,
    ) -> DeviceSnapshot {
        let mut next = DeviceSnapshot {
            sinks,
            sources,
            default_sink: String::new(),
            default_source: String::new(),
        };

        for kind in [DeviceKind::Sink, DeviceKind::Source] {
            let id = match self.mixer.get_default(kind).await {
                Ok(raw) => resolve_default(&raw, next.devices(kind)),
                Err(e) => {
                    warn!("Could not read default {}: {}", kind.as_str(), e);
                    previous.default_id(kind).to_string()
                }
            };
            next.set_default_id(kind, id);
        }

        next
    }
}
