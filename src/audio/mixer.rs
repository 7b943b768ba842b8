use std::sync::Arc;
use tracing::debug;

use super::device::{AudioCard, AudioDevice, DeviceKind};
use crate::error::{MixerError, MixerResult};
use crate::system::MixerInterface;

/// Async front for a blocking [`MixerInterface`].
///
/// Every call runs on tokio's blocking pool so callers on the runtime never
/// wait on the external process.
pub struct MixerHandle<M> {
    inner: Arc<M>,
}

impl<M> Clone for MixerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: MixerInterface + 'static> MixerHandle<M> {
    pub fn new(mixer: M) -> Self {
        Self::from_arc(Arc::new(mixer))
    }

    pub fn from_arc(inner: Arc<M>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<M> {
        &self.inner
    }

    /// Run `f` against the mixer on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> MixerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&M) -> MixerResult<T> + Send + 'static,
    {
        let mixer = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&mixer))
            .await
            .map_err(|e| MixerError::Worker(e.to_string()))?
    }

    /// Both endpoint lists from one worker call.
    pub async fn list_endpoints(&self) -> MixerResult<(Vec<AudioDevice>, Vec<AudioDevice>)> {
        self.run(|m| {
            let sinks = m.list_devices(DeviceKind::Sink)?;
            let sources = m.list_devices(DeviceKind::Source)?;
            Ok((sinks, sources))
        })
        .await
    }

    pub async fn list_cards(&self) -> MixerResult<Vec<AudioCard>> {
        self.run(|m| m.list_cards()).await
    }

    pub async fn get_default(&self, kind: DeviceKind) -> MixerResult<String> {
        self.run(move |m| m.get_default(kind)).await
    }

    pub async fn set_default(&self, kind: DeviceKind, id: &str) -> MixerResult<()> {
        let id = id.to_string();
        self.run(move |m| m.set_default(kind, &id)).await
    }

    pub async fn get_volume(&self, kind: DeviceKind, id: &str) -> MixerResult<u8> {
        let id = id.to_string();
        self.run(move |m| m.get_volume(kind, &id)).await
    }

    pub async fn set_volume(&self, kind: DeviceKind, id: &str, percent: u8) -> MixerResult<()> {
        let id = id.to_string();
        self.run(move |m| m.set_volume(kind, &id, percent.min(100))).await
    }

    /// Set the volume and unmute the endpoint if it is muted and the new
    /// volume is above zero.
    pub async fn set_volume_unmuting(
        &self,
        kind: DeviceKind,
        id: &str,
        percent: u8,
    ) -> MixerResult<()> {
        let id = id.to_string();
        self.run(move |m| {
            let percent = percent.min(100);
            m.set_volume(kind, &id, percent)?;
            if percent > 0 && m.get_mute(kind, &id)? {
                debug!("Unmuting {} after volume change", id);
                m.set_mute(kind, &id, false)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_mute(&self, kind: DeviceKind, id: &str) -> MixerResult<bool> {
        let id = id.to_string();
        self.run(move |m| m.get_mute(kind, &id)).await
    }

    pub async fn set_mute(&self, kind: DeviceKind, id: &str, muted: bool) -> MixerResult<()> {
        let id = id.to_string();
        self.run(move |m| m.set_mute(kind, &id, muted)).await
    }

    pub async fn set_card_profile(&self, card: &str, profile: &str) -> MixerResult<()> {
        let (card, profile) = (card.to_string(), profile.to_string());
        debug!("Switching card {} to profile {}", card, profile);
        self.run(move |m| m.set_card_profile(&card, &profile)).await
    }

    /// Volume and mute of one endpoint, read together.
    pub async fn read_levels(&self, kind: DeviceKind, id: &str) -> MixerResult<(u8, bool)> {
        let id = id.to_string();
        self.run(move |m| Ok((m.get_volume(kind, &id)?, m.get_mute(kind, &id)?)))
            .await
    }
}
