use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::debug;

use super::device::{DeviceKind, DeviceSnapshot};

/// Current-value holder for the latest [`DeviceSnapshot`].
///
/// Readers get an `Arc` to an immutable snapshot and never block writers.
/// Writers replace the whole snapshot; there are no partial updates.
pub struct SnapshotStore {
    current: ArcSwap<DeviceSnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::with_snapshot(DeviceSnapshot::default())
    }

    pub fn with_snapshot(snapshot: DeviceSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn current_snapshot(&self) -> Arc<DeviceSnapshot> {
        self.current.load_full()
    }

    /// Atomically swap in `next`, returning the snapshot it replaced.
    pub fn replace(&self, next: DeviceSnapshot) -> Arc<DeviceSnapshot> {
        for kind in [DeviceKind::Sink, DeviceKind::Source] {
            if next.dangling_default(kind) {
                debug!(
                    "Default {} {:?} is not listed yet",
                    kind.as_str(),
                    next.default_id(kind)
                );
            }
        }
        self.current.swap(Arc::new(next))
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioDevice;

    #[test]
    fn test_replace_returns_previous() {
        let store = SnapshotStore::new();
        let held = store.current_snapshot();

        let next = DeviceSnapshot {
            sinks: vec![AudioDevice::new("speakers", "Speakers", DeviceKind::Sink)],
            default_sink: "speakers".to_string(),
            ..Default::default()
        };
        let previous = store.replace(next.clone());

        assert_eq!(*previous, DeviceSnapshot::default());
        assert_eq!(*store.current_snapshot(), next);
        // A snapshot handed out earlier is unaffected by the swap.
        assert!(held.sinks.is_empty());
    }
}
