//! Pairing coordinator.
//!
//! Drives one Bluetooth device from "known to the daemon" to "default audio
//! endpoints":
//!
//! ```text
//! Idle -> Connecting -> Pairing -> SettingProfile -> MatchingEndpoints -> Done
//!                 \_________\______________\_________________\__________-> Failed
//! ```
//!
//! `Pairing` is skipped when the device is already connected. Only one
//! session runs at a time; a request made while another session is active is
//! rejected with [`PairingError::Busy`] and leaves that session untouched.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{BluetoothAddress, BluetoothDevice};
use crate::audio::{DeviceKind, MixerHandle, Poller};
use crate::config::TimingConfig;
use crate::error::{BluetoothError, PairingError};
use crate::system::{BluetoothInterface, MixerInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingState {
    Idle,
    Connecting,
    Pairing,
    SettingProfile,
    MatchingEndpoints,
    Done,
    Failed,
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PairingState::Idle => "Idle",
            PairingState::Connecting => "Connecting",
            PairingState::Pairing => "Pairing",
            PairingState::SettingProfile => "SettingProfile",
            PairingState::MatchingEndpoints => "MatchingEndpoints",
            PairingState::Done => "Done",
            PairingState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl PairingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Done | PairingState::Failed)
    }
}

/// What the session was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    /// Pair (if needed), connect and route audio to the device.
    Pair,
    /// Connect an already paired device and route audio to it.
    Activate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    pub target: BluetoothAddress,
    pub mode: PairingMode,
    pub state: PairingState,
    /// Every state entered, in order, starting with `Idle`.
    pub history: Vec<PairingState>,
    pub match_attempts: u32,
    pub last_error: Option<String>,
}

impl PairingSession {
    fn new(target: BluetoothAddress, mode: PairingMode) -> Self {
        Self {
            target,
            mode,
            state: PairingState::Idle,
            history: vec![PairingState::Idle],
            match_attempts: 0,
            last_error: None,
        }
    }

    fn enter(&mut self, state: PairingState) {
        self.state = state;
        self.history.push(state);
    }
}

/// Result of a successful session. Either endpoint may be missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingOutcome {
    pub address: BluetoothAddress,
    pub name: String,
    pub sink: Option<String>,
    pub source: Option<String>,
    pub already_paired: bool,
}

impl PairingOutcome {
    pub fn is_partial(&self) -> bool {
        self.sink.is_none() || self.source.is_none()
    }

    pub fn summary(&self) -> String {
        match (&self.sink, &self.source) {
            (Some(_), Some(_)) => format!("{} is now the default output and input", self.name),
            (Some(_), None) => format!("{} is now the default output", self.name),
            (None, Some(_)) => format!("{} is now the default input", self.name),
            (None, None) => format!("{} connected, but no audio endpoints appeared", self.name),
        }
    }
}

#[derive(Default)]
struct Slots {
    active: Option<PairingSession>,
    last: Option<PairingSession>,
}

pub struct PairingCoordinator<M, B> {
    bluetooth: Arc<B>,
    poller: Arc<Poller<M>>,
    timings: TimingConfig,
    profile: String,
    slots: Mutex<Slots>,
    cancel: CancellationToken,
}

impl<M, B> PairingCoordinator<M, B>
where
    M: MixerInterface + 'static,
    B: BluetoothInterface + 'static,
{
    pub fn new(
        bluetooth: Arc<B>,
        poller: Arc<Poller<M>>,
        timings: TimingConfig,
        profile: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bluetooth,
            poller,
            timings,
            profile: profile.into(),
            slots: Mutex::new(Slots::default()),
            cancel,
        }
    }

    pub fn active_session(&self) -> Option<PairingSession> {
        self.lock().active.clone()
    }

    pub fn last_session(&self) -> Option<PairingSession> {
        self.lock().last.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Run one session to `Done` or `Failed`.
    pub async fn run(
        &self,
        address: BluetoothAddress,
        mode: PairingMode,
    ) -> Result<PairingOutcome, PairingError> {
        let active = self.begin(address, mode)?;
        info!("Pairing session started for {} ({:?})", address, mode);

        let result = self.drive(address, mode).await;
        active.finish(result.as_ref().err().map(|e| e.to_string()));

        match &result {
            Ok(outcome) => info!("Pairing session for {} done: {}", address, outcome.summary()),
            Err(e) => error!("Pairing session for {} failed: {}", address, e),
        }
        result
    }

    fn begin(
        &self,
        address: BluetoothAddress,
        mode: PairingMode,
    ) -> Result<ActiveSlot<'_>, PairingError> {
        let mut slots = self.lock();
        if let Some(active) = &slots.active {
            debug!(
                "Rejecting session for {}: {} is {}",
                address, active.target, active.state
            );
            return Err(PairingError::Busy {
                active: active.target,
            });
        }
        slots.active = Some(PairingSession::new(address, mode));
        Ok(ActiveSlot(&self.slots))
    }

    async fn drive(
        &self,
        address: BluetoothAddress,
        mode: PairingMode,
    ) -> Result<PairingOutcome, PairingError> {
        self.enter(PairingState::Connecting);
        let device = self.find_device(address).await?;
        let mut already_paired = device.paired;

        if !device.connected {
            self.enter(PairingState::Pairing);
            already_paired = self.pair_and_connect(&device, mode).await?;
        } else {
            debug!("{} is already connected", address);
        }

        self.enter(PairingState::SettingProfile);
        self.switch_profile(address).await?;
        self.settle(self.timings.profile_settle(), address, PairingState::SettingProfile)
            .await?;

        self.enter(PairingState::MatchingEndpoints);
        let (sink, source) = self.match_endpoints(address).await?;
        self.apply_defaults(sink.as_deref(), source.as_deref()).await;

        Ok(PairingOutcome {
            address,
            name: device.name,
            sink,
            source,
            already_paired,
        })
    }

    async fn find_device(&self, address: BluetoothAddress) -> Result<BluetoothDevice, PairingError> {
        let devices = self
            .bluetooth
            .list_devices()
            .await
            .map_err(|e| PairingError::from_daemon(address, PairingState::Connecting, e))?;

        devices
            .into_iter()
            .find(|d| d.address == address)
            .ok_or(PairingError::DeviceNotFound { address })
    }

    /// Trust, pair when needed, connect. Returns whether the device was
    /// already paired.
    async fn pair_and_connect(
        &self,
        device: &BluetoothDevice,
        mode: PairingMode,
    ) -> Result<bool, PairingError> {
        let address = device.address;
        let step = PairingState::Pairing;
        let mut already_paired = device.paired;

        if let Err(e) = self.bluetooth.set_trusted(address, true).await {
            warn!("Could not mark {} as trusted: {}", address, e);
        }

        if mode == PairingMode::Pair || !device.paired {
            match self.bluetooth.pair(address).await {
                Ok(()) => {
                    info!("Paired with {}", address);
                    self.settle(self.timings.pair_settle(), address, step).await?;
                }
                Err(BluetoothError::AlreadyPaired(_)) => {
                    info!("{} is already paired, connecting", address);
                    already_paired = true;
                }
                Err(e) => return Err(PairingError::from_daemon(address, step, e)),
            }
        }

        self.bluetooth
            .connect(address)
            .await
            .map_err(|e| PairingError::from_daemon(address, step, e))?;
        info!("Connected to {}", address);

        self.settle(self.timings.connect_settle(), address, step).await?;
        Ok(already_paired)
    }

    async fn switch_profile(&self, address: BluetoothAddress) -> Result<(), PairingError> {
        let cards = match self.poller.mixer().list_cards().await {
            Ok(cards) => cards,
            Err(e) => {
                warn!("Could not list audio cards: {}", e);
                Vec::new()
            }
        };

        let card = cards
            .into_iter()
            .find(|c| c.matches_address(&address))
            .ok_or(PairingError::CardNotFound { address })?;

        if card.active_profile.as_deref() == Some(self.profile.as_str()) {
            debug!("Card {} already uses {}", card.name, self.profile);
            return Ok(());
        }

        if let Err(e) = self
            .poller
            .mixer()
            .set_card_profile(&card.name, &self.profile)
            .await
        {
            warn!("Could not switch {} to {}: {}", card.name, self.profile, e);
        }
        Ok(())
    }

    async fn match_endpoints(
        &self,
        address: BluetoothAddress,
    ) -> Result<(Option<String>, Option<String>), PairingError> {
        let attempts = self.timings.endpoint_match_attempts.max(1);

        for attempt in 1..=attempts {
            self.update(|s| s.match_attempts = attempt);

            if let Err(e) = self.poller.refresh().await {
                warn!("Re-poll before endpoint matching failed: {}", e);
            }

            let snapshot = self.poller.store().current_snapshot();
            let sink = snapshot
                .match_endpoint(DeviceKind::Sink, &address)
                .map(|d| d.id.clone());
            let source = snapshot
                .match_endpoint(DeviceKind::Source, &address)
                .map(|d| d.id.clone());

            if sink.is_some() || source.is_some() {
                debug!(
                    "Matched endpoints for {} on attempt {}: sink={:?} source={:?}",
                    address, attempt, sink, source
                );
                return Ok((sink, source));
            }

            if attempt < attempts {
                debug!("No endpoints for {} yet (attempt {})", address, attempt);
                self.settle(
                    self.timings.profile_settle(),
                    address,
                    PairingState::MatchingEndpoints,
                )
                .await?;
            }
        }

        warn!("No audio endpoints appeared for {}", address);
        Ok((None, None))
    }

    /// Make the matched endpoints the defaults and publish their levels.
    async fn apply_defaults(&self, sink: Option<&str>, source: Option<&str>) {
        let mixer = self.poller.mixer();
        let mut next = (*self.poller.store().current_snapshot()).clone();

        for (kind, id) in [(DeviceKind::Sink, sink), (DeviceKind::Source, source)] {
            let Some(id) = id else { continue };

            if let Err(e) = mixer.set_default(kind, id).await {
                warn!("Could not set default {} to {}: {}", kind.as_str(), id, e);
                continue;
            }
            next.set_default_id(kind, id);

            match mixer.read_levels(kind, id).await {
                Ok((volume, muted)) => {
                    if let Some(device) = next.devices_mut(kind).iter_mut().find(|d| d.id == id) {
                        device.volume = volume;
                        device.muted = muted;
                    }
                }
                Err(e) => warn!("Could not read levels of {}: {}", id, e),
            }
        }

        self.poller.publish(next);

        if let Err(e) = self.poller.refresh().await {
            warn!("Final re-poll failed: {}", e);
        }
        self.schedule_refresh(self.timings.final_refresh());
    }

    /// Re-poll once after `delay` unless shut down first.
    pub fn schedule_refresh(&self, delay: Duration) {
        let poller = Arc::clone(&self.poller);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = poller.refresh().await {
                        warn!("Delayed refresh failed: {}", e);
                    }
                }
            }
        });
    }

    async fn settle(
        &self,
        delay: Duration,
        address: BluetoothAddress,
        step: PairingState,
    ) -> Result<(), PairingError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PairingError::Cancelled { address, step }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn enter(&self, state: PairingState) {
        self.update(|session| {
            debug!("{}: {} -> {}", session.target, session.state, state);
            session.enter(state);
        });
    }

    fn update(&self, f: impl FnOnce(&mut PairingSession)) {
        if let Some(session) = self.lock().active.as_mut() {
            f(session);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        lock_slots(&self.slots)
    }
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds the active slot for one session. A session whose future is dropped
/// before it finishes is recorded as `Failed` and the slot is freed.
struct ActiveSlot<'a>(&'a Mutex<Slots>);

impl ActiveSlot<'_> {
    /// Move the session into `last` as `Done`, or `Failed` with `error`.
    fn finish(self, error: Option<String>) {
        Self::close(self.0, |session| match error {
            None => session.enter(PairingState::Done),
            Some(error) => {
                session.last_error = Some(error);
                session.enter(PairingState::Failed);
            }
        });
    }

    fn close(slots: &Mutex<Slots>, f: impl FnOnce(&mut PairingSession)) {
        let mut slots = lock_slots(slots);
        if let Some(mut session) = slots.active.take() {
            f(&mut session);
            slots.last = Some(session);
        }
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        Self::close(self.0, |session| {
            warn!("Pairing session for {} abandoned in {}", session.target, session.state);
            session.last_error = Some("abandoned".to_string());
            session.enter(PairingState::Failed);
        });
    }
}
