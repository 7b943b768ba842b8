use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::AudioDevice;
use crate::bluetooth::{BluetoothAddress, PairingOutcome};
use crate::config::NotificationConfig;

/// Trait for sending notifications - allows for testing without system calls
pub trait NotificationSender: Send + Sync {
    fn send(&self, title: &str, body: &str) -> Result<()>;
}

/// Production notification sender using `notify-send`
pub struct NotifySendSender;

impl NotificationSender for NotifySendSender {
    fn send(&self, title: &str, body: &str) -> Result<()> {
        use std::process::Command;

        let output = Command::new("notify-send")
            .args(["--app-name", "Bluetooth Audio", title, body])
            .output()?;

        if output.status.success() {
            Ok(())
        } else {
            let error = String::from_utf8_lossy(&output.stderr);
            Err(anyhow::anyhow!("notify-send failed: {}", error.trim()))
        }
    }
}

/// Test notification sender that records instead of sending
#[cfg(any(test, feature = "test-mocks"))]
#[derive(Clone, Default)]
pub struct TestNotificationSender {
    pub sent_notifications: std::sync::Arc<std::sync::Mutex<Vec<(String, String)>>>,
}

#[cfg(any(test, feature = "test-mocks"))]
impl TestNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_sent_notifications(&self) -> Vec<(String, String)> {
        self.sent_notifications.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent_notifications.lock().unwrap().clear();
    }
}

#[cfg(any(test, feature = "test-mocks"))]
impl NotificationSender for TestNotificationSender {
    fn send(&self, title: &str, body: &str) -> Result<()> {
        debug!("Test notification: {} - {}", title, body);
        self.sent_notifications
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Desktop notifications for pairing sessions and default switches
pub struct NotificationManager {
    show_pairing_results: bool,
    show_device_switches: bool,
    sender: Arc<dyn NotificationSender>,
}

impl NotificationManager {
    pub fn new(config: &NotificationConfig) -> Self {
        Self::with_sender(config, Box::new(NotifySendSender))
    }

    pub fn with_sender(config: &NotificationConfig, sender: Box<dyn NotificationSender>) -> Self {
        Self {
            show_pairing_results: config.show_pairing_results,
            show_device_switches: config.show_device_switches,
            sender: Arc::from(sender),
        }
    }

    /// A disabled manager, for one-shot CLI commands
    pub fn silent() -> Self {
        Self {
            show_pairing_results: false,
            show_device_switches: false,
            sender: Arc::new(NotifySendSender),
        }
    }

    pub async fn pairing_completed(&self, outcome: &PairingOutcome) {
        if self.show_pairing_results {
            self.send("Bluetooth Audio Connected", outcome.summary()).await;
        }
    }

    pub async fn pairing_failed(&self, message: &str) {
        if self.show_pairing_results {
            self.send("Bluetooth Audio Failed", message.to_string()).await;
        }
    }

    pub async fn unpair_completed(&self, address: BluetoothAddress) {
        if self.show_pairing_results {
            self.send("Bluetooth Device Removed", format!("{address} was unpaired"))
                .await;
        }
    }

    pub async fn unpair_failed(&self, address: BluetoothAddress, message: &str) {
        if self.show_pairing_results {
            self.send(
                "Bluetooth Unpair Failed",
                format!("Could not unpair {address}: {message}"),
            )
            .await;
        }
    }

    pub async fn device_switched(&self, device: &AudioDevice) {
        if self.show_device_switches {
            self.send(
                "Audio Device Switched",
                format!("{} switched to {}", device.kind, device.description),
            )
            .await;
        }
    }

    /// Runs the sender on the blocking pool. Failures are logged, never
    /// propagated.
    async fn send(&self, title: &'static str, body: String) {
        debug!("Sending notification: {} - {}", title, body);
        let sender = Arc::clone(&self.sender);
        match tokio::task::spawn_blocking(move || sender.send(title, &body)).await {
            Ok(Ok(())) => info!("Sent notification: {}", title),
            Ok(Err(e)) => warn!("Failed to send notification {:?}: {}", title, e),
            Err(e) => warn!("Notification worker for {:?} failed: {}", title, e),
        }
    }
}
