use anyhow::Result;
use signal_hook::consts::signal::*;
use signal_hook_tokio::Signals;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Signal types that can be received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// SIGTERM / SIGINT
    Shutdown,
    /// SIGHUP: re-read audio and Bluetooth state
    Refresh,
}

impl SignalType {
    pub fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGTERM | SIGINT => Some(SignalType::Shutdown),
            SIGHUP => Some(SignalType::Refresh),
            _ => None,
        }
    }
}

/// Forwards process signals to the daemon loop
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    signal_sender: mpsc::UnboundedSender<SignalType>,
}

impl SignalHandler {
    pub fn new(signal_sender: mpsc::UnboundedSender<SignalType>) -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            signal_sender,
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Listen until a shutdown signal arrives or the receiver goes away
    pub async fn listen_for_signals(&self) -> Result<()> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
        let handle = signals.handle();

        info!("Signal handler initialized, listening for SIGTERM, SIGINT, SIGHUP");

        while let Some(signal) = signals.next().await {
            match SignalType::from_raw(signal) {
                Some(SignalType::Shutdown) => {
                    info!("Received shutdown signal ({}), initiating graceful shutdown", signal);
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    let _ = self.signal_sender.send(SignalType::Shutdown);
                    break;
                }
                Some(SignalType::Refresh) => {
                    info!("Received SIGHUP, refreshing device state");
                    if self.signal_sender.send(SignalType::Refresh).is_err() {
                        warn!("Signal receiver closed, stopping signal handler");
                        break;
                    }
                }
                None => warn!("Received unexpected signal: {}", signal),
            }
        }

        handle.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(SignalType::from_raw(SIGTERM), Some(SignalType::Shutdown));
        assert_eq!(SignalType::from_raw(SIGINT), Some(SignalType::Shutdown));
        assert_eq!(SignalType::from_raw(SIGHUP), Some(SignalType::Refresh));
        assert_eq!(SignalType::from_raw(SIGUSR1), None);
    }
}
