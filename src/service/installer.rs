use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::system::{FileSystemInterface, StandardFileSystem};

const UNIT_NAME: &str = "bluetooth-audio-monitor.service";

/// Installs the daemon as a systemd user service
pub struct ServiceInstaller<F: FileSystemInterface> {
    file_system: F,
    unit_path: PathBuf,
}

impl<F: FileSystemInterface> ServiceInstaller<F> {
    pub fn new(file_system: F, unit_path: PathBuf) -> Self {
        Self {
            file_system,
            unit_path,
        }
    }

    pub fn unit_path(&self) -> &Path {
        &self.unit_path
    }

    /// Write the unit file for `exe_path`
    pub fn install(&self, exe_path: &Path) -> Result<()> {
        info!("Installing systemd user unit");

        if let Some(parent) = self.unit_path.parent() {
            self.file_system
                .create_config_dir(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        self.file_system
            .write_config_file(&self.unit_path, &generate_unit(exe_path))
            .with_context(|| format!("Failed to write {}", self.unit_path.display()))?;

        info!("Service unit installed to: {}", self.unit_path.display());
        info!("To start the service, run: systemctl --user enable --now {UNIT_NAME}");
        Ok(())
    }

    /// Remove the unit file. Returns false when nothing was installed.
    pub fn uninstall(&self) -> Result<bool> {
        info!("Uninstalling systemd user unit");

        if !self.file_system.config_file_exists(&self.unit_path) {
            warn!("Service unit not found at: {}", self.unit_path.display());
            return Ok(false);
        }

        self.file_system
            .remove_file(&self.unit_path)
            .with_context(|| format!("Failed to remove {}", self.unit_path.display()))?;

        info!("Service unit removed from: {}", self.unit_path.display());
        info!("To stop the service, run: systemctl --user disable --now {UNIT_NAME}");
        Ok(true)
    }
}

impl ServiceInstaller<StandardFileSystem> {
    /// `~/.config/systemd/user/bluetooth-audio-monitor.service`
    pub fn new_production() -> Result<Self> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(Self::new(
            StandardFileSystem,
            config_dir.join("systemd/user").join(UNIT_NAME),
        ))
    }
}

fn generate_unit(exe_path: &Path) -> String {
    format!(
        r#"[Unit]
Description=Bluetooth audio monitor
After=bluetooth.target pipewire-pulse.service
Wants=bluetooth.target

[Service]
Type=simple
ExecStart={exe} daemon
ExecReload=/bin/kill -HUP $MAINPID
Restart=on-failure
RestartSec=5
Environment=RUST_LOG=bluetooth_audio_monitor=info

[Install]
WantedBy=default.target
"#,
        exe = exe_path.display()
    )
}
