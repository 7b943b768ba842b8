use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use bluetooth_audio_monitor::audio::{
    DeviceKind, DeviceSnapshot, MixerHandle, Poller, SnapshotStore,
};
use bluetooth_audio_monitor::bluetooth::{BluetoothAddress, BluetoothDevice};
use bluetooth_audio_monitor::config::Config;
use bluetooth_audio_monitor::logging::{self, LoggingConfig};
use bluetooth_audio_monitor::service::{
    ProductionEngine, ServiceInstaller, SignalHandler, SignalType,
};
use bluetooth_audio_monitor::system::{BluerBluetooth, BluetoothInterface, PactlMixer};

const LOG_RETENTION_DAYS: u64 = 7;

#[derive(Parser)]
#[command(name = "bluetooth-audio-monitor")]
#[command(about = "Keeps Bluetooth audio devices connected and routed through PipeWire")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in daemon mode
    Daemon,
    /// List all audio sinks and sources
    ListDevices {
        /// Show volume, mute and mixer ids
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show current default devices
    ShowDefault,
    /// Switch the default device
    Switch {
        /// Device name or mixer id
        #[arg(short, long)]
        device: String,
        /// Switch input device instead of output
        #[arg(short, long)]
        input: bool,
    },
    /// Set the volume of a device (default device when none given)
    Volume {
        /// Volume in percent
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long)]
        input: bool,
    },
    /// Mute a device (default device when none given)
    Mute {
        #[arg(short, long)]
        device: Option<String>,
        #[arg(short, long)]
        input: bool,
        /// Unmute instead
        #[arg(long)]
        off: bool,
    },
    /// Bluetooth device management
    Bluetooth {
        #[command(subcommand)]
        command: BluetoothCommands,
    },
    /// Validate configuration file
    CheckConfig,
    /// Install the systemd user service
    InstallService,
    /// Remove the systemd user service
    UninstallService,
}

#[derive(Subcommand)]
enum BluetoothCommands {
    /// List known Bluetooth devices
    List,
    /// Discover nearby devices
    Scan,
    /// Pair a device and route audio to it
    Pair { address: BluetoothAddress },
    /// Connect a paired device and route audio to it
    Connect { address: BluetoothAddress },
    /// Remove a paired device
    Unpair { address: BluetoothAddress },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let daemon = matches!(cli.command, None | Some(Commands::Daemon));
    let mut logging_config = LoggingConfig::from_general(&config.general, cli.verbose);
    logging_config.file_output &= daemon;
    let (_guard, log_dir) =
        logging::initialize_logging(logging_config).context("Failed to initialize logging")?;

    if let Some(dir) = log_dir {
        if let Err(e) = logging::cleanup_old_logs(&dir, LOG_RETENTION_DAYS) {
            warn!("Failed to clean up old logs: {}", e);
        }
    }

    match cli.command {
        None | Some(Commands::Daemon) => run_daemon(config).await,
        Some(Commands::ListDevices { verbose }) => list_devices(&config, verbose).await,
        Some(Commands::ShowDefault) => show_default_devices(&config).await,
        Some(Commands::Switch { device, input }) => {
            switch_device(&config, &device, kind_for(input)).await
        }
        Some(Commands::Volume {
            level,
            device,
            input,
        }) => set_volume(&config, device.as_deref(), kind_for(input), level).await,
        Some(Commands::Mute { device, input, off }) => {
            set_mute(&config, device.as_deref(), kind_for(input), !off).await
        }
        Some(Commands::Bluetooth { command }) => bluetooth(config, command).await,
        Some(Commands::CheckConfig) => check_config(&config),
        Some(Commands::InstallService) => install_service(),
        Some(Commands::UninstallService) => uninstall_service(),
    }
}

fn kind_for(input: bool) -> DeviceKind {
    if input {
        DeviceKind::Source
    } else {
        DeviceKind::Sink
    }
}

async fn run_daemon(config: Config) -> Result<()> {
    info!("Starting daemon mode");

    let engine = Arc::new(
        ProductionEngine::new_production(config)
            .await
            .context("Failed to connect to the Bluetooth daemon")?,
    );
    if let Err(e) = engine.start().await {
        engine.shutdown().await;
        return Err(e).context("Failed to start engine");
    }

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let signal_handler = SignalHandler::new(signal_tx);
    let signal_task = tokio::spawn(async move {
        if let Err(e) = signal_handler.listen_for_signals().await {
            warn!("Signal handler failed: {}", e);
        }
    });

    println!("Bluetooth audio monitor daemon started");
    println!("  Press Ctrl+C to stop");

    while let Some(signal) = signal_rx.recv().await {
        match signal {
            SignalType::Shutdown => break,
            SignalType::Refresh => engine.refresh_all().await,
        }
    }

    engine.shutdown().await;
    signal_task.abort();
    println!("Daemon stopped");
    Ok(())
}

/// A poller that is never run, for reading and writing mixer state once.
fn one_shot_poller(config: &Config) -> Poller<PactlMixer> {
    let (events, _) = broadcast::channel(1);
    Poller::new(
        MixerHandle::new(PactlMixer::new(config.mixer.program.clone())),
        Arc::new(SnapshotStore::new()),
        events,
        config.polling.interval(),
    )
}

async fn read_snapshot(poller: &Poller<PactlMixer>) -> Result<Arc<DeviceSnapshot>> {
    poller.refresh().await.context("Failed to query the mixer")?;
    Ok(poller.store().current_snapshot())
}

/// Mixer id for `name`: an exact id, then a description match, then the
/// default when no name is given.
fn resolve_device(snapshot: &DeviceSnapshot, kind: DeviceKind, name: Option<&str>) -> Result<String> {
    let Some(name) = name else {
        let id = snapshot.default_id(kind);
        if id.is_empty() {
            bail!("No default {} device", kind.as_str());
        }
        return Ok(id.to_string());
    };

    let devices = snapshot.devices(kind);
    let lowered = name.to_lowercase();
    devices
        .iter()
        .find(|d| d.id == name)
        .or_else(|| devices.iter().find(|d| d.description.to_lowercase() == lowered))
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.description.to_lowercase().contains(&lowered))
        })
        .map(|d| d.id.clone())
        .with_context(|| format!("No {} device matches {:?}", kind.as_str(), name))
}

async fn list_devices(config: &Config, verbose: bool) -> Result<()> {
    let poller = one_shot_poller(config);
    let snapshot = read_snapshot(&poller).await?;

    for kind in [DeviceKind::Sink, DeviceKind::Source] {
        println!("{} devices:", kind);
        let devices = snapshot.devices(kind);
        if devices.is_empty() {
            println!("  None found");
        }
        for (i, device) in devices.iter().enumerate() {
            let marker = if device.id == snapshot.default_id(kind) {
                "*"
            } else {
                " "
            };
            if verbose {
                println!("  {}{}. {}", marker, i + 1, device);
                println!("       id: {}", device.id);
            } else {
                println!("  {}{}. {}", marker, i + 1, device.description);
            }
        }
    }
    Ok(())
}

async fn show_default_devices(config: &Config) -> Result<()> {
    let poller = one_shot_poller(config);
    let snapshot = read_snapshot(&poller).await?;

    println!("Current default devices:");
    for kind in [DeviceKind::Sink, DeviceKind::Source] {
        match snapshot.default_device(kind) {
            Some(device) => println!("  {}: {}", kind, device),
            None => println!("  {}: None available", kind),
        }
    }
    Ok(())
}

async fn switch_device(config: &Config, name: &str, kind: DeviceKind) -> Result<()> {
    let poller = one_shot_poller(config);
    let snapshot = read_snapshot(&poller).await?;
    let id = resolve_device(&snapshot, kind, Some(name))?;

    poller
        .mixer()
        .set_default(kind, &id)
        .await
        .with_context(|| format!("Failed to switch {} device", kind.as_str()))?;

    println!(
        "✓ Switched {} device to: {}",
        kind.as_str(),
        snapshot.display_name(kind, &id)
    );
    Ok(())
}

async fn set_volume(config: &Config, name: Option<&str>, kind: DeviceKind, level: u8) -> Result<()> {
    let poller = one_shot_poller(config);
    let snapshot = read_snapshot(&poller).await?;
    let id = resolve_device(&snapshot, kind, name)?;

    let mixer = poller.mixer();
    mixer
        .set_volume_unmuting(kind, &id, level)
        .await
        .context("Failed to set volume")?;
    let volume = mixer.get_volume(kind, &id).await.context("Failed to read volume")?;

    println!("{}: {}%", snapshot.display_name(kind, &id), volume);
    Ok(())
}

async fn set_mute(config: &Config, name: Option<&str>, kind: DeviceKind, muted: bool) -> Result<()> {
    let poller = one_shot_poller(config);
    let snapshot = read_snapshot(&poller).await?;
    let id = resolve_device(&snapshot, kind, name)?;

    poller
        .mixer()
        .set_mute(kind, &id, muted)
        .await
        .context("Failed to change mute")?;

    println!(
        "{}: {}",
        snapshot.display_name(kind, &id),
        if muted { "muted" } else { "unmuted" }
    );
    Ok(())
}

fn print_bluetooth_devices(devices: &[BluetoothDevice]) {
    if devices.is_empty() {
        println!("  No Bluetooth devices found");
    }
    for device in devices {
        println!("  {}", device);
    }
}

async fn bluetooth(mut config: Config, command: BluetoothCommands) -> Result<()> {
    if let BluetoothCommands::List = command {
        let bluetooth = BluerBluetooth::new()
            .await
            .context("Failed to connect to the Bluetooth daemon")?;
        let devices = bluetooth.list_devices().await?;
        println!("Bluetooth devices:");
        print_bluetooth_devices(&devices);
        return Ok(());
    }

    // One-shot sessions should not sweep other paired devices.
    config.bluetooth.auto_connect_paired = false;
    let engine = Arc::new(
        ProductionEngine::new_production(config)
            .await
            .context("Failed to connect to the Bluetooth daemon")?,
    );

    let result = match command {
        BluetoothCommands::List => Ok(()),
        BluetoothCommands::Scan => {
            println!("Scanning...");
            engine.scan().await.map(|devices| {
                println!("Bluetooth devices:");
                print_bluetooth_devices(&devices);
            })
            .context("Scan failed")
        }
        BluetoothCommands::Pair { address } => run_session(&engine, address, true).await,
        BluetoothCommands::Connect { address } => run_session(&engine, address, false).await,
        BluetoothCommands::Unpair { address } => engine
            .unpair(address)
            .await
            .map(|()| println!("✓ Unpaired {}", address))
            .with_context(|| format!("Failed to unpair {}", address)),
    };

    engine.shutdown().await;
    result
}

async fn run_session(engine: &Arc<ProductionEngine>, address: BluetoothAddress, pair: bool) -> Result<()> {
    engine.start().await.context("Failed to start engine")?;

    let outcome = if pair {
        engine.pair(address).await?
    } else {
        engine.activate(address).await?
    };

    if outcome.is_partial() {
        println!("⚠ {}", outcome.summary());
    } else {
        println!("✓ {}", outcome.summary());
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    println!("Configuration validation:");
    println!("  ✓ Configuration file parsed successfully");
    println!("  ✓ Poll interval: {:?}", config.polling.interval());
    println!("  ✓ Mixer program: {}", config.mixer.program);
    println!("  ✓ Card profile: {}", config.mixer.a2dp_profile);
    println!(
        "  ✓ Reconnect paired devices at startup: {}",
        config.bluetooth.auto_connect_paired
    );
    println!(
        "  ✓ Endpoint match attempts: {}",
        config.timings.endpoint_match_attempts
    );
    Ok(())
}

fn install_service() -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate the current executable")?;
    let installer = ServiceInstaller::new_production()?;
    installer.install(&exe)?;
    println!("✓ Installed {}", installer.unit_path().display());
    Ok(())
}

fn uninstall_service() -> Result<()> {
    let installer = ServiceInstaller::new_production()?;
    if installer.uninstall()? {
        println!("✓ Removed {}", installer.unit_path().display());
    } else {
        println!("Service was not installed");
    }
    Ok(())
}
