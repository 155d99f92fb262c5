//! nova-bridge - USB to JACK MIDI bridge
//!
//! Exposes a Novation UltraNova or MiniNova as JACK MIDI ports, with automap
//! control-surface support and optional Ardour OSC mirroring.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nova_bridge::audio::AudioClient;
use nova_bridge::bridge::Bridge;
use nova_bridge::config::{AppConfig, DeviceSelection};
use nova_bridge::mirror::{MirrorTarget, OscMirror};
use nova_bridge::usb::{self, TransportOptions, UsbDevice};

/// How often the main loop checks the transport and JACK client
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Nova Bridge - Novation UltraNova/MiniNova USB to JACK MIDI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "nova-bridge.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Dump every USB transfer (implies debug logging)
    #[arg(long)]
    debug: bool,

    /// Mirror mute, record and transport state to Ardour over OSC
    #[arg(long)]
    ardour_osc: bool,

    /// Device to open
    #[arg(long, value_enum)]
    device: Option<DeviceSelection>,

    /// List supported devices on the bus and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    init_logging(level)?;

    info!("Starting nova-bridge v{}...", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices();
    }

    info!("Configuration file: {}", args.config);
    let mut config = AppConfig::load_or_default(&args.config).await?;
    if let Some(device) = args.device {
        config.device = device;
    }
    if args.ardour_osc {
        config.mirror.enabled = true;
    }
    config.validate()?;

    run_app(config, args.debug, shutdown_signal()).await?;

    info!("nova-bridge shutdown complete");
    Ok(())
}

async fn run_app(
    config: AppConfig,
    dump_transfers: bool,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let protocol = config.automap_protocol()?;

    let device = UsbDevice::open(config.device, config.usb.detach_kernel_driver)
        .context("Failed to open USB device")?;
    let descriptor = device.descriptor();
    info!("✅ {} connected", descriptor.name);

    let mirror: Option<Arc<dyn MirrorTarget>> = if config.mirror.enabled && descriptor.has_controller() {
        let target = OscMirror::connect(&config.mirror.address())
            .context("Failed to set up OSC mirror target")?;
        Some(Arc::new(target))
    } else {
        if config.mirror.enabled {
            warn!("{} has no control surface, OSC mirror disabled", descriptor.name);
        }
        None
    };

    let (outbound_tx, outbound_rx) = crossbeam::channel::unbounded();
    let bridge = Bridge::new(descriptor, protocol, mirror, outbound_tx.clone());
    let queues = bridge.queues();

    let audio = AudioClient::start(config.client_name(descriptor), descriptor, queues, outbound_tx)
        .context("Failed to start JACK client")?;

    let options = TransportOptions {
        read_timeout: Duration::from_millis(config.usb.read_timeout_ms),
        dump_transfers,
    };
    let transport = device.start(bridge, outbound_rx, options)?;

    info!("Ready to bridge MIDI events!");

    tokio::pin!(shutdown);
    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping bridge");
                break;
            }
            _ = health.tick() => {
                if !transport.is_running() {
                    warn!("USB transport stopped, shutting down");
                    break;
                }
                if !audio.is_alive() {
                    warn!("JACK client lost, shutting down");
                    break;
                }
            }
        }
    }

    // Cleanup: the JACK client holds an outbound sender, close it before joining the writer
    info!("Shutting down...");
    if let Err(e) = audio.stop() {
        warn!("{}", e);
    }
    tokio::task::spawn_blocking(move || transport.stop())
        .await
        .context("USB transport shutdown failed")?;
    drop(device);

    Ok(())
}

fn list_devices() -> Result<()> {
    let found = usb::list_devices().context("Failed to enumerate USB devices")?;

    println!("\n{}", "=== Supported devices ===".bold().cyan());
    if found.is_empty() {
        println!("  {}", "none connected".yellow());
    }
    for d in found {
        println!(
            "  Bus {:03} Device {:03}: {} [{:04x}:{:04x}] client '{}'",
            d.bus,
            d.address,
            d.descriptor.name.green(),
            d.descriptor.vendor_id,
            d.descriptor.product_id,
            d.descriptor.client_name
        );
    }
    println!();

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
