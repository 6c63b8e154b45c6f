use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use lorawan_gateway::channel_manager::ChannelManager;
use lorawan_gateway::clock::MonotonicClock;
use lorawan_gateway::config::{ConfigHandle, ConfigStore, FileConfigStore, GatewayConfig};
use lorawan_gateway::forwarder::client::ForwarderClient;
use lorawan_gateway::forwarder::json::rxpk_from_packet;
use lorawan_gateway::gateway::GatewayCore;
use lorawan_gateway::radio::driver::{ChannelSettings, RadioDriver, Sx127xRadio};
use lorawan_gateway::radio::hal::MockBus;
use lorawan_gateway::{init_logger, log_info};

#[derive(Parser)]
#[command(name = "lorawan-gatewayd")]
#[command(about = "Two-radio LoRaWAN packet-forwarding gateway speaking the Semtech UDP protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway against a configuration file, creating a default
    /// AU915 config on first boot if none exists.
    Run {
        #[arg(short, long, default_value = "gateway.json")]
        config: PathBuf,
        #[arg(long)]
        server: SocketAddr,
        #[arg(long, value_parser = parse_mac, default_value = "00:11:22:33:44:55")]
        gateway_mac: [u8; 6],
        #[arg(long, default_value_t = 0)]
        subband: u8,
    },
    /// Print the effective configuration (creating the default if absent)
    /// without starting the gateway.
    ShowConfig {
        #[arg(short, long, default_value = "gateway.json")]
        config: PathBuf,
        #[arg(long, value_parser = parse_mac, default_value = "00:11:22:33:44:55")]
        gateway_mac: [u8; 6],
        #[arg(long, default_value_t = 0)]
        subband: u8,
    },
}

fn parse_mac(s: &str) -> Result<[u8; 6], Box<dyn std::error::Error + Send + Sync + 'static>> {
    let mut mac = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(format!("expected 6 colon-separated hex octets, got '{s}'").into());
    }
    for (slot, part) in mac.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16)?;
    }
    Ok(mac)
}

fn load_or_init_config(path: &PathBuf, mac: [u8; 6], subband: u8) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let store = FileConfigStore::new(path);
    match store.load()? {
        Some(config) => Ok(config),
        None => {
            let config = GatewayConfig::default_au915(mac, subband);
            store.save(&config)?;
            info!("wrote default AU915 configuration to {}", path.display());
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::ShowConfig { config, gateway_mac, subband } => {
            let config = load_or_init_config(&config, gateway_mac, subband)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run { config, server, gateway_mac, subband } => {
            let config = load_or_init_config(&config, gateway_mac, subband)?;
            let config_handle = Arc::new(ConfigHandle::new(config));
            run_gateway(config_handle, server).await?;
        }
    }

    Ok(())
}

/// Wires a [`ChannelManager`] over a pair of radios, a [`GatewayCore`]
/// chokepoint, and a [`ForwarderClient`] talking to `server`, per spec.md
/// §5's top-level wiring diagram. No `raspberry-pi` feature is enabled by
/// default, so this runs the radios against [`MockBus`] — useful for
/// exercising the full pipeline without hardware; production deployments
/// build with `--features raspberry-pi` and swap in
/// `radio::hal::raspberry_pi::RaspberryPiRadioBus`.
async fn run_gateway(config_handle: Arc<ConfigHandle>, server: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = config_handle.snapshot();
    let clock = Arc::new(MonotonicClock::new());

    warn!("no raspberry-pi feature enabled: running both radios against an in-memory mock bus");
    let rx_radio = Arc::new(Sx127xRadio::init(MockBus::new(), clock.clone()).await?);
    let tx_radio = Arc::new(Sx127xRadio::init(MockBus::new(), clock.clone()).await?);

    let rx_channel = snapshot.lora.channels[0];
    rx_radio
        .apply_channel(ChannelSettings {
            frequency_hz: rx_channel.frequency_hz,
            sf: snapshot.lora.rx_sf,
            bw_code: snapshot.lora.rx_bw,
            coding_rate: 1,
            tx_power_dbm: snapshot.lora.tx_power_dbm,
            sync_word: snapshot.lora.sync_word,
            rx_invert_iq: false,
            tx_invert_iq: false,
        })
        .await?;

    let channel_table = std::array::from_fn(|i| snapshot.lora.channels[i].frequency_hz);
    let channel_manager = Arc::new(ChannelManager::new(
        rx_radio,
        tx_radio,
        clock.clone(),
        snapshot.lora.sync_word,
        channel_table,
        Some(1_000),
    ));

    let gateway = Arc::new(GatewayCore::new(channel_manager.clone(), clock.clone()));

    let forwarder = Arc::new(
        ForwarderClient::connect(
            server,
            snapshot.gateway_eui,
            gateway.stats(),
            Duration::from_millis(snapshot.server.keepalive_interval_ms as u64),
            Duration::from_millis(snapshot.server.stat_interval_ms as u64),
        )
        .await?,
    );

    let gateway_for_rx = gateway.clone();
    channel_manager
        .start(
            Arc::new(move |packet| {
                let gateway = gateway_for_rx.clone();
                tokio::spawn(async move { gateway.on_radio_rx(packet).await });
            }),
            Arc::new({
                let gateway = gateway.clone();
                move || gateway.record_collision()
            }),
        )
        .await?;
    channel_manager.start_hopping().await;

    let forwarder_for_forward = forwarder.clone();
    let gateway_for_drain = gateway.clone();
    tokio::spawn(async move {
        gateway_for_drain
            .run_rx_drain(Arc::new(move |packet| {
                let forwarder = forwarder_for_forward.clone();
                match rxpk_from_packet(&packet) {
                    Ok(rxpk) => {
                        tokio::spawn(async move { forwarder.enqueue_uplink(rxpk).await });
                    }
                    Err(e) => error!("failed to encode rxpk: {e}"),
                }
            }))
            .await;
    });

    let forwarder_for_send = forwarder.clone();
    tokio::spawn(async move { forwarder_for_send.run_uplink_sender().await });

    let forwarder_for_keepalive = forwarder.clone();
    tokio::spawn(async move { forwarder_for_keepalive.run_keepalive().await });

    let forwarder_for_stat = forwarder.clone();
    tokio::spawn(async move { forwarder_for_stat.run_stat_reporter().await });

    let forwarder_for_watchdog = forwarder.clone();
    tokio::spawn(async move { forwarder_for_watchdog.run_connection_watchdog().await });

    let gateway_for_tx = gateway.clone();
    let dispatch: lorawan_gateway::forwarder::client::TxpkDispatchFn = Arc::new(move |packet| {
        let gateway = gateway_for_tx.clone();
        tokio::spawn(async move {
            let ok = gateway.submit_tx(packet).await.is_ok();
            gateway.record_tx_result(ok);
        });
        true
    });

    log_info(&format!("lorawan-gatewayd up, forwarding to {server}"));
    forwarder.run_receive_loop(dispatch).await;

    Ok(())
}
