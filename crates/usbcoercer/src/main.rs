mod supervisor;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use supervisor::{retry_init, spawn_supervised, ServicePriority};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use uc_common::config::{AppConfig, EnvConfig};
use uc_common::events::{DhcpEvent, EventBus, LinkStatus};
use uc_dhcp::{DhcpError, DhcpEventSender, DhcpService, ServerConfig};
use uc_wpad::WpadState;

const DEFAULT_LOG_FILTER: &str = "info,usbcoercer=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    info!("usbcoercer starting...");

    let env = EnvConfig::from_env();
    info!("Config file: {}", env.config_path.display());

    let (app_config, server_config) = load_config(&env)?;
    app_config.log_summary(&server_config);

    let events = EventBus::new();
    spawn_status_watcher(events.dhcp.subscribe());

    // ── DHCP ───────────────────────────────────────────────────────────

    let mut dhcp = DhcpService::new();
    start_dhcp(&mut dhcp, server_config.clone(), Some(events.dhcp.clone())).await?;

    // ── WPAD HTTP ──────────────────────────────────────────────────────

    if app_config.wpad.enabled {
        let state = WpadState::new(app_config.wpad.pac.as_str());
        let port = app_config.wpad.http_port;
        spawn_supervised("wpad-http", ServicePriority::Important, move || {
            let state = state.clone();
            async move { uc_wpad::run_wpad_server(port, state).await }
        });
    } else {
        info!("WPAD HTTP server not started (disabled)");
    }

    info!(
        "USB interface up at {}, serving DHCP on {}",
        server_config.server_ip,
        dhcp.local_addr()
            .map_or_else(|| "-".to_string(), |a| a.to_string())
    );

    // ── Signals ────────────────────────────────────────────────────────

    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    while let Some(signal) = signals.next().await {
        if signal == SIGHUP {
            info!("Received SIGHUP, reloading config...");
            reload_dhcp(&env, &mut dhcp, &events).await;
            continue;
        }

        info!("Received signal {}, shutting down", signal);
        break;
    }

    signals_handle.close();
    dhcp.shutdown().await;
    info!("usbcoercer stopped");
    Ok(())
}

fn load_config(env: &EnvConfig) -> anyhow::Result<(AppConfig, ServerConfig)> {
    let mut config = AppConfig::load(&env.config_path)?;
    config.apply_env(env);
    config.interface_mac()?;
    let server_config = config.dhcp_server_config()?;
    Ok((config, server_config))
}

/// Re-read the config file and restart DHCP with it. The running server is
/// kept when the new file does not load. WPAD changes need a restart.
async fn reload_dhcp(env: &EnvConfig, dhcp: &mut DhcpService, events: &EventBus) {
    let server_config = match load_config(env) {
        Ok((app_config, server_config)) => {
            app_config.log_summary(&server_config);
            server_config
        }
        Err(e) => {
            error!("Failed to reload config, keeping current DHCP server: {:#}", e);
            return;
        }
    };

    match start_dhcp(dhcp, server_config, Some(events.dhcp.clone())).await {
        Ok(()) => info!("DHCP server reloaded, all leases cleared"),
        Err(e) => error!("Failed to restart DHCP server: {}", e),
    }
}

/// Replace whatever `dhcp` is serving with `config`, retrying the bind until
/// the port is free. An invalid config leaves the running server alone.
async fn start_dhcp(
    dhcp: &mut DhcpService,
    config: ServerConfig,
    events: Option<DhcpEventSender>,
) -> Result<(), DhcpError> {
    config.validate()?;
    dhcp.shutdown().await;
    *dhcp = retry_init("dhcp", ServicePriority::Critical, || {
        std::future::ready(DhcpService::bind(config.clone(), events.clone()))
    })
    .await?;
    Ok(())
}

/// Log the first DISCOVER and the first bound lease.
fn spawn_status_watcher(mut rx: broadcast::Receiver<DhcpEvent>) {
    tokio::spawn(async move {
        let mut status = LinkStatus::default();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!("Status watcher skipped {} DHCP events", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match (status.observe(&event), event) {
                (Some(LinkStatus::Bound), DhcpEvent::Ack { mac, address }) => {
                    info!("Host {} bound to {}", mac, address)
                }
                (Some(LinkStatus::Discovered), DhcpEvent::Discover { mac }) => {
                    info!("Host {} is looking for an address", mac)
                }
                _ => {}
            }
        }
    });
}
