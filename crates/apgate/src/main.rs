use std::path::{Path, PathBuf};
use std::sync::Arc;

use ap_dhcp::{DhcpState, SharedDhcpState};
use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;
use tokio::sync::{oneshot, RwLock};
use tokio_stream::StreamExt;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "/etc/apgate/dhcp.json";

/// Gateway config file; only the DHCP section is read here.
#[derive(serde::Deserialize, Default)]
struct GatewayConfig {
    #[serde(default)]
    dhcp: ap_dhcp::DhcpConfig,
}

impl GatewayConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,apgate=debug,ap_dhcp=debug".into()),
        )
        .init();

    info!("apgate starting...");

    let config_path = std::env::var_os("APGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = GatewayConfig::load(&config_path)?;

    let (first, last) = config.dhcp.pool_range();
    info!(
        "DHCP {}: server {}, netmask {}, pool {} - {}, lease {}s",
        if config.dhcp.enabled { "enabled" } else { "disabled" },
        config.dhcp.server_address,
        config.dhcp.netmask,
        first,
        last,
        config.dhcp.lease_time_secs,
    );

    let dhcp_state: SharedDhcpState = Arc::new(RwLock::new(DhcpState::try_new(config.dhcp)?));

    // ── DHCP server ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = {
        let state = dhcp_state.clone();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = stop_rx.await;
            };
            ap_dhcp::server::run_dhcp_server(state, shutdown).await
        })
    };

    // ── SIGHUP: dump the lease table ───────────────────────────────────
    {
        let state = dhcp_state.clone();
        tokio::spawn(async move {
            if let Err(e) = sighup_handler(state).await {
                error!("SIGHUP handler error: {}", e);
            }
        });
    }

    let result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
            let _ = stop_tx.send(());
            server.await
        }
        finished = &mut server => finished,
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("DHCP server failed: {e:#}"),
        Err(join_error) => error!("DHCP server task panicked: {join_error}"),
    }

    info!("apgate stopped");
    Ok(())
}

async fn sighup_handler(state: SharedDhcpState) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGHUP])?;

    while let Some(signal) = signals.next().await {
        if signal == SIGHUP {
            let state = state.read().await;
            let leases = state
                .leases
                .active_leases(state.config.server_address, state.now_ms());
            info!(
                "Received SIGHUP, {} of {} leases active",
                leases.len(),
                state.leases.capacity()
            );
            for lease in leases {
                info!("  {} -> {} ({}s left)", lease.mac, lease.ip, lease.remaining_secs);
            }
        }
    }

    Ok(())
}
