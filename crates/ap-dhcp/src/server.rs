use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::SharedDhcpState;
use crate::state_machine;

const RECV_BACKOFF_BASE: Duration = Duration::from_millis(10);
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `errors` consecutive receive failures: doubles from 10ms,
/// capped at 1s.
fn recv_backoff(errors: u32) -> Duration {
    let shift = errors.saturating_sub(1).min(16);
    RECV_BACKOFF_BASE
        .saturating_mul(1u32 << shift)
        .min(RECV_BACKOFF_MAX)
}

/// Run the DHCP server until `shutdown` resolves.
///
/// Uses a UDP socket with SO_BROADCAST for broadcast replies. The socket is
/// dropped on return, which releases the port binding.
pub async fn run_dhcp_server(
    state: SharedDhcpState,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let config = state.read().await.config.clone();

    if !config.enabled {
        info!("DHCP server disabled");
        return Ok(());
    }

    config.validate().context("Invalid DHCP configuration")?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.listen_port));
    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind DHCP socket to {}", addr))?;

    // Replies leave through the interface requests arrive on
    #[cfg(target_os = "linux")]
    if !config.interface.is_empty() {
        socket
            .bind_device(Some(config.interface.as_bytes()))
            .with_context(|| format!("Failed to bind DHCP socket to {}", config.interface))?;
        info!("DHCP bound to interface {}", config.interface);
    }

    socket.set_nonblocking(true)?;
    let socket = tokio::net::UdpSocket::from_std(socket.into())?;

    let (first, last) = config.pool_range();
    info!(
        "DHCP server listening on {} (server {}, netmask {}, pool {} - {})",
        addr, config.server_address, config.netmask, first, last
    );

    tokio::pin!(shutdown);
    let mut buf = [0u8; 1500];
    let mut recv_errors: u32 = 0;

    loop {
        let (len, src) = tokio::select! {
            _ = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => {
                    recv_errors = 0;
                    r
                }
                Err(e) => {
                    recv_errors = recv_errors.saturating_add(1);
                    let pause = recv_backoff(recv_errors);
                    warn!("DHCP recv error ({} in a row, retrying in {:?}): {}", recv_errors, pause, e);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                    continue;
                }
            },
        };

        let response = {
            let mut state = state.write().await;
            let now_ms = state.now_ms();
            state_machine::handle_datagram(&buf[..len], &mut state, now_ms)
        };

        let response = match response {
            Ok(r) => r,
            Err(dropped) => {
                debug!("Dropped DHCP datagram from {}: {}", src, dropped);
                continue;
            }
        };

        if let Err(e) = socket.send_to(&response.payload, response.destination).await {
            warn!("Failed to send DHCP response to {}: {}", response.destination, e);
        }
    }

    info!("DHCP server stopped, released {}", addr);
    Ok(())
}
