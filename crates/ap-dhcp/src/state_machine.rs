use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;
use tracing::{debug, info};

use crate::DhcpState;
use crate::lease_table::NO_HARDWARE_ADDRESS;
use crate::options::*;
use crate::packet::{BOOTREQUEST, DhcpPacket, DhcpParseError, format_mac};

/// Why a datagram got no reply. None of these are fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Dropped {
    #[error("malformed message: {0}")]
    Malformed(#[from] DhcpParseError),
    #[error("not a BOOTREQUEST (op={0})")]
    NotARequest(u8),
    #[error("missing or invalid message type option")]
    MissingMessageType,
    #[error("all-zero client hardware address")]
    NoHardwareAddress,
    #[error("lease pool exhausted")]
    PoolExhausted,
    #[error("unsupported message type {0}")]
    Unsupported(u8),
}

/// A reply ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpResponse {
    /// DHCPOFFER or DHCPACK.
    pub msg_type: u8,
    pub yiaddr: Ipv4Addr,
    pub destination: SocketAddrV4,
    pub payload: Vec<u8>,
}

/// Decode a raw datagram and run it through the state machine.
pub fn handle_datagram(
    data: &[u8],
    state: &mut DhcpState,
    now_ms: u64,
) -> Result<DhcpResponse, Dropped> {
    let packet = DhcpPacket::parse(data)?;
    handle_dhcp_packet(&packet, state, now_ms)
}

/// Handle a decoded DHCP packet and produce a response (if any).
pub fn handle_dhcp_packet(
    packet: &DhcpPacket,
    state: &mut DhcpState,
    now_ms: u64,
) -> Result<DhcpResponse, Dropped> {
    if packet.op != BOOTREQUEST {
        return Err(Dropped::NotARequest(packet.op));
    }

    let msg_type = packet.msg_type().ok_or(Dropped::MissingMessageType)?;

    // A zero MAC is the free-slot marker and cannot hold a lease
    if matches!(msg_type, DHCPDISCOVER | DHCPREQUEST)
        && packet.hardware_address() == NO_HARDWARE_ADDRESS
    {
        return Err(Dropped::NoHardwareAddress);
    }

    match msg_type {
        DHCPDISCOVER => handle_discover(packet, state, now_ms),
        DHCPREQUEST => handle_request(packet, state, now_ms),
        other => {
            debug!("Ignoring {} from {}", msg_type_name(other), packet.mac_str());
            Err(Dropped::Unsupported(other))
        }
    }
}

fn handle_discover(
    packet: &DhcpPacket,
    state: &mut DhcpState,
    now_ms: u64,
) -> Result<DhcpResponse, Dropped> {
    let mac = packet.hardware_address();
    info!("DHCPDISCOVER from {}", format_mac(&mac));

    let index = match state.leases.find_by_hardware_address(&mac) {
        Some(index) => index,
        None => {
            for freed in state.leases.purge_expired(now_ms) {
                info!(
                    "Lease on {} expired, slot reclaimed",
                    state.leases.address_of(state.config.server_address, freed)
                );
            }
            state
                .leases
                .find_free_or_expired_slot(now_ms)
                .ok_or(Dropped::PoolExhausted)?
        }
    };

    let offered_ip = state.leases.address_of(state.config.server_address, index);
    info!("DHCPOFFER {} to {}", offered_ip, format_mac(&mac));

    Ok(build_response(packet, state, DHCPOFFER, offered_ip))
}

fn handle_request(
    packet: &DhcpPacket,
    state: &mut DhcpState,
    now_ms: u64,
) -> Result<DhcpResponse, Dropped> {
    let mac = packet.hardware_address();

    // Option 50 is reported but never honoured: addresses follow the pool slot
    // bound to the hardware address.
    match packet.requested_ip() {
        Some(requested) => info!("DHCPREQUEST from {} (asked for {})", format_mac(&mac), requested),
        None => info!("DHCPREQUEST from {}", format_mac(&mac)),
    }

    let index = state
        .leases
        .find_by_hardware_address(&mac)
        .or_else(|| state.leases.find_free_or_expired_slot(now_ms))
        .ok_or(Dropped::PoolExhausted)?;

    state.leases.allocate(index, mac);
    state.leases.renew(index, now_ms, state.config.lease_time_ms());

    let assigned_ip = state.leases.address_of(state.config.server_address, index);
    info!("DHCPACK {} to {}", assigned_ip, format_mac(&mac));

    Ok(build_response(packet, state, DHCPACK, assigned_ip))
}

fn build_response(
    packet: &DhcpPacket,
    state: &DhcpState,
    msg_type: u8,
    yiaddr: Ipv4Addr,
) -> DhcpResponse {
    let config = &state.config;
    let server_ip = config.server_address;

    let mut reply = packet.begin_reply(server_ip);
    reply.yiaddr(yiaddr);
    reply
        .options()
        .write_u8(OPT_MSG_TYPE, msg_type)
        .write_ipv4(OPT_SERVER_ID, server_ip)
        .write_ipv4(OPT_SUBNET_MASK, config.netmask)
        .write_ipv4(OPT_ROUTER, server_ip)
        .write_ipv4(OPT_DNS_SERVER, server_ip)
        .write_u32(OPT_LEASE_TIME, config.lease_time_secs as u32);

    DhcpResponse {
        msg_type,
        yiaddr,
        destination: reply_destination(packet, msg_type, yiaddr, config.client_port),
        payload: reply.finalize(),
    }
}

/// Where a reply goes (RFC 2131 §4.1).
///
/// An ACK to a client with no address that did not ask for broadcast is
/// unicast to the assigned address. Everything else is broadcast.
pub fn reply_destination(
    packet: &DhcpPacket,
    msg_type: u8,
    yiaddr: Ipv4Addr,
    client_port: u16,
) -> SocketAddrV4 {
    let unicast = msg_type == DHCPACK
        && !packet.is_broadcast()
        && packet.ciaddr == Ipv4Addr::UNSPECIFIED;

    if unicast {
        SocketAddrV4::new(yiaddr, client_port)
    } else {
        SocketAddrV4::new(Ipv4Addr::BROADCAST, client_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DhcpConfig;
    use crate::packet::{FLAG_BROADCAST, MAGIC_COOKIE};

    const MAC_A: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01];

    fn make_request(mac: [u8; 6], msg_type: u8, flags: u16, ciaddr: Ipv4Addr) -> Vec<u8> {
        let mut pkt = vec![0u8; 300];
        pkt[0] = BOOTREQUEST;
        pkt[1] = 1;
        pkt[2] = 6;
        pkt[4..8].copy_from_slice(&0xCAFEBABEu32.to_be_bytes());
        pkt[10..12].copy_from_slice(&flags.to_be_bytes());
        pkt[12..16].copy_from_slice(&ciaddr.octets());
        pkt[28..34].copy_from_slice(&mac);
        pkt[236..240].copy_from_slice(&MAGIC_COOKIE);
        pkt[240..244].copy_from_slice(&[OPT_MSG_TYPE, 1, msg_type, OPT_END]);
        pkt
    }

    fn state() -> DhcpState {
        DhcpState::new(DhcpConfig::default())
    }

    #[test]
    fn test_discover_offers_first_slot() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPDISCOVER, FLAG_BROADCAST, Ipv4Addr::UNSPECIFIED);
        let resp = handle_datagram(&data, &mut state, 0).unwrap();

        assert_eq!(resp.msg_type, DHCPOFFER);
        assert_eq!(resp.yiaddr, Ipv4Addr::new(192, 168, 4, 16));
        assert_eq!(resp.destination, SocketAddrV4::new(Ipv4Addr::BROADCAST, 68));
        // DISCOVER alone does not bind the slot
        assert_eq!(state.leases.find_by_hardware_address(&MAC_A), None);
    }

    #[test]
    fn test_reply_options_order() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPDISCOVER, 0, Ipv4Addr::UNSPECIFIED);
        let resp = handle_datagram(&data, &mut state, 0).unwrap();

        let options = &resp.payload[240..];
        let expected: Vec<u8> = [
            &[OPT_MSG_TYPE, 1, DHCPOFFER][..],
            &[OPT_SERVER_ID, 4, 192, 168, 4, 1],
            &[OPT_SUBNET_MASK, 4, 255, 255, 255, 0],
            &[OPT_ROUTER, 4, 192, 168, 4, 1],
            &[OPT_DNS_SERVER, 4, 192, 168, 4, 1],
            &[OPT_LEASE_TIME, 4, 0x00, 0x01, 0x51, 0x80],
            &[OPT_END],
        ]
        .concat();
        assert_eq!(options, &expected[..]);
    }

    #[test]
    fn test_request_binds_and_acks() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPREQUEST, FLAG_BROADCAST, Ipv4Addr::UNSPECIFIED);
        let resp = handle_datagram(&data, &mut state, 1_000).unwrap();

        assert_eq!(resp.msg_type, DHCPACK);
        assert_eq!(resp.yiaddr, Ipv4Addr::new(192, 168, 4, 16));
        assert_eq!(state.leases.find_by_hardware_address(&MAC_A), Some(0));
        assert_eq!(state.leases.get(0).unwrap().expires_at_ms, 1_000 + 86_400_000);
    }

    #[test]
    fn test_ack_unicast_without_broadcast_flag() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPREQUEST, 0, Ipv4Addr::UNSPECIFIED);
        let resp = handle_datagram(&data, &mut state, 0).unwrap();
        assert_eq!(
            resp.destination,
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 16), 68)
        );
    }

    #[test]
    fn test_ack_broadcast_when_client_has_address() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPREQUEST, 0, Ipv4Addr::new(192, 168, 4, 16));
        let resp = handle_datagram(&data, &mut state, 0).unwrap();
        assert_eq!(resp.destination, SocketAddrV4::new(Ipv4Addr::BROADCAST, 68));
    }

    #[test]
    fn test_offer_always_broadcast() {
        let mut state = state();
        let data = make_request(MAC_A, DHCPDISCOVER, 0, Ipv4Addr::UNSPECIFIED);
        let resp = handle_datagram(&data, &mut state, 0).unwrap();
        assert_eq!(resp.destination, SocketAddrV4::new(Ipv4Addr::BROADCAST, 68));
    }

    #[test]
    fn test_unsupported_types_dropped() {
        let mut state = state();
        for msg_type in [DHCPDECLINE, DHCPRELEASE, DHCPINFORM, DHCPOFFER, DHCPACK] {
            let data = make_request(MAC_A, msg_type, 0, Ipv4Addr::UNSPECIFIED);
            assert_eq!(
                handle_datagram(&data, &mut state, 0),
                Err(Dropped::Unsupported(msg_type))
            );
        }
    }

    #[test]
    fn test_missing_message_type_dropped() {
        let mut state = state();
        let mut data = make_request(MAC_A, DHCPDISCOVER, 0, Ipv4Addr::UNSPECIFIED);
        data[240] = OPT_END;
        assert_eq!(
            handle_datagram(&data, &mut state, 0),
            Err(Dropped::MissingMessageType)
        );
    }

    #[test]
    fn test_zero_hardware_address_dropped() {
        let mut state = state();
        for msg_type in [DHCPDISCOVER, DHCPREQUEST] {
            let data = make_request([0; 6], msg_type, FLAG_BROADCAST, Ipv4Addr::UNSPECIFIED);
            assert_eq!(
                handle_datagram(&data, &mut state, 0),
                Err(Dropped::NoHardwareAddress)
            );
        }
        assert_eq!(state.leases.find_free_or_expired_slot(0), Some(0));
    }

    #[test]
    fn test_bootreply_dropped() {
        let mut state = state();
        let mut data = make_request(MAC_A, DHCPDISCOVER, 0, Ipv4Addr::UNSPECIFIED);
        data[0] = 2;
        assert_eq!(handle_datagram(&data, &mut state, 0), Err(Dropped::NotARequest(2)));
    }

    #[test]
    fn test_requested_ip_ignored() {
        let mut state = state();
        let mut data = make_request(MAC_A, DHCPREQUEST, FLAG_BROADCAST, Ipv4Addr::UNSPECIFIED);
        data[242 + 1..242 + 7].copy_from_slice(&[OPT_REQUESTED_IP, 4, 192, 168, 4, 20]);
        data[249] = OPT_END;
        let resp = handle_datagram(&data, &mut state, 0).unwrap();
        assert_eq!(resp.yiaddr, Ipv4Addr::new(192, 168, 4, 16));
    }
}
