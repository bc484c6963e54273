//! DHCPv4 packet parser and reply builder (RFC 2131 wire format)

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::options::{
    self, OptionWriter, RawOption, MAX_OPTIONS_LEN, OPT_END, OPT_MSG_TYPE, OPT_REQUESTED_IP,
};

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Size of the fixed BOOTP header, up to the magic cookie.
pub const HEADER_LEN: usize = 236;

/// Offset of the first option, right after the magic cookie.
pub const OPTIONS_OFFSET: usize = HEADER_LEN + MAGIC_COOKIE.len();

/// Largest message this server reads or writes.
pub const MAX_MESSAGE_LEN: usize = OPTIONS_OFFSET + MAX_OPTIONS_LEN;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Broadcast bit of the `flags` field.
pub const FLAG_BROADCAST: u16 = 0x8000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DhcpParseError {
    #[error("Packet too short: {0} bytes (minimum 240)")]
    TooShort(usize),
    #[error("Invalid magic cookie")]
    InvalidMagic,
}

/// Parsed DHCPv4 packet
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    /// Raw options area after the magic cookie, at most `MAX_OPTIONS_LEN` bytes.
    pub options: Vec<u8>,
}

impl DhcpPacket {
    /// Parse a DHCP packet from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, DhcpParseError> {
        if data.len() < OPTIONS_OFFSET {
            return Err(DhcpParseError::TooShort(data.len()));
        }

        if data[HEADER_LEN..OPTIONS_OFFSET] != MAGIC_COOKIE {
            return Err(DhcpParseError::InvalidMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let end = data.len().min(MAX_MESSAGE_LEN);

        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options: data[OPTIONS_OFFSET..end].to_vec(),
        })
    }

    /// Ethernet hardware address: the first 6 bytes of `chaddr`.
    pub fn hardware_address(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.chaddr[..6]);
        mac
    }

    /// Get MAC address as a formatted string (aa:bb:cc:dd:ee:ff)
    pub fn mac_str(&self) -> String {
        format_mac(&self.hardware_address())
    }

    /// Find option by code
    pub fn get_option(&self, code: u8) -> Option<RawOption<'_>> {
        options::find_option(&self.options, code)
    }

    /// Get DHCP message type. Absent unless option 53 exists with length 1.
    pub fn msg_type(&self) -> Option<u8> {
        self.get_option(OPT_MSG_TYPE)?.as_u8()
    }

    /// Get requested IP address
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_REQUESTED_IP)?.as_ipv4()
    }

    /// Check if broadcast flag is set
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// Start a reply to this request.
    ///
    /// `xid`, `flags`, `chaddr`, `ciaddr` and `giaddr` are echoed; `op` becomes
    /// BOOTREPLY and `siaddr` is the server's own address. Options start empty.
    pub fn begin_reply(&self, server_ip: Ipv4Addr) -> ReplyBuilder {
        ReplyBuilder {
            htype: self.htype,
            hlen: self.hlen,
            xid: self.xid,
            flags: self.flags,
            ciaddr: self.ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: server_ip,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            options: Vec::with_capacity(64),
        }
    }
}

/// A reply under construction.
#[derive(Debug, Clone)]
pub struct ReplyBuilder {
    htype: u8,
    hlen: u8,
    xid: u32,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: [u8; 16],
    options: Vec<u8>,
}

impl ReplyBuilder {
    /// Set the offered or assigned address.
    pub fn yiaddr(&mut self, ip: Ipv4Addr) -> &mut Self {
        self.yiaddr = ip;
        self
    }

    /// Writer positioned after the options already written.
    pub fn options(&mut self) -> OptionWriter<'_> {
        OptionWriter::new(&mut self.options)
    }

    /// Append END and serialize. The result is exactly
    /// `OPTIONS_OFFSET + options written + 1` bytes long.
    pub fn finalize(mut self) -> Vec<u8> {
        self.options.push(OPT_END);

        let mut buf = Vec::with_capacity(OPTIONS_OFFSET + self.options.len());
        buf.push(BOOTREPLY);
        buf.push(self.htype);
        buf.push(self.hlen);
        buf.push(0); // hops
        buf.extend_from_slice(&self.xid.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // secs
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.ciaddr.octets());
        buf.extend_from_slice(&self.yiaddr.octets());
        buf.extend_from_slice(&self.siaddr.octets());
        buf.extend_from_slice(&self.giaddr.octets());
        buf.extend_from_slice(&self.chaddr);
        buf.extend_from_slice(&[0u8; 64]); // sname
        buf.extend_from_slice(&[0u8; 128]); // file
        buf.extend_from_slice(&MAGIC_COOKIE);
        buf.extend_from_slice(&self.options);
        buf
    }
}

pub fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
