use std::net::Ipv4Addr;

/// DHCP option codes (RFC 2132)
pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_END: u8 = 255;

/// DHCP message types
pub const DHCPDISCOVER: u8 = 1;
pub const DHCPOFFER: u8 = 2;
pub const DHCPREQUEST: u8 = 3;
pub const DHCPDECLINE: u8 = 4;
pub const DHCPACK: u8 = 5;
pub const DHCPNAK: u8 = 6;
pub const DHCPRELEASE: u8 = 7;
pub const DHCPINFORM: u8 = 8;

/// Size of the options area after the magic cookie.
pub const MAX_OPTIONS_LEN: usize = 308;

/// Human-readable name of a DHCP message type, for logs.
pub fn msg_type_name(msg_type: u8) -> &'static str {
    match msg_type {
        DHCPDISCOVER => "DHCPDISCOVER",
        DHCPOFFER => "DHCPOFFER",
        DHCPREQUEST => "DHCPREQUEST",
        DHCPDECLINE => "DHCPDECLINE",
        DHCPACK => "DHCPACK",
        DHCPNAK => "DHCPNAK",
        DHCPRELEASE => "DHCPRELEASE",
        DHCPINFORM => "DHCPINFORM",
        _ => "UNKNOWN",
    }
}

/// A borrowed `(tag, len, value)` record inside an options area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawOption<'a> {
    bytes: &'a [u8],
}

impl<'a> RawOption<'a> {
    pub fn code(&self) -> u8 {
        self.bytes[0]
    }

    /// The length byte as carried on the wire.
    pub fn len(&self) -> usize {
        self.bytes[1] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &'a [u8] {
        &self.bytes[2..]
    }

    /// The full record, tag and length included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Extract IPv4 address from option data
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        let octets: [u8; 4] = self.data().try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    /// Extract u32 from option data
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.data().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Extract u8 from option data, only if the option is exactly one byte long
    pub fn as_u8(&self) -> Option<u8> {
        match self.data() {
            [b] => Some(*b),
            _ => None,
        }
    }
}

/// Find an option by code in the options area (after the magic cookie).
///
/// PAD advances one byte, END stops the scan. The scan never looks past
/// `MAX_OPTIONS_LEN` bytes; a record that would run past that bound or past
/// the end of `data` is treated as absent.
pub fn find_option(data: &[u8], code: u8) -> Option<RawOption<'_>> {
    let area = &data[..data.len().min(MAX_OPTIONS_LEN)];
    let mut i = 0;

    while i < area.len() {
        let tag = area[i];
        if tag == OPT_END {
            return None;
        }
        if tag == OPT_PAD {
            i += 1;
            continue;
        }

        let len = *area.get(i + 1)? as usize;
        let end = i + 2 + len;
        if end > area.len() {
            return None;
        }

        if tag == code {
            return Some(RawOption { bytes: &area[i..end] });
        }
        i = end;
    }

    None
}

/// Appends TLV records to an options area.
///
/// The writer grows its buffer, so the caller never has to size it; the
/// position after the last write is `buf.len()`.
pub struct OptionWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Write `code`, `data.len()` and `data`. Option values longer than 255
    /// bytes cannot be represented and are truncated.
    pub fn write(&mut self, code: u8, data: &[u8]) -> &mut Self {
        let data = &data[..data.len().min(u8::MAX as usize)];
        self.buf.push(code);
        self.buf.push(data.len() as u8);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn write_u8(&mut self, code: u8, value: u8) -> &mut Self {
        self.write(code, &[value])
    }

    /// Write a 32-bit value in network byte order.
    pub fn write_u32(&mut self, code: u8, value: u32) -> &mut Self {
        self.write(code, &value.to_be_bytes())
    }

    pub fn write_ipv4(&mut self, code: u8, ip: Ipv4Addr) -> &mut Self {
        self.write(code, &ip.octets())
    }

    /// Bytes written so far, END excluded.
    pub fn position(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_skips_pad() {
        let data = [OPT_PAD, OPT_PAD, OPT_MSG_TYPE, 1, DHCPDISCOVER, OPT_END];
        let opt = find_option(&data, OPT_MSG_TYPE).unwrap();
        assert_eq!(opt.code(), OPT_MSG_TYPE);
        assert_eq!(opt.as_bytes(), &[OPT_MSG_TYPE, 1, DHCPDISCOVER]);
        assert_eq!(opt.as_u8(), Some(DHCPDISCOVER));
    }

    #[test]
    fn test_find_stops_at_end() {
        let data = [OPT_MSG_TYPE, 1, DHCPREQUEST, OPT_END, OPT_SERVER_ID, 4, 10, 0, 0, 1];
        assert!(find_option(&data, OPT_SERVER_ID).is_none());
    }

    #[test]
    fn test_find_absent() {
        let data = [OPT_MSG_TYPE, 1, DHCPREQUEST, OPT_END];
        assert!(find_option(&data, OPT_REQUESTED_IP).is_none());
        assert!(find_option(&[], OPT_MSG_TYPE).is_none());
    }

    #[test]
    fn test_find_truncated_option() {
        // Claims 4 bytes of value but only 2 follow
        let data = [OPT_REQUESTED_IP, 4, 192, 168];
        assert!(find_option(&data, OPT_REQUESTED_IP).is_none());
        // Tag with no length byte
        assert!(find_option(&[OPT_REQUESTED_IP], OPT_REQUESTED_IP).is_none());
    }

    #[test]
    fn test_find_respects_bound() {
        // Option starting inside the bound but ending past it
        let mut data = vec![OPT_PAD; MAX_OPTIONS_LEN - 3];
        data.extend_from_slice(&[OPT_SERVER_ID, 4, 10, 0, 0, 1, OPT_END]);
        assert!(find_option(&data, OPT_SERVER_ID).is_none());

        // Same option shifted to fit exactly
        let mut data = vec![OPT_PAD; MAX_OPTIONS_LEN - 6];
        data.extend_from_slice(&[OPT_SERVER_ID, 4, 10, 0, 0, 1]);
        let opt = find_option(&data, OPT_SERVER_ID).unwrap();
        assert_eq!(opt.as_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_write_and_find() {
        let mut buf = Vec::new();
        let mut writer = OptionWriter::new(&mut buf);
        writer
            .write_u8(OPT_MSG_TYPE, DHCPOFFER)
            .write_ipv4(OPT_SERVER_ID, Ipv4Addr::new(192, 168, 4, 1))
            .write_u32(OPT_LEASE_TIME, 86400);
        assert_eq!(writer.position(), 3 + 6 + 6);
        buf.push(OPT_END);

        assert_eq!(find_option(&buf, OPT_MSG_TYPE).unwrap().as_u8(), Some(DHCPOFFER));
        assert_eq!(
            find_option(&buf, OPT_SERVER_ID).unwrap().as_ipv4(),
            Some(Ipv4Addr::new(192, 168, 4, 1))
        );
        let lease = find_option(&buf, OPT_LEASE_TIME).unwrap();
        assert_eq!(lease.data(), &[0x00, 0x01, 0x51, 0x80]);
        assert_eq!(lease.as_u32(), Some(86400));
    }

    #[test]
    fn test_as_u8_requires_single_byte() {
        let data = [OPT_MSG_TYPE, 2, DHCPDISCOVER, 0, OPT_END];
        let opt = find_option(&data, OPT_MSG_TYPE).unwrap();
        assert_eq!(opt.len(), 2);
        assert_eq!(opt.as_u8(), None);
    }
}
