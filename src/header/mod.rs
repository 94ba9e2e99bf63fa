//! IP header views over raw packet bytes.
//!
//! A view is generic over its buffer: `IpHeader<&[u8]>` reads a borrowed
//! slice, `IpHeader<&mut [u8]>` edits one in place, and `IpHeader<Vec<u8>>`
//! owns its bytes (this is what [`Packet`](crate::Packet) holds). Every
//! accessor does bounds-checked offset arithmetic on the buffer; the length
//! checks run once, in the constructor.
//!
//! Address mutators mark the view as needing new checksums. Call the
//! checksum helper (see [`Packet::calc_checksums`](crate::Packet::calc_checksums))
//! before handing the bytes back to the driver.

mod ipv4;
mod ipv6;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub use ipv4::Ipv4Header;
pub use ipv6::Ipv6Header;

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;

pub const IPV4: u8 = 4;
pub const IPV6: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("buffer too short: {len} bytes, need {need}")]
    Truncated { len: usize, need: usize },
    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),
    #[error("address family does not match the header")]
    AddressFamily,
    #[error("IPv6 headers have no checksum")]
    NoChecksum,
}

/// Transport protocol carried after the IP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Icmpv4,
    Tcp,
    Udp,
    Icmpv6,
    Other(u8),
}

impl Protocol {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Protocol::Icmpv4,
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            58 => Protocol::Icmpv6,
            other => Protocol::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Protocol::Icmpv4 => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Icmpv6 => 58,
            Protocol::Other(v) => v,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Icmpv4 => "ICMPv4",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmpv6 => "ICMPv6",
            Protocol::Other(_) => "Unimplemented Protocol",
        })
    }
}

/// IPv4 or IPv6 header view, chosen once at parse time.
#[derive(Debug, Clone)]
pub enum IpHeader<T> {
    V4(Ipv4Header<T>),
    V6(Ipv6Header<T>),
}

impl<T: AsRef<[u8]>> IpHeader<T> {
    /// Parse `buffer`, dispatching on the version nibble of the first byte.
    pub fn parse(buffer: T) -> Result<Self, HeaderError> {
        Self::try_parse(buffer).map_err(|(error, _)| error)
    }

    /// Like [`parse`](Self::parse), but hands the buffer back on failure.
    pub fn try_parse(buffer: T) -> Result<Self, (HeaderError, T)> {
        match check(buffer.as_ref()) {
            Ok(IPV4) => Ok(IpHeader::V4(Ipv4Header::new_unchecked(buffer))),
            Ok(_) => Ok(IpHeader::V6(Ipv6Header::new_unchecked(buffer))),
            Err(error) => Err((error, buffer)),
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.version(),
            IpHeader::V6(h) => h.version(),
        }
    }

    pub fn header_len(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.header_len(),
            IpHeader::V6(h) => h.header_len(),
        }
    }

    /// Protocol number (IPv4) or next header (IPv6).
    pub fn next_header(&self) -> u8 {
        match self {
            IpHeader::V4(h) => h.next_header(),
            IpHeader::V6(h) => h.next_header(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_u8(self.next_header())
    }

    pub fn src_ip(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.src_ip()),
            IpHeader::V6(h) => IpAddr::V6(h.src_ip()),
        }
    }

    pub fn dst_ip(&self) -> IpAddr {
        match self {
            IpHeader::V4(h) => IpAddr::V4(h.dst_ip()),
            IpHeader::V6(h) => IpAddr::V6(h.dst_ip()),
        }
    }

    /// IPv4 header checksum field. IPv6 has none.
    pub fn checksum(&self) -> Result<u16, HeaderError> {
        match self {
            IpHeader::V4(h) => Ok(h.checksum()),
            IpHeader::V6(_) => Err(HeaderError::NoChecksum),
        }
    }

    /// True once a mutator touched a checksummed field since parse.
    pub fn need_new_checksum(&self) -> bool {
        match self {
            IpHeader::V4(h) => h.need_new_checksum(),
            IpHeader::V6(h) => h.need_new_checksum(),
        }
    }

    /// Clear the checksum flag after checksums were recomputed.
    pub fn mark_checksummed(&mut self) {
        match self {
            IpHeader::V4(h) => h.mark_checksummed(),
            IpHeader::V6(h) => h.mark_checksummed(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IpHeader::V4(h) => h.as_bytes(),
            IpHeader::V6(h) => h.as_bytes(),
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            IpHeader::V4(h) => h.into_inner(),
            IpHeader::V6(h) => h.into_inner(),
        }
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IpHeader<T> {
    pub fn set_src_ip(&mut self, ip: IpAddr) -> Result<(), HeaderError> {
        match self {
            IpHeader::V4(h) => h.set_src_ip(to_ipv4(ip)?),
            IpHeader::V6(h) => h.set_src_ip(to_ipv6(ip)),
        }
        Ok(())
    }

    pub fn set_dst_ip(&mut self, ip: IpAddr) -> Result<(), HeaderError> {
        match self {
            IpHeader::V4(h) => h.set_dst_ip(to_ipv4(ip)?),
            IpHeader::V6(h) => h.set_dst_ip(to_ipv6(ip)),
        }
        Ok(())
    }
}

impl<T: AsRef<[u8]>> fmt::Display for IpHeader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpHeader::V4(h) => fmt::Display::fmt(h, f),
            IpHeader::V6(h) => fmt::Display::fmt(h, f),
        }
    }
}

/// Version of the fixed header at the start of `bytes`, if it is all there.
fn check(bytes: &[u8]) -> Result<u8, HeaderError> {
    let first = *bytes.first().ok_or(HeaderError::Truncated { len: 0, need: 1 })?;
    let (version, need) = match first >> 4 {
        IPV4 => (IPV4, IPV4_HEADER_LEN),
        IPV6 => (IPV6, IPV6_HEADER_LEN),
        other => return Err(HeaderError::UnsupportedVersion(other)),
    };
    if bytes.len() < need {
        return Err(HeaderError::Truncated {
            len: bytes.len(),
            need,
        });
    }
    Ok(version)
}

/// IPv4-mapped IPv6 addresses are accepted by IPv4 headers.
fn to_ipv4(ip: IpAddr) -> Result<Ipv4Addr, HeaderError> {
    match ip {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().ok_or(HeaderError::AddressFamily),
    }
}

fn to_ipv6(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 192.168.0.1 -> 192.168.0.199, UDP, checksum 0xb861.
    pub(crate) const IPV4_UDP: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
        0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    /// fe80::1 -> ff02::1, ICMPv6, hop limit 255, no payload.
    pub(crate) fn ipv6_icmp() -> Vec<u8> {
        let mut buf = vec![0u8; IPV6_HEADER_LEN];
        buf[0] = 0x60;
        buf[6] = 58;
        buf[7] = 255;
        buf[8..24].copy_from_slice(&"fe80::1".parse::<Ipv6Addr>().unwrap().octets());
        buf[24..40].copy_from_slice(&"ff02::1".parse::<Ipv6Addr>().unwrap().octets());
        buf
    }

    #[test]
    fn test_parse_dispatches_on_version() {
        let v4 = IpHeader::parse(&IPV4_UDP[..]).unwrap();
        assert!(matches!(v4, IpHeader::V4(_)));
        assert_eq!(v4.version(), 4);
        assert_eq!(v4.header_len(), 20);

        let bytes = ipv6_icmp();
        let v6 = IpHeader::parse(&bytes[..]).unwrap();
        assert!(matches!(v6, IpHeader::V6(_)));
        assert_eq!(v6.version(), 6);
        assert_eq!(v6.header_len(), 40);
        assert_eq!(v6.protocol(), Protocol::Icmpv6);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            IpHeader::parse(&[][..]).unwrap_err(),
            HeaderError::Truncated { len: 0, need: 1 }
        );
        assert_eq!(
            IpHeader::parse(&[0x00u8; 40][..]).unwrap_err(),
            HeaderError::UnsupportedVersion(0)
        );
        assert_eq!(
            IpHeader::parse(&IPV4_UDP[..12]).unwrap_err(),
            HeaderError::Truncated { len: 12, need: 20 }
        );
        assert_eq!(
            IpHeader::parse(&ipv6_icmp()[..39]).unwrap_err(),
            HeaderError::Truncated { len: 39, need: 40 }
        );
    }

    #[test]
    fn test_parse_ipv4_header_len_from_low_nibble() {
        let mut buf = IPV4_UDP;
        buf[0] = 0x46;
        let hdr = IpHeader::parse(&buf[..]).unwrap();
        assert!(matches!(hdr, IpHeader::V4(_)));
        assert_eq!(hdr.version(), 4);
        assert_eq!(hdr.header_len(), 24);
        assert_eq!(hdr.protocol(), Protocol::Udp);
    }

    #[test]
    fn test_checksum_only_for_ipv4() {
        let v4 = IpHeader::parse(&IPV4_UDP[..]).unwrap();
        assert_eq!(v4.checksum(), Ok(0xb861));

        let bytes = ipv6_icmp();
        let v6 = IpHeader::parse(&bytes[..]).unwrap();
        assert_eq!(v6.checksum(), Err(HeaderError::NoChecksum));
    }

    #[test]
    fn test_fresh_parse_needs_no_checksum() {
        let mut buf = IPV4_UDP;
        let hdr = IpHeader::parse(&mut buf[..]).unwrap();
        assert!(!hdr.need_new_checksum());
    }

    #[test]
    fn test_set_address_marks_checksum() {
        let mut buf = IPV4_UDP;
        let mut hdr = IpHeader::parse(&mut buf[..]).unwrap();
        hdr.set_dst_ip("10.0.0.9".parse().unwrap()).unwrap();
        assert!(hdr.need_new_checksum());
        assert_eq!(hdr.dst_ip(), "10.0.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(&buf[16..20], &[10, 0, 0, 9]);

        let mut bytes = ipv6_icmp();
        let mut hdr = IpHeader::parse(&mut bytes[..]).unwrap();
        hdr.set_src_ip("fe80::2".parse().unwrap()).unwrap();
        assert!(hdr.need_new_checksum());

        hdr.mark_checksummed();
        assert!(!hdr.need_new_checksum());
    }

    #[test]
    fn test_address_family_conversion() {
        let mut buf = IPV4_UDP;
        let mut hdr = IpHeader::parse(&mut buf[..]).unwrap();
        assert_eq!(
            hdr.set_src_ip("2001:db8::1".parse().unwrap()),
            Err(HeaderError::AddressFamily)
        );
        assert!(!hdr.need_new_checksum());
        assert_eq!(&hdr.as_bytes()[..], &IPV4_UDP[..]);

        hdr.set_src_ip("::ffff:10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(hdr.src_ip(), "10.1.2.3".parse::<IpAddr>().unwrap());

        let mut bytes = ipv6_icmp();
        let mut hdr = IpHeader::parse(&mut bytes[..]).unwrap();
        hdr.set_dst_ip("10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(hdr.dst_ip(), "::ffff:10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_round_trip_leaves_bytes_identical() {
        let mut buf = IPV4_UDP;
        let mut hdr = IpHeader::parse(&mut buf[..]).unwrap();
        let src = hdr.src_ip();
        hdr.set_src_ip(src).unwrap();
        assert_eq!(buf, IPV4_UDP);

        let original = ipv6_icmp();
        let mut bytes = original.clone();
        let mut hdr = IpHeader::parse(&mut bytes[..]).unwrap();
        let dst = hdr.dst_ip();
        hdr.set_dst_ip(dst).unwrap();
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::from_u8(6).to_string(), "TCP");
        assert_eq!(Protocol::from_u8(1).to_string(), "ICMPv4");
        assert_eq!(Protocol::from_u8(132).to_string(), "Unimplemented Protocol");
        assert_eq!(Protocol::Other(132).to_u8(), 132);
    }
}
