use std::fmt;
use std::net::Ipv6Addr;

use super::{HeaderError, Protocol, IPV6_HEADER_LEN};

mod field {
    use std::ops::Range;

    pub const VERSION: usize = 0;
    pub const PAYLOAD_LEN: Range<usize> = 4..6;
    pub const NEXT_HEADER: usize = 6;
    pub const HOP_LIMIT: usize = 7;
    pub const SRC: Range<usize> = 8..24;
    pub const DST: Range<usize> = 24..40;
}

/// IPv6 fixed header view. Extension headers are not walked.
#[derive(Debug, Clone)]
pub struct Ipv6Header<T> {
    buffer: T,
    dirty: bool,
}

impl<T: AsRef<[u8]>> Ipv6Header<T> {
    pub fn new_checked(buffer: T) -> Result<Self, HeaderError> {
        let len = buffer.as_ref().len();
        if len < IPV6_HEADER_LEN {
            return Err(HeaderError::Truncated {
                len,
                need: IPV6_HEADER_LEN,
            });
        }
        Ok(Self::new_unchecked(buffer))
    }

    pub(crate) fn new_unchecked(buffer: T) -> Self {
        Self {
            buffer,
            dirty: false,
        }
    }

    pub fn version(&self) -> u8 {
        self.bytes()[field::VERSION] >> 4
    }

    pub fn header_len(&self) -> u8 {
        IPV6_HEADER_LEN as u8
    }

    pub fn next_header(&self) -> u8 {
        self.bytes()[field::NEXT_HEADER]
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_u8(self.next_header())
    }

    pub fn payload_len(&self) -> u16 {
        let b = self.bytes();
        u16::from_be_bytes([b[field::PAYLOAD_LEN.start], b[field::PAYLOAD_LEN.start + 1]])
    }

    pub fn hop_limit(&self) -> u8 {
        self.bytes()[field::HOP_LIMIT]
    }

    pub fn src_ip(&self) -> Ipv6Addr {
        self.ip_at(field::SRC.start)
    }

    pub fn dst_ip(&self) -> Ipv6Addr {
        self.ip_at(field::DST.start)
    }

    /// Addresses feed the transport pseudo-header, so TCP/UDP/ICMPv6
    /// checksums go stale when they change.
    pub fn need_new_checksum(&self) -> bool {
        self.dirty
    }

    pub fn mark_checksummed(&mut self) {
        self.dirty = false;
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes()
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn bytes(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    fn ip_at(&self, off: usize) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes()[off..off + 16]);
        Ipv6Addr::from(octets)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv6Header<T> {
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    pub fn set_src_ip(&mut self, ip: Ipv6Addr) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&ip.octets());
        self.dirty = true;
    }

    pub fn set_dst_ip(&mut self, ip: Ipv6Addr) {
        self.buffer.as_mut()[field::DST].copy_from_slice(&ip.octets());
        self.dirty = true;
    }

    /// Not covered by any checksum; leaves the dirty flag alone.
    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.buffer.as_mut()[field::HOP_LIMIT] = hop_limit;
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Ipv6Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv6 Header {{ version={}, payload_len={}, next_header={}, hop_limit={}, src={}, dst={} }}",
            self.version(),
            self.payload_len(),
            self.protocol(),
            self.hop_limit(),
            self.src_ip(),
            self.dst_ip(),
        )
    }
}
