use std::fmt;
use std::net::Ipv4Addr;

use super::{HeaderError, Protocol, IPV4_HEADER_LEN};

mod field {
    use std::ops::Range;

    pub const VER_IHL: usize = 0;
    pub const TOTAL_LEN: Range<usize> = 2..4;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Range<usize> = 10..12;
    pub const SRC: Range<usize> = 12..16;
    pub const DST: Range<usize> = 16..20;
}

/// IPv4 header view.
#[derive(Debug, Clone)]
pub struct Ipv4Header<T> {
    buffer: T,
    dirty: bool,
}

impl<T: AsRef<[u8]>> Ipv4Header<T> {
    /// Wrap `buffer`, checking it holds the 20-byte fixed header. The IHL
    /// field is reported as-is by [`header_len`](Self::header_len); options
    /// are not walked.
    pub fn new_checked(buffer: T) -> Result<Self, HeaderError> {
        let len = buffer.as_ref().len();
        if len < IPV4_HEADER_LEN {
            return Err(HeaderError::Truncated {
                len,
                need: IPV4_HEADER_LEN,
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
        self.bytes()[field::VER_IHL] >> 4
    }

    /// Header length in bytes, from the IHL field.
    pub fn header_len(&self) -> u8 {
        (self.bytes()[field::VER_IHL] & 0x0f) * 4
    }

    pub fn next_header(&self) -> u8 {
        self.bytes()[field::PROTOCOL]
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_u8(self.next_header())
    }

    pub fn total_len(&self) -> u16 {
        self.u16_at(field::TOTAL_LEN.start)
    }

    pub fn ttl(&self) -> u8 {
        self.bytes()[field::TTL]
    }

    pub fn checksum(&self) -> u16 {
        self.u16_at(field::CHECKSUM.start)
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        self.ip_at(field::SRC.start)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        self.ip_at(field::DST.start)
    }

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

    fn u16_at(&self, off: usize) -> u16 {
        let b = self.bytes();
        u16::from_be_bytes([b[off], b[off + 1]])
    }

    fn ip_at(&self, off: usize) -> Ipv4Addr {
        let b = self.bytes();
        Ipv4Addr::new(b[off], b[off + 1], b[off + 2], b[off + 3])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Header<T> {
    /// Writes through this slice do not mark the view dirty.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    pub fn set_src_ip(&mut self, ip: Ipv4Addr) {
        self.buffer.as_mut()[field::SRC].copy_from_slice(&ip.octets());
        self.dirty = true;
    }

    pub fn set_dst_ip(&mut self, ip: Ipv4Addr) {
        self.buffer.as_mut()[field::DST].copy_from_slice(&ip.octets());
        self.dirty = true;
    }

    /// The header checksum covers the TTL, so this marks the view dirty too.
    pub fn set_ttl(&mut self, ttl: u8) {
        self.buffer.as_mut()[field::TTL] = ttl;
        self.dirty = true;
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Ipv4Header<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv4 Header {{ version={}, header_len={}, total_len={}, ttl={}, protocol={}, checksum={:#06x}, src={}, dst={} }}",
            self.version(),
            self.header_len(),
            self.total_len(),
            self.ttl(),
            self.protocol(),
            self.checksum(),
            self.src_ip(),
            self.dst_ip(),
        )
    }
}
