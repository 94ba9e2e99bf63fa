//! A captured event: raw bytes, the capture address, and a parsed header view
//! when the bytes are an IP packet.
//!
//! Flow, socket and reflect layers deliver events with no packet bytes; they
//! still arrive as a [`Packet`], with [`Packet::header`] returning `None`.

use std::fmt;
use std::net::IpAddr;

use crate::address::Address;
use crate::driver::Binding;
use crate::header::{HeaderError, IpHeader};
use crate::types::ChecksumFlags;

#[derive(Debug, Clone)]
enum Body {
    Ip(IpHeader<Vec<u8>>),
    /// Bytes that do not start with an IPv4 or IPv6 header.
    Raw { bytes: Vec<u8>, error: HeaderError },
}

/// Owns the event bytes, through the header view when there is one.
#[derive(Debug, Clone)]
pub struct Packet {
    addr: Address,
    body: Body,
}

impl Packet {
    /// Wrap `buffer`, parsing an IP header if it has one.
    pub fn new(buffer: Vec<u8>, addr: Address) -> Self {
        let body = match IpHeader::try_parse(buffer) {
            Ok(header) => Body::Ip(header),
            Err((error, bytes)) => Body::Raw { bytes, error },
        };
        Self { addr, body }
    }

    /// The full buffer, header and payload.
    pub fn raw(&self) -> &[u8] {
        match &self.body {
            Body::Ip(header) => header.as_bytes(),
            Body::Raw { bytes, .. } => bytes,
        }
    }

    pub fn addr(&self) -> &Address {
        &self.addr
    }

    pub fn addr_mut(&mut self) -> &mut Address {
        &mut self.addr
    }

    pub fn header(&self) -> Option<&IpHeader<Vec<u8>>> {
        match &self.body {
            Body::Ip(header) => Some(header),
            Body::Raw { .. } => None,
        }
    }

    pub fn header_mut(&mut self) -> Option<&mut IpHeader<Vec<u8>>> {
        match &mut self.body {
            Body::Ip(header) => Some(header),
            Body::Raw { .. } => None,
        }
    }

    /// Why the bytes have no header view.
    pub fn header_error(&self) -> Option<&HeaderError> {
        match &self.body {
            Body::Ip(_) => None,
            Body::Raw { error, .. } => Some(error),
        }
    }

    pub fn src_ip(&self) -> Option<IpAddr> {
        self.header().map(|h| h.src_ip())
    }

    pub fn set_src_ip(&mut self, ip: IpAddr) -> Result<(), HeaderError> {
        match &mut self.body {
            Body::Ip(header) => header.set_src_ip(ip),
            Body::Raw { error, .. } => Err(error.clone()),
        }
    }

    pub fn dst_ip(&self) -> Option<IpAddr> {
        self.header().map(|h| h.dst_ip())
    }

    pub fn set_dst_ip(&mut self, ip: IpAddr) -> Result<(), HeaderError> {
        match &mut self.body {
            Body::Ip(header) => header.set_dst_ip(ip),
            Body::Raw { error, .. } => Err(error.clone()),
        }
    }

    pub fn need_new_checksum(&self) -> bool {
        self.header().is_some_and(|h| h.need_new_checksum())
    }

    /// Recompute checksums in place. Clears the dirty flag on success.
    /// Always false for events without an IP header.
    pub fn calc_checksums(&mut self, binding: &Binding, flags: ChecksumFlags) -> bool {
        let header = match &mut self.body {
            Body::Ip(header) => header,
            Body::Raw { .. } => return false,
        };
        let ok = match &mut *header {
            IpHeader::V4(h) => binding.calc_checksums(h.as_bytes_mut(), Some(&self.addr), flags),
            IpHeader::V6(h) => binding.calc_checksums(h.as_bytes_mut(), Some(&self.addr), flags),
        };
        if ok {
            header.mark_checksummed();
        }
        ok
    }

    pub fn into_parts(self) -> (Vec<u8>, Address) {
        let bytes = match self.body {
            Body::Ip(header) => header.into_inner(),
            Body::Raw { bytes, .. } => bytes,
        };
        (bytes, self.addr)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packet {{")?;
        match &self.body {
            Body::Ip(header) => writeln!(f, "  {}", header)?,
            Body::Raw { error, .. } => writeln!(f, "  no IP header ({})", error)?,
        }
        writeln!(
            f,
            "  layer={}, event={}, outbound={}, len={}",
            self.addr
                .layer()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unknown".into()),
            self.addr
                .event()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".into()),
            self.addr.outbound(),
            self.raw().len()
        )?;
        write!(f, "}}")
    }
}
