//! Capture address: the per-packet metadata the driver returns alongside raw
//! bytes and expects back verbatim on re-injection.
//!
//! The layout mirrors `WINDIVERT_ADDRESS` (80 bytes): a timestamp, one 32-bit
//! bitfield word, a reserved word and a 64-byte layer-specific union. The
//! union is kept as bytes and decoded on demand.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::{Event, Flags, Layer};

const UNION_LEN: usize = 64;

// Bit positions inside the bitfield word.
const BIT_SNIFFED: u32 = 16;
const BIT_OUTBOUND: u32 = 17;
const BIT_LOOPBACK: u32 = 18;
const BIT_IMPOSTOR: u32 = 19;
const BIT_IPV6: u32 = 20;
const BIT_IP_CHECKSUM: u32 = 21;
const BIT_TCP_CHECKSUM: u32 = 22;
const BIT_UDP_CHECKSUM: u32 = 23;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub timestamp: i64,
    bits: u32,
    reserved: u32,
    data: [u8; UNION_LEN],
}

/// Network and forward layer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkData {
    pub if_idx: u32,
    pub sub_if_idx: u32,
}

/// Flow and socket layer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowData {
    pub endpoint_id: u64,
    pub parent_endpoint_id: u64,
    pub process_id: u32,
    pub local_addr: IpAddr,
    pub remote_addr: IpAddr,
    pub local_port: u16,
    pub remote_port: u16,
    pub protocol: u8,
}

/// Reflect layer data: describes another handle being opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectData {
    pub timestamp: i64,
    pub process_id: u32,
    pub layer: Option<Layer>,
    pub flags: Flags,
    pub priority: i16,
}

impl Default for Address {
    fn default() -> Self {
        Self {
            timestamp: 0,
            bits: 0,
            reserved: 0,
            data: [0; UNION_LEN],
        }
    }
}

impl Address {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer that produced this address.
    pub fn layer(&self) -> Option<Layer> {
        Layer::from_u8((self.bits & 0xff) as u8)
    }

    pub fn set_layer(&mut self, layer: Layer) {
        self.bits = (self.bits & !0xff) | layer as u32;
    }

    pub fn event(&self) -> Option<Event> {
        Event::from_u8(((self.bits >> 8) & 0xff) as u8)
    }

    pub fn set_event(&mut self, event: Event) {
        self.bits = (self.bits & !0xff00) | ((event as u32) << 8);
    }

    pub fn sniffed(&self) -> bool {
        self.bit(BIT_SNIFFED)
    }

    pub fn outbound(&self) -> bool {
        self.bit(BIT_OUTBOUND)
    }

    pub fn set_outbound(&mut self, value: bool) {
        self.set_bit(BIT_OUTBOUND, value);
    }

    pub fn loopback(&self) -> bool {
        self.bit(BIT_LOOPBACK)
    }

    pub fn impostor(&self) -> bool {
        self.bit(BIT_IMPOSTOR)
    }

    pub fn set_impostor(&mut self, value: bool) {
        self.set_bit(BIT_IMPOSTOR, value);
    }

    pub fn ipv6(&self) -> bool {
        self.bit(BIT_IPV6)
    }

    pub fn set_ipv6(&mut self, value: bool) {
        self.set_bit(BIT_IPV6, value);
    }

    /// Whether the IP checksum is known to be valid.
    pub fn ip_checksum(&self) -> bool {
        self.bit(BIT_IP_CHECKSUM)
    }

    pub fn set_ip_checksum(&mut self, value: bool) {
        self.set_bit(BIT_IP_CHECKSUM, value);
    }

    pub fn tcp_checksum(&self) -> bool {
        self.bit(BIT_TCP_CHECKSUM)
    }

    pub fn set_tcp_checksum(&mut self, value: bool) {
        self.set_bit(BIT_TCP_CHECKSUM, value);
    }

    pub fn udp_checksum(&self) -> bool {
        self.bit(BIT_UDP_CHECKSUM)
    }

    pub fn set_udp_checksum(&mut self, value: bool) {
        self.set_bit(BIT_UDP_CHECKSUM, value);
    }

    /// Interface data, for network and forward layer addresses.
    pub fn network(&self) -> Option<NetworkData> {
        if !self.layer()?.carries_packets() {
            return None;
        }
        Some(NetworkData {
            if_idx: self.u32_at(0),
            sub_if_idx: self.u32_at(4),
        })
    }

    pub fn set_network(&mut self, net: NetworkData) {
        self.data[0..4].copy_from_slice(&net.if_idx.to_le_bytes());
        self.data[4..8].copy_from_slice(&net.sub_if_idx.to_le_bytes());
    }

    /// Endpoint data, for flow and socket layer addresses.
    pub fn flow(&self) -> Option<FlowData> {
        if !matches!(self.layer()?, Layer::Flow | Layer::Socket) {
            return None;
        }
        Some(FlowData {
            endpoint_id: self.u64_at(0),
            parent_endpoint_id: self.u64_at(8),
            process_id: self.u32_at(16),
            local_addr: self.ip_at(20),
            remote_addr: self.ip_at(36),
            local_port: u16::from_le_bytes([self.data[52], self.data[53]]),
            remote_port: u16::from_le_bytes([self.data[54], self.data[55]]),
            protocol: self.data[56],
        })
    }

    /// Reflected handle data, for reflect layer addresses.
    pub fn reflect(&self) -> Option<ReflectData> {
        if self.layer()? != Layer::Reflect {
            return None;
        }
        Some(ReflectData {
            timestamp: self.u64_at(0) as i64,
            process_id: self.u32_at(8),
            layer: u8::try_from(self.u32_at(12)).ok().and_then(Layer::from_u8),
            flags: Flags(self.u64_at(16)),
            priority: i16::from_le_bytes([self.data[24], self.data[25]]),
        })
    }

    fn bit(&self, pos: u32) -> bool {
        self.bits & (1 << pos) != 0
    }

    fn set_bit(&mut self, pos: u32, value: bool) {
        if value {
            self.bits |= 1 << pos;
        } else {
            self.bits &= !(1 << pos);
        }
    }

    fn u32_at(&self, off: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[off..off + 4]);
        u32::from_le_bytes(b)
    }

    fn u64_at(&self, off: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[off..off + 8]);
        u64::from_le_bytes(b)
    }

    // Addresses are four host-order words, least significant first; IPv4
    // addresses are stored IPv4-mapped.
    fn ip_at(&self, off: usize) -> IpAddr {
        let words = [
            self.u32_at(off),
            self.u32_at(off + 4),
            self.u32_at(off + 8),
            self.u32_at(off + 12),
        ];
        if !self.ipv6() {
            return IpAddr::V4(Ipv4Addr::from(words[0]));
        }
        let value = (u128::from(words[3]) << 96)
            | (u128::from(words[2]) << 64)
            | (u128::from(words[1]) << 32)
            | u128::from(words[0]);
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("timestamp", &self.timestamp)
            .field("layer", &self.layer())
            .field("event", &self.event())
            .field("sniffed", &self.sniffed())
            .field("outbound", &self.outbound())
            .field("loopback", &self.loopback())
            .field("impostor", &self.impostor())
            .field("ipv6", &self.ipv6())
            .field("network", &self.network())
            .field("flow", &self.flow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_layout() {
        assert_eq!(std::mem::size_of::<Address>(), 80);
        assert_eq!(std::mem::align_of::<Address>(), 8);
    }

    #[test]
    fn test_bitfield_accessors() {
        let mut addr = Address::new();
        addr.set_layer(Layer::NetworkForward);
        addr.set_event(Event::NetworkPacket);
        addr.set_outbound(true);
        addr.set_ipv6(true);
        assert_eq!(addr.layer(), Some(Layer::NetworkForward));
        assert_eq!(addr.event(), Some(Event::NetworkPacket));
        assert!(addr.outbound());
        assert!(addr.ipv6());
        assert!(!addr.loopback());

        addr.set_outbound(false);
        assert!(!addr.outbound());
        assert!(addr.ipv6());
    }

    #[test]
    fn test_network_data() {
        let mut addr = Address::new();
        addr.set_network(NetworkData { if_idx: 12, sub_if_idx: 3 });
        assert_eq!(
            addr.network(),
            Some(NetworkData { if_idx: 12, sub_if_idx: 3 })
        );
        assert_eq!(addr.flow(), None);

        addr.set_layer(Layer::Flow);
        assert_eq!(addr.network(), None);
    }

    #[test]
    fn test_flow_data_ipv4() {
        let mut addr = Address::new();
        addr.set_layer(Layer::Flow);
        addr.set_event(Event::FlowEstablished);
        addr.data[16..20].copy_from_slice(&4242u32.to_le_bytes());
        addr.data[20..24].copy_from_slice(&u32::from(Ipv4Addr::new(10, 0, 0, 1)).to_le_bytes());
        addr.data[24..28].copy_from_slice(&0xffffu32.to_le_bytes());
        addr.data[52..54].copy_from_slice(&443u16.to_le_bytes());
        addr.data[56] = 6;

        let flow = addr.flow().unwrap();
        assert_eq!(flow.process_id, 4242);
        assert_eq!(flow.local_addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(flow.local_port, 443);
        assert_eq!(flow.protocol, 6);
    }

    #[test]
    fn test_reflect_data() {
        let mut addr = Address::new();
        addr.set_layer(Layer::Reflect);
        addr.data[8..12].copy_from_slice(&77u32.to_le_bytes());
        addr.data[12..16].copy_from_slice(&(Layer::Socket as u32).to_le_bytes());
        addr.data[16..24].copy_from_slice(&Flags::SNIFF.bits().to_le_bytes());
        addr.data[24..26].copy_from_slice(&(-100i16).to_le_bytes());

        let reflect = addr.reflect().unwrap();
        assert_eq!(reflect.process_id, 77);
        assert_eq!(reflect.layer, Some(Layer::Socket));
        assert_eq!(reflect.flags, Flags::SNIFF);
        assert_eq!(reflect.priority, -100);
    }
}
