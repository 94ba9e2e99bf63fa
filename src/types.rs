//! Layers, events, parameters, flags and the numeric bounds the driver enforces.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

pub const PRIORITY_DEFAULT: i16 = 0;
pub const PRIORITY_HIGHEST: i16 = 3000;
pub const PRIORITY_LOWEST: i16 = -3000;

pub const QUEUE_LENGTH_DEFAULT: u64 = 4096;
pub const QUEUE_LENGTH_MIN: u64 = 32;
pub const QUEUE_LENGTH_MAX: u64 = 16384;
pub const QUEUE_TIME_DEFAULT: u64 = 2000;
pub const QUEUE_TIME_MIN: u64 = 100;
pub const QUEUE_TIME_MAX: u64 = 16000;
pub const QUEUE_SIZE_DEFAULT: u64 = 4_194_304;
pub const QUEUE_SIZE_MIN: u64 = 65535;
pub const QUEUE_SIZE_MAX: u64 = 33_554_432;

/// Maximum number of addresses in one batch send/receive.
pub const BATCH_MAX: usize = 0xff;

/// Traffic or event category a session observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Layer {
    #[default]
    Network = 0,
    NetworkForward = 1,
    Flow = 2,
    Socket = 3,
    Reflect = 4,
}

impl Layer {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Layer::Network),
            1 => Some(Layer::NetworkForward),
            2 => Some(Layer::Flow),
            3 => Some(Layer::Socket),
            4 => Some(Layer::Reflect),
            _ => None,
        }
    }

    /// Whether sessions on this layer carry raw IP packets.
    pub fn carries_packets(self) -> bool {
        matches!(self, Layer::Network | Layer::NetworkForward)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Network => "WINDIVERT_LAYER_NETWORK",
            Layer::NetworkForward => "WINDIVERT_LAYER_NETWORK_FORWARD",
            Layer::Flow => "WINDIVERT_LAYER_FLOW",
            Layer::Socket => "WINDIVERT_LAYER_SOCKET",
            Layer::Reflect => "WINDIVERT_LAYER_REFLECT",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event that produced a captured packet or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Event {
    NetworkPacket = 0,
    FlowEstablished = 1,
    FlowDeleted = 2,
    SocketBind = 3,
    SocketConnect = 4,
    SocketListen = 5,
    SocketAccept = 6,
    SocketClose = 7,
    ReflectOpen = 8,
    ReflectClose = 9,
}

impl Event {
    pub fn from_u8(value: u8) -> Option<Self> {
        let event = match value {
            0 => Event::NetworkPacket,
            1 => Event::FlowEstablished,
            2 => Event::FlowDeleted,
            3 => Event::SocketBind,
            4 => Event::SocketConnect,
            5 => Event::SocketListen,
            6 => Event::SocketAccept,
            7 => Event::SocketClose,
            8 => Event::ReflectOpen,
            9 => Event::ReflectClose,
            _ => return None,
        };
        Some(event)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Event::NetworkPacket => "WINDIVERT_EVENT_NETWORK_PACKET",
            Event::FlowEstablished => "WINDIVERT_EVENT_FLOW_ESTABLISHED",
            Event::FlowDeleted => "WINDIVERT_EVENT_FLOW_DELETED",
            Event::SocketBind => "WINDIVERT_EVENT_SOCKET_BIND",
            Event::SocketConnect => "WINDIVERT_EVENT_SOCKET_CONNECT",
            Event::SocketListen => "WINDIVERT_EVENT_SOCKET_LISTEN",
            Event::SocketAccept => "WINDIVERT_EVENT_SOCKET_ACCEPT",
            Event::SocketClose => "WINDIVERT_EVENT_SOCKET_CLOSE",
            Event::ReflectOpen => "WINDIVERT_EVENT_REFLECT_OPEN",
            Event::ReflectClose => "WINDIVERT_EVENT_REFLECT_CLOSE",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction(s) a shutdown applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShutdownHow {
    Recv = 0,
    Send = 1,
    Both = 2,
}

impl fmt::Display for ShutdownHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownHow::Recv => "WINDIVERT_SHUTDOWN_RECV",
            ShutdownHow::Send => "WINDIVERT_SHUTDOWN_SEND",
            ShutdownHow::Both => "WINDIVERT_SHUTDOWN_BOTH",
        })
    }
}

/// Tunable or read-only driver parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Param {
    QueueLength = 0,
    QueueTime = 1,
    QueueSize = 2,
    VersionMajor = 3,
    VersionMinor = 4,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Param::QueueLength => "WINDIVERT_PARAM_QUEUE_LENGTH",
            Param::QueueTime => "WINDIVERT_PARAM_QUEUE_TIME",
            Param::QueueSize => "WINDIVERT_PARAM_QUEUE_SIZE",
            Param::VersionMajor => "WINDIVERT_PARAM_VERSION_MAJOR",
            Param::VersionMinor => "WINDIVERT_PARAM_VERSION_MINOR",
        })
    }
}

/// Open flags, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u64);

impl Flags {
    pub const DEFAULT: Flags = Flags(0x0000);
    pub const SNIFF: Flags = Flags(0x0001);
    pub const DROP: Flags = Flags(0x0002);
    pub const RECV_ONLY: Flags = Flags(0x0004);
    pub const SEND_ONLY: Flags = Flags(0x0008);
    pub const NO_INSTALL: Flags = Flags(0x0010);
    pub const FRAGMENTS: Flags = Flags(0x0020);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Look up a flag by its lowercase name (`"sniff"`, `"recv_only"`, ...).
    pub fn from_name(name: &str) -> Option<Flags> {
        match name {
            "default" => Some(Flags::DEFAULT),
            "sniff" => Some(Flags::SNIFF),
            "drop" => Some(Flags::DROP),
            "recv_only" => Some(Flags::RECV_ONLY),
            "send_only" => Some(Flags::SEND_ONLY),
            "no_install" => Some(Flags::NO_INSTALL),
            "fragments" => Some(Flags::FRAGMENTS),
            _ => None,
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

/// Flags for the checksum helper; each one skips a checksum kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChecksumFlags(pub u64);

impl ChecksumFlags {
    pub const ALL: ChecksumFlags = ChecksumFlags(0);
    pub const NO_IP: ChecksumFlags = ChecksumFlags(1);
    pub const NO_ICMP: ChecksumFlags = ChecksumFlags(2);
    pub const NO_ICMPV6: ChecksumFlags = ChecksumFlags(4);
    pub const NO_TCP: ChecksumFlags = ChecksumFlags(8);
    pub const NO_UDP: ChecksumFlags = ChecksumFlags(16);

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl BitOr for ChecksumFlags {
    type Output = ChecksumFlags;

    fn bitor(self, rhs: ChecksumFlags) -> ChecksumFlags {
        ChecksumFlags(self.0 | rhs.0)
    }
}

/// Lifecycle state of a session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Open,
    Shutdown,
    Closed,
}
