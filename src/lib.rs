//! User-space SDK for the WinDivert packet diversion driver.
//!
//! Open a [`Handle`] with a filter, then read diverted packets with
//! [`Handle::recv`] or as a [`PacketStream`], rewrite them through the
//! [`Packet`] header view, and re-inject them with [`Handle::send`].
//!
//! ```no_run
//! use divert_sdk::{ChecksumFlags, Flags, Layer};
//!
//! # fn main() -> divert_sdk::Result<()> {
//! let handle = divert_sdk::open("outbound and udp.DstPort == 53", Layer::Network, 0, Flags::DEFAULT)?;
//! let binding = divert_sdk::Binding::global()?;
//! for mut packet in handle.packets()? {
//!     println!("{}", packet);
//!     if packet.need_new_checksum() {
//!         packet.calc_checksums(binding, ChecksumFlags::ALL);
//!     }
//!     handle.send(packet.raw(), packet.addr())?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The driver itself is reached through [`Driver`]; on Windows the
//! process-wide [`Binding`] loads `WinDivert.dll` on first use and checks the
//! driver version once. Other platforms get [`DivertError::Unsupported`].

pub mod address;
pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod header;
pub mod ioctl;
pub mod packet;
pub mod stream;
pub mod types;

pub use address::{Address, FlowData, NetworkData, ReflectData};
pub use config::{open_config, SessionConfig};
pub use driver::{calc_checksums, open, version_info, Binding, Driver, Version};
pub use error::{DivertError, DriverError, Result};
pub use handle::Handle;
pub use header::{HeaderError, IpHeader, Ipv4Header, Ipv6Header, Protocol};
pub use packet::Packet;
pub use stream::PacketStream;
pub use types::{ChecksumFlags, Event, Flags, Layer, Param, ShutdownHow, Status};

/// Stop the driver's service through the process-wide binding.
pub fn stop_service() -> Result<()> {
    Binding::global()?.driver().stop_service(driver::SERVICE_NAME)
}
