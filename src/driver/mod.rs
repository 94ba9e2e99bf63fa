//! Binding to the privileged diversion driver.
//!
//! The driver is reached through the [`Driver`] trait: open a session,
//! issue a device-control request, close a handle, stop the service, plus the
//! checksum helper exported by the same library. On Windows the
//! implementation is `WinDivert.dll` ([`dll::WinDivertDll`]); tests use an
//! in-crate fake.
//!
//! [`Binding`] wraps a driver and runs the one-time version query. The
//! process-wide binding is created lazily by [`Binding::global`] and lives for
//! the rest of the process.

#[cfg(windows)]
pub mod dll;
#[cfg(test)]
pub(crate) mod fake;

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};

use crate::address::Address;
use crate::error::{DivertError, DriverError, Result};
use crate::handle::Handle;
use crate::ioctl::CtlCode;
use crate::types::{
    ChecksumFlags, Flags, Layer, Param, ShutdownHow, PRIORITY_DEFAULT, PRIORITY_HIGHEST,
    PRIORITY_LOWEST,
};

/// Driver versions this crate speaks the control protocol of.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["2.0", "2.1", "2.2"];

/// Name of the driver's service, for [`Driver::stop_service`].
pub const SERVICE_NAME: &str = "WinDivert";

/// Filter that matches nothing, used for the version query.
const VERSION_FILTER: &str = "false";

/// OS handle to an open session on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub isize);

/// Waitable event signalled when an overlapped request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEvent(pub isize);

/// A device-control request together with the buffers it reads or fills.
pub enum Request<'a> {
    Recv {
        packet: &'a mut [u8],
        addrs: &'a mut [Address],
        /// In: bytes available in `addrs`. Out: bytes the driver filled.
        addr_len: &'a mut u32,
    },
    Send {
        packet: &'a [u8],
        addrs: &'a [Address],
    },
    GetParam {
        param: Param,
        value: &'a mut u64,
    },
    SetParam {
        param: Param,
        value: u64,
    },
    Shutdown(ShutdownHow),
}

impl Request<'_> {
    pub fn code(&self) -> CtlCode {
        match self {
            Request::Recv { .. } => CtlCode::Recv,
            Request::Send { .. } => CtlCode::Send,
            Request::GetParam { .. } => CtlCode::GetParam,
            Request::SetParam { .. } => CtlCode::SetParam,
            Request::Shutdown(_) => CtlCode::Shutdown,
        }
    }
}

/// Operations the privileged driver exposes to user space.
pub trait Driver: Send + Sync {
    /// Open a session. The driver validates the filter.
    fn open(
        &self,
        filter: &CStr,
        layer: Layer,
        priority: i16,
        flags: Flags,
    ) -> std::result::Result<RawHandle, DriverError>;

    /// Allocate a completion event for overlapped requests.
    fn create_event(&self) -> std::result::Result<RawEvent, DriverError>;

    fn close_event(&self, event: RawEvent);

    /// Issue `request` as an overlapped request signalling `event` and wait
    /// for it to complete. Returns the number of bytes transferred.
    fn device_control(
        &self,
        handle: RawHandle,
        request: Request<'_>,
        event: RawEvent,
    ) -> std::result::Result<u32, DriverError>;

    fn close_handle(&self, handle: RawHandle) -> std::result::Result<(), DriverError>;

    /// Stop the driver's service through the OS service manager.
    fn stop_service(&self, name: &str) -> Result<()>;

    /// Recompute checksums in `packet` in place. False on any failure.
    fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&Address>,
        flags: ChecksumFlags,
    ) -> bool;
}

/// Driver version reported by the version parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
}

impl Version {
    pub fn is_supported(&self) -> bool {
        let text = self.to_string();
        SUPPORTED_VERSIONS.contains(&text.as_str())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ── Binding ─────────────────────────────────────────────────────────────────

static GLOBAL: Lazy<Result<Binding>> = Lazy::new(load_global);

#[cfg(windows)]
fn load_global() -> Result<Binding> {
    let dll = dll::WinDivertDll::load()?;
    log::info!("Loaded WinDivert.dll");
    Ok(Binding::new(Arc::new(dll)))
}

#[cfg(not(windows))]
fn load_global() -> Result<Binding> {
    Err(DivertError::Unsupported)
}

/// A driver plus the result of its one-time version query.
pub struct Binding {
    driver: Arc<dyn Driver>,
    version: OnceCell<Result<Version>>,
}

impl Binding {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            version: OnceCell::new(),
        }
    }

    /// The process-wide binding. A load failure is cached and returned to
    /// every caller.
    pub fn global() -> Result<&'static Binding> {
        GLOBAL.as_ref().map_err(Clone::clone)
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Run the version query once. Concurrent first callers block until the
    /// query finishes; its result, success or failure, is returned from then on.
    pub fn ensure_initialized(&self) -> Result<Version> {
        self.version.get_or_init(|| self.query_version()).clone()
    }

    /// The validated driver version.
    pub fn version(&self) -> Result<Version> {
        self.ensure_initialized()
    }

    /// Open a diversion session.
    pub fn open(&self, filter: &str, layer: Layer, priority: i16, flags: Flags) -> Result<Handle> {
        check_priority(priority)?;
        self.ensure_initialized()?;
        Handle::open_raw(Arc::clone(&self.driver), filter, layer, priority, flags)
    }

    /// Recompute the checksums of `packet` in place.
    pub fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&Address>,
        flags: ChecksumFlags,
    ) -> bool {
        if packet.is_empty() {
            return false;
        }
        self.driver.calc_checksums(packet, addr, flags)
    }

    fn query_version(&self) -> Result<Version> {
        let handle = Handle::open_raw(
            Arc::clone(&self.driver),
            VERSION_FILTER,
            Layer::Network,
            PRIORITY_DEFAULT,
            Flags::DEFAULT,
        )?;
        let version = read_version(&handle);
        let closed = handle.close();
        let version = version?;
        closed?;

        if !version.is_supported() {
            log::error!("Unsupported WinDivert driver version {}", version);
            return Err(DivertError::UnsupportedVersion(version.to_string()));
        }
        log::info!("WinDivert driver version {}", version);
        Ok(version)
    }
}

fn read_version(handle: &Handle) -> Result<Version> {
    Ok(Version {
        major: handle.get_param(Param::VersionMajor)?,
        minor: handle.get_param(Param::VersionMinor)?,
    })
}

pub(crate) fn check_priority(priority: i16) -> Result<()> {
    if !(PRIORITY_LOWEST..=PRIORITY_HIGHEST).contains(&priority) {
        return Err(DivertError::PriorityOutOfRange(priority));
    }
    Ok(())
}

pub(crate) fn filter_cstring(filter: &str) -> Result<CString> {
    CString::new(filter).map_err(|_| DivertError::InvalidFilter)
}

// ── Process-wide shortcuts ──────────────────────────────────────────────────

/// Open a session through the process-wide binding.
pub fn open(filter: &str, layer: Layer, priority: i16, flags: Flags) -> Result<Handle> {
    check_priority(priority)?;
    Binding::global()?.open(filter, layer, priority, flags)
}

/// Recompute checksums with the process-wide binding; false when it is
/// unavailable.
pub fn calc_checksums(packet: &mut [u8], addr: Option<&Address>, flags: ChecksumFlags) -> bool {
    match Binding::global() {
        Ok(binding) => binding.calc_checksums(packet, addr, flags),
        Err(_) => false,
    }
}

/// Version string of the installed driver, e.g. `"2.2"`.
pub fn version_info() -> Result<String> {
    Ok(Binding::global()?.version()?.to_string())
}
