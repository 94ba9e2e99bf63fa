//! Error types, error codes, and named driver error codes.

use std::fmt;

use thiserror::Error;

use crate::header::HeaderError;
use crate::types::Param;

// ── Error codes ─────────────────────────────────────────────────────────────

pub const ERROR_INVALID_PARAM: i32 = -1;
pub const ERROR_NOT_OPEN: i32 = -2;
pub const ERROR_CLOSED: i32 = -3;
pub const ERROR_DRIVER: i32 = -4;
pub const ERROR_BINDING: i32 = -5;
pub const ERROR_SERVICE: i32 = -6;
pub const ERROR_HEADER: i32 = -7;
pub const ERROR_UNSUPPORTED: i32 = -8;
pub const ERROR_THREAD: i32 = -9;

pub type Result<T> = std::result::Result<T, DivertError>;

// ── DivertError enum ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DivertError {
    #[error("priority {0} out of range [-3000, 3000]")]
    PriorityOutOfRange(i16),

    #[error("queue length {0} out of range [32, 16384]")]
    QueueLength(u64),

    #[error("queue time {0}ms out of range [100, 16000]")]
    QueueTime(u64),

    #[error("queue size {0} bytes out of range [65535, 33554432]")]
    QueueSize(u64),

    #[error("parameter {0} cannot be set")]
    UnsupportedParam(Param),

    #[error("filter contains an interior NUL byte")]
    InvalidFilter,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("invalid session config: {0}")]
    Config(String),

    #[error("handle is not open")]
    NotOpen,

    #[error("handle is closed")]
    Closed,

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("failed to load driver library: {0}")]
    LibraryNotFound(String),

    #[error("entry point {0} not found")]
    EntryPointNotFound(&'static str),

    #[error("unsupported windivert version: {0}")]
    UnsupportedVersion(String),

    #[error("packet diversion is not supported on this platform")]
    Unsupported,

    #[error("failed to connect to the service manager")]
    ServiceConnect,

    #[error("windivert service is not installed or not running")]
    ServiceNotRunning,

    #[error("failed to stop the windivert service")]
    ServiceStop,

    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    #[error("failed to spawn packet pump: {0}")]
    Spawn(String),
}

impl DivertError {
    /// Map this error to its stable integer code.
    pub fn code(&self) -> i32 {
        match self {
            DivertError::PriorityOutOfRange(_)
            | DivertError::QueueLength(_)
            | DivertError::QueueTime(_)
            | DivertError::QueueSize(_)
            | DivertError::UnsupportedParam(_)
            | DivertError::InvalidFilter
            | DivertError::InvalidArgument(_)
            | DivertError::Config(_) => ERROR_INVALID_PARAM,
            DivertError::NotOpen => ERROR_NOT_OPEN,
            DivertError::Closed => ERROR_CLOSED,
            DivertError::Driver(_) => ERROR_DRIVER,
            DivertError::LibraryNotFound(_)
            | DivertError::EntryPointNotFound(_)
            | DivertError::UnsupportedVersion(_) => ERROR_BINDING,
            DivertError::Unsupported => ERROR_UNSUPPORTED,
            DivertError::ServiceConnect
            | DivertError::ServiceNotRunning
            | DivertError::ServiceStop => ERROR_SERVICE,
            DivertError::Header(_) => ERROR_HEADER,
            DivertError::Spawn(_) => ERROR_THREAD,
        }
    }

    /// The driver error behind this error, if the driver reported it.
    pub fn driver_error(&self) -> Option<DriverError> {
        match self {
            DivertError::Driver(e) => Some(*e),
            _ => None,
        }
    }
}

// ── Driver error codes ──────────────────────────────────────────────────────

/// Win32 error code reported by the driver or the library around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverError(pub u32);

impl DriverError {
    pub const FILE_NOT_FOUND: DriverError = DriverError(2);
    pub const ACCESS_DENIED: DriverError = DriverError(5);
    pub const INVALID_HANDLE: DriverError = DriverError(6);
    pub const INVALID_PARAMETER: DriverError = DriverError(87);
    pub const INSUFFICIENT_BUFFER: DriverError = DriverError(122);
    pub const NO_DATA: DriverError = DriverError(232);
    pub const INVALID_IMAGE_HASH: DriverError = DriverError(577);
    pub const DRIVER_FAILED_PRIOR_UNLOAD: DriverError = DriverError(654);
    pub const OPERATION_ABORTED: DriverError = DriverError(995);
    pub const IO_PENDING: DriverError = DriverError(997);
    pub const SERVICE_DOES_NOT_EXIST: DriverError = DriverError(1060);
    pub const NETWORK_UNREACHABLE: DriverError = DriverError(1231);
    pub const HOST_UNREACHABLE: DriverError = DriverError(1232);
    pub const DRIVER_BLOCKED: DriverError = DriverError(1275);
    pub const EPT_S_NOT_REGISTERED: DriverError = DriverError(1753);

    /// Raw Win32 error code.
    pub fn code(self) -> u32 {
        self.0
    }

    /// Symbolic name of the error code, `None` for codes we don't name.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            DriverError::FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            DriverError::ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            DriverError::INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            DriverError::INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            DriverError::INSUFFICIENT_BUFFER => "ERROR_INSUFFICIENT_BUFFER",
            DriverError::NO_DATA => "ERROR_NO_DATA",
            DriverError::INVALID_IMAGE_HASH => "ERROR_INVALID_IMAGE_HASH",
            DriverError::DRIVER_FAILED_PRIOR_UNLOAD => "ERROR_DRIVER_FAILED_PRIOR_UNLOAD",
            DriverError::OPERATION_ABORTED => "ERROR_OPERATION_ABORTED",
            DriverError::IO_PENDING => "ERROR_IO_PENDING",
            DriverError::SERVICE_DOES_NOT_EXIST => "ERROR_SERVICE_DOES_NOT_EXIST",
            DriverError::NETWORK_UNREACHABLE => "ERROR_NETWORK_UNREACHABLE",
            DriverError::HOST_UNREACHABLE => "ERROR_HOST_UNREACHABLE",
            DriverError::DRIVER_BLOCKED => "ERROR_DRIVER_BLOCKED",
            DriverError::EPT_S_NOT_REGISTERED => "EPT_S_NOT_REGISTERED",
            _ => return None,
        };
        Some(name)
    }

    /// Short explanation of what the code means for a diversion session.
    pub fn description(self) -> &'static str {
        match self {
            DriverError::FILE_NOT_FOUND => "the driver files could not be found",
            DriverError::ACCESS_DENIED => "administrator privileges are required",
            DriverError::INVALID_PARAMETER => "invalid filter, layer, priority or flags",
            DriverError::INVALID_IMAGE_HASH => "the driver signature could not be verified",
            DriverError::DRIVER_FAILED_PRIOR_UNLOAD => "an incompatible driver version is loaded",
            DriverError::SERVICE_DOES_NOT_EXIST => "the handle was opened with no-install and the driver is not installed",
            DriverError::DRIVER_BLOCKED => "the driver is blocked by security software or virtualization",
            DriverError::EPT_S_NOT_REGISTERED => "the base filtering engine service is disabled",
            DriverError::INSUFFICIENT_BUFFER => "the packet is larger than the buffer",
            DriverError::NO_DATA => "the handle was shut down and the queue is empty",
            DriverError::HOST_UNREACHABLE => "an impostor packet hit its TTL limit",
            DriverError::OPERATION_ABORTED => "the request was cancelled",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "win32 error {}", self.0),
        }
    }
}

impl std::error::Error for DriverError {}
