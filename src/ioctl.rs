//! Device control protocol: control codes and the fixed 16-byte request
//! structures sent with every `DeviceIoControl` call.

use std::fmt;

use crate::address::Address;
use crate::types::{Param, ShutdownHow};

const METHOD_IN_DIRECT: u32 = 1;
const METHOD_OUT_DIRECT: u32 = 2;

const FILE_READ_DATA: u32 = 1;
const FILE_WRITE_DATA: u32 = 2;

const FILE_DEVICE_NETWORK: u32 = 0x0000_0012;

const fn ctl_code(function: u32, method: u32, access: u32) -> u32 {
    (FILE_DEVICE_NETWORK << 16) | (access << 14) | (function << 2) | method
}

/// Control codes understood by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CtlCode {
    Initialize = ctl_code(0x921, METHOD_OUT_DIRECT, FILE_READ_DATA | FILE_WRITE_DATA),
    Startup = ctl_code(0x922, METHOD_IN_DIRECT, FILE_READ_DATA | FILE_WRITE_DATA),
    Recv = ctl_code(0x923, METHOD_OUT_DIRECT, FILE_READ_DATA),
    Send = ctl_code(0x924, METHOD_IN_DIRECT, FILE_READ_DATA | FILE_WRITE_DATA),
    SetParam = ctl_code(0x925, METHOD_IN_DIRECT, FILE_READ_DATA | FILE_WRITE_DATA),
    GetParam = ctl_code(0x926, METHOD_OUT_DIRECT, FILE_READ_DATA),
    Shutdown = ctl_code(0x927, METHOD_IN_DIRECT, FILE_READ_DATA | FILE_WRITE_DATA),
}

impl CtlCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for CtlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CtlCode::Initialize => "IOCTL_WINDIVERT_INITIALIZE",
            CtlCode::Startup => "IOCTL_WINDIVERT_STARTUP",
            CtlCode::Recv => "IOCTL_WINDIVERT_RECV",
            CtlCode::Send => "IOCTL_WINDIVERT_SEND",
            CtlCode::SetParam => "IOCTL_WINDIVERT_SET_PARAM",
            CtlCode::GetParam => "IOCTL_WINDIVERT_GET_PARAM",
            CtlCode::Shutdown => "IOCTL_WINDIVERT_SHUTDOWN",
        })
    }
}

/// Encoded request structure. Every request is two 64-bit words.
///
/// * recv: `{ addr: u64, addr_len_ptr: u64 }`
/// * send: `{ addr: u64, addr_len: u64 }`
/// * shutdown: `{ how: u32, _: u32, _: u64 }`
/// * get-param: `{ param: u32, _: u32, value: u64 }`
/// * set-param: `{ value: u64, param: u32, _: u32 }`
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoCtl([u8; 16]);

impl IoCtl {
    pub const LEN: usize = 16;

    pub fn recv(addrs: *mut Address, addr_len: *mut u32) -> Self {
        Self::words(addrs as u64, addr_len as u64)
    }

    pub fn send(addrs: *const Address, count: usize) -> Self {
        let len = (count * std::mem::size_of::<Address>()) as u64;
        Self::words(addrs as u64, len)
    }

    pub fn shutdown(how: ShutdownHow) -> Self {
        Self::words(u64::from(how as u32), 0)
    }

    pub fn get_param(param: Param) -> Self {
        Self::words(u64::from(param as u32), 0)
    }

    pub fn set_param(param: Param, value: u64) -> Self {
        Self::words(value, u64::from(param as u32))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    fn words(first: u64, second: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&first.to_le_bytes());
        bytes[8..].copy_from_slice(&second.to_le_bytes());
        IoCtl(bytes)
    }
}
