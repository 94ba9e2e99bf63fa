//! `WinDivert.dll` backend.
//!
//! Sessions are opened through the library's `WinDivertOpen`; every other
//! request goes straight to the device with an overlapped `DeviceIoControl`.

use std::ffi::{c_char, c_void, CStr};
use std::mem::size_of;

use windows::core::{s, w, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::Win32::System::Services::{
    CloseServiceHandle, ControlService, OpenSCManagerW, OpenServiceW, SC_MANAGER_CONNECT,
    SERVICE_CONTROL_STOP, SERVICE_STATUS, SERVICE_STOP,
};
use windows::Win32::System::Threading::CreateEventW;
use windows::Win32::System::IO::{DeviceIoControl, GetOverlappedResult, OVERLAPPED};

use super::{Driver, RawEvent, RawHandle, Request};
use crate::address::Address;
use crate::error::{DivertError, DriverError, Result};
use crate::ioctl::IoCtl;
use crate::types::{ChecksumFlags, Flags, Layer};

const INVALID_HANDLE_VALUE: isize = -1;

type OpenFn = unsafe extern "system" fn(*const c_char, u32, i16, u64) -> isize;
type CalcChecksumsFn = unsafe extern "system" fn(*mut c_void, u32, *mut Address, u64) -> i32;

/// Entry points resolved from `WinDivert.dll`. The library stays loaded for
/// the life of the process.
pub struct WinDivertDll {
    open: OpenFn,
    calc_checksums: CalcChecksumsFn,
}

impl WinDivertDll {
    pub fn load() -> Result<Self> {
        let module = unsafe { LoadLibraryW(w!("WinDivert.dll")) }.map_err(|e| {
            log::error!("Failed to load WinDivert.dll: {}", e);
            DivertError::LibraryNotFound(e.message())
        })?;

        let open = unsafe { GetProcAddress(module, s!("WinDivertOpen")) }
            .ok_or(DivertError::EntryPointNotFound("WinDivertOpen"))?;
        let calc_checksums = unsafe { GetProcAddress(module, s!("WinDivertHelperCalcChecksums")) }
            .ok_or(DivertError::EntryPointNotFound("WinDivertHelperCalcChecksums"))?;

        Ok(Self {
            open: unsafe { std::mem::transmute::<_, OpenFn>(open) },
            calc_checksums: unsafe { std::mem::transmute::<_, CalcChecksumsFn>(calc_checksums) },
        })
    }
}

fn win32_code(e: &windows::core::Error) -> DriverError {
    DriverError((e.code().0 as u32) & 0xffff)
}

fn last_error() -> DriverError {
    DriverError(unsafe { GetLastError() }.0)
}

fn handle(raw: isize) -> HANDLE {
    HANDLE(raw as *mut c_void)
}

/// Buffers for one `DeviceIoControl` call.
struct IoBuffers {
    input: IoCtl,
    output: Option<*mut c_void>,
    output_len: u32,
}

fn encode(request: Request<'_>) -> IoBuffers {
    match request {
        Request::Recv {
            packet,
            addrs,
            addr_len,
        } => IoBuffers {
            input: IoCtl::recv(addrs.as_mut_ptr(), addr_len as *mut u32),
            output: Some(packet.as_mut_ptr().cast()),
            output_len: packet.len() as u32,
        },
        // METHOD_IN_DIRECT: the packet travels in the output buffer.
        Request::Send { packet, addrs } => IoBuffers {
            input: IoCtl::send(addrs.as_ptr(), addrs.len()),
            output: Some(packet.as_ptr() as *mut c_void),
            output_len: packet.len() as u32,
        },
        Request::GetParam { param, value } => IoBuffers {
            input: IoCtl::get_param(param),
            output: Some((value as *mut u64).cast()),
            output_len: size_of::<u64>() as u32,
        },
        Request::SetParam { param, value } => IoBuffers {
            input: IoCtl::set_param(param, value),
            output: None,
            output_len: 0,
        },
        Request::Shutdown(how) => IoBuffers {
            input: IoCtl::shutdown(how),
            output: None,
            output_len: 0,
        },
    }
}

impl Driver for WinDivertDll {
    fn open(
        &self,
        filter: &CStr,
        layer: Layer,
        priority: i16,
        flags: Flags,
    ) -> std::result::Result<RawHandle, DriverError> {
        let raw = unsafe { (self.open)(filter.as_ptr(), layer as u32, priority, flags.bits()) };
        if raw == INVALID_HANDLE_VALUE || raw == 0 {
            let err = last_error();
            log::debug!("WinDivertOpen failed: {} ({})", err, err.description());
            return Err(err);
        }
        Ok(RawHandle(raw))
    }

    fn create_event(&self) -> std::result::Result<RawEvent, DriverError> {
        let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
            .map_err(|e| win32_code(&e))?;
        Ok(RawEvent(event.0 as isize))
    }

    fn close_event(&self, event: RawEvent) {
        unsafe {
            let _ = CloseHandle(handle(event.0));
        }
    }

    fn device_control(
        &self,
        device: RawHandle,
        request: Request<'_>,
        event: RawEvent,
    ) -> std::result::Result<u32, DriverError> {
        let code = request.code();
        let buffers = encode(request);
        let mut overlapped = OVERLAPPED {
            hEvent: handle(event.0),
            ..Default::default()
        };
        let mut transferred = 0u32;

        let issued = unsafe {
            DeviceIoControl(
                handle(device.0),
                code.code(),
                Some(buffers.input.as_bytes().as_ptr().cast()),
                IoCtl::LEN as u32,
                buffers.output,
                buffers.output_len,
                None,
                Some(&mut overlapped as *mut OVERLAPPED),
            )
        };

        match issued {
            Ok(()) => {}
            Err(e) if win32_code(&e) == DriverError::IO_PENDING => {}
            Err(e) => return Err(win32_code(&e)),
        }

        unsafe { GetOverlappedResult(handle(device.0), &overlapped, &mut transferred, true) }
            .map_err(|e| win32_code(&e))?;
        Ok(transferred)
    }

    fn close_handle(&self, device: RawHandle) -> std::result::Result<(), DriverError> {
        unsafe { CloseHandle(handle(device.0)) }.map_err(|e| win32_code(&e))
    }

    fn stop_service(&self, name: &str) -> Result<()> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

        let manager = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT) }
            .map_err(|e| {
                log::error!("Failed to connect to the service manager: {}", e);
                DivertError::ServiceConnect
            })?;

        let service = match unsafe { OpenServiceW(manager, PCWSTR(wide.as_ptr()), SERVICE_STOP) } {
            Ok(service) => service,
            Err(e) => {
                log::warn!("Service {} not available: {}", name, e);
                unsafe {
                    let _ = CloseServiceHandle(manager);
                }
                return Err(DivertError::ServiceNotRunning);
            }
        };

        let mut status = SERVICE_STATUS::default();
        let stopped = unsafe { ControlService(service, SERVICE_CONTROL_STOP, &mut status) };
        unsafe {
            let _ = CloseServiceHandle(service);
            let _ = CloseServiceHandle(manager);
        }

        stopped.map_err(|e| {
            log::error!("Failed to stop service {}: {}", name, e);
            DivertError::ServiceStop
        })?;
        log::info!("Stopped service {}", name);
        Ok(())
    }

    fn calc_checksums(
        &self,
        packet: &mut [u8],
        addr: Option<&Address>,
        flags: ChecksumFlags,
    ) -> bool {
        let mut addr = addr.copied();
        let addr_ptr = addr
            .as_mut()
            .map_or(std::ptr::null_mut(), |a| a as *mut Address);
        let ok = unsafe {
            (self.calc_checksums)(
                packet.as_mut_ptr().cast(),
                packet.len() as u32,
                addr_ptr,
                flags.bits(),
            )
        };
        ok != 0
    }
}
