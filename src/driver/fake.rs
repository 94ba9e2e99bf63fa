//! In-memory driver for tests.
//!
//! Packets pushed with [`FakeDriver::push`] are handed out by receive
//! requests in order. A receive with nothing queued blocks until a packet
//! arrives, the handle is shut down for receiving (`NO_DATA`) or the handle
//! is closed (`OPERATION_ABORTED`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use super::{Driver, RawEvent, RawHandle, Request};
use crate::address::Address;
use crate::error::{DivertError, DriverError, Result};
use crate::ioctl::CtlCode;
use crate::types::{ChecksumFlags, Flags, Layer, Param, ShutdownHow};

#[derive(Default)]
struct State {
    queue: VecDeque<(Vec<u8>, Address)>,
    live: HashSet<isize>,
    recv_shutdown: HashSet<isize>,
    next_handle: isize,
    live_events: usize,
    params: HashMap<u32, u64>,
    sent: Vec<(Vec<u8>, usize)>,
    requests: Vec<CtlCode>,
    recv_calls: usize,
    recv_waiting: usize,
    opened_with: Vec<(String, Layer, i16, Flags)>,
}

pub(crate) struct FakeDriver {
    version: (u64, u64),
    fail_open: Option<DriverError>,
    service_running: bool,
    calls: AtomicUsize,
    opens: AtomicUsize,
    state: Mutex<State>,
    cond: Condvar,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::with_version(2, 2)
    }

    pub fn with_version(major: u64, minor: u64) -> Self {
        Self {
            version: (major, minor),
            fail_open: None,
            service_running: true,
            calls: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            state: Mutex::new(State {
                next_handle: 0x100,
                ..State::default()
            }),
            cond: Condvar::new(),
        }
    }

    pub fn failing_open(err: DriverError) -> Self {
        Self {
            fail_open: Some(err),
            ..Self::new()
        }
    }

    pub fn without_service() -> Self {
        Self {
            service_running: false,
            ..Self::new()
        }
    }

    /// Queue a packet for the next receive request.
    pub fn push(&self, packet: &[u8], addr: Address) {
        self.state.lock().queue.push_back((packet.to_vec(), addr));
        self.cond.notify_all();
    }

    /// Every driver entry point except the checksum helper.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Filter, layer, priority and flags of every open call, in order.
    pub fn opened_with(&self) -> Vec<(String, Layer, i16, Flags)> {
        self.state.lock().opened_with.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn live_events(&self) -> usize {
        self.state.lock().live_events
    }

    pub fn recv_calls(&self) -> usize {
        self.state.lock().recv_calls
    }

    pub fn recv_waiting(&self) -> usize {
        self.state.lock().recv_waiting
    }

    pub fn requests(&self) -> Vec<CtlCode> {
        self.state.lock().requests.clone()
    }

    /// Packets sent so far, with the number of addresses each carried.
    pub fn sent(&self) -> Vec<(Vec<u8>, usize)> {
        self.state.lock().sent.clone()
    }

    pub fn param(&self, param: Param) -> Option<u64> {
        self.state.lock().params.get(&(param as u32)).copied()
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Driver for FakeDriver {
    fn open(
        &self,
        filter: &CStr,
        layer: Layer,
        priority: i16,
        flags: Flags,
    ) -> std::result::Result<RawHandle, DriverError> {
        self.count();
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.state.lock().opened_with.push((
            filter.to_string_lossy().into_owned(),
            layer,
            priority,
            flags,
        ));
        if let Some(err) = self.fail_open {
            return Err(err);
        }
        if filter.to_bytes().is_empty() {
            return Err(DriverError::INVALID_PARAMETER);
        }
        let mut state = self.state.lock();
        state.next_handle += 1;
        let raw = state.next_handle;
        state.live.insert(raw);
        Ok(RawHandle(raw))
    }

    fn create_event(&self) -> std::result::Result<RawEvent, DriverError> {
        self.count();
        let mut state = self.state.lock();
        state.live_events += 1;
        Ok(RawEvent(state.live_events as isize))
    }

    fn close_event(&self, _event: RawEvent) {
        let mut state = self.state.lock();
        state.live_events = state.live_events.saturating_sub(1);
    }

    fn device_control(
        &self,
        handle: RawHandle,
        request: Request<'_>,
        _event: RawEvent,
    ) -> std::result::Result<u32, DriverError> {
        self.count();
        let mut state = self.state.lock();
        state.requests.push(request.code());
        if !state.live.contains(&handle.0) {
            return Err(DriverError::INVALID_HANDLE);
        }

        match request {
            Request::Recv {
                packet,
                addrs,
                addr_len,
            } => {
                state.recv_calls += 1;
                loop {
                    if !state.live.contains(&handle.0) {
                        return Err(DriverError::OPERATION_ABORTED);
                    }
                    if let Some((bytes, addr)) = state.queue.pop_front() {
                        let n = bytes.len().min(packet.len());
                        packet[..n].copy_from_slice(&bytes[..n]);
                        if let Some(slot) = addrs.first_mut() {
                            *slot = addr;
                            *addr_len = std::mem::size_of::<Address>() as u32;
                        } else {
                            *addr_len = 0;
                        }
                        return Ok(n as u32);
                    }
                    if state.recv_shutdown.contains(&handle.0) {
                        return Err(DriverError::NO_DATA);
                    }
                    state.recv_waiting += 1;
                    self.cond.wait(&mut state);
                    state.recv_waiting -= 1;
                }
            }
            Request::Send { packet, addrs } => {
                state.sent.push((packet.to_vec(), addrs.len()));
                Ok(packet.len() as u32)
            }
            Request::GetParam { param, value } => {
                *value = match param {
                    Param::VersionMajor => self.version.0,
                    Param::VersionMinor => self.version.1,
                    other => state.params.get(&(other as u32)).copied().unwrap_or(0),
                };
                Ok(0)
            }
            Request::SetParam { param, value } => {
                state.params.insert(param as u32, value);
                Ok(0)
            }
            Request::Shutdown(how) => {
                if matches!(how, ShutdownHow::Recv | ShutdownHow::Both) {
                    state.recv_shutdown.insert(handle.0);
                    self.cond.notify_all();
                }
                Ok(0)
            }
        }
    }

    fn close_handle(&self, handle: RawHandle) -> std::result::Result<(), DriverError> {
        self.count();
        let mut state = self.state.lock();
        if !state.live.remove(&handle.0) {
            return Err(DriverError::INVALID_HANDLE);
        }
        self.cond.notify_all();
        Ok(())
    }

    fn stop_service(&self, name: &str) -> Result<()> {
        self.count();
        if name != super::SERVICE_NAME || !self.service_running {
            return Err(DivertError::ServiceNotRunning);
        }
        Ok(())
    }

    fn calc_checksums(
        &self,
        packet: &mut [u8],
        _addr: Option<&Address>,
        flags: ChecksumFlags,
    ) -> bool {
        if packet.is_empty() {
            return false;
        }
        if packet[0] >> 4 != 4 || flags.bits() & ChecksumFlags::NO_IP.bits() != 0 {
            return true;
        }
        let ihl = usize::from(packet[0] & 0x0f) * 4;
        if ihl < 20 || ihl > packet.len() {
            return false;
        }
        packet[10] = 0;
        packet[11] = 0;
        let sum = ipv4_checksum(&packet[..ihl]);
        packet[10..12].copy_from_slice(&sum.to_be_bytes());
        true
    }
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)])))
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
