//! Session handle: one open diversion session on the driver.
//!
//! A handle moves `Open -> (Shutdown) -> Closed`. The status guard is held
//! only to check and update the status. Receive and send each own one
//! completion event behind its own lock, so the two directions run
//! concurrently while requests in one direction complete in issue order.
//! Parameter and shutdown requests use a throwaway event.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::Address;
use crate::driver::{self, Driver, RawEvent, RawHandle, Request, SERVICE_NAME};
use crate::error::{DivertError, Result};
use crate::stream::PacketStream;
use crate::types::{
    Flags, Layer, Param, ShutdownHow, Status, BATCH_MAX, QUEUE_LENGTH_MAX, QUEUE_LENGTH_MIN,
    QUEUE_SIZE_MAX, QUEUE_SIZE_MIN, QUEUE_TIME_MAX, QUEUE_TIME_MIN,
};

/// An open diversion session.
///
/// Dropping a handle that is still open closes it.
pub struct Handle {
    inner: Arc<Inner>,
}

/// State shared between a handle and the pumps it spawned.
pub(crate) struct Inner {
    driver: Arc<dyn Driver>,
    raw: RawHandle,
    status: Mutex<Status>,
    recv_event: Mutex<Option<RawEvent>>,
    send_event: Mutex<Option<RawEvent>>,
    filter: String,
    layer: Layer,
    priority: i16,
    flags: Flags,
}

impl Handle {
    /// Open a session on `driver` without a binding's version
    /// query.
    pub(crate) fn open_raw(
        driver: Arc<dyn Driver>,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: Flags,
    ) -> Result<Handle> {
        driver::check_priority(priority)?;
        let c_filter = driver::filter_cstring(filter)?;

        let raw = driver.open(&c_filter, layer, priority, flags)?;
        let recv_event = match driver.create_event() {
            Ok(event) => event,
            Err(e) => {
                let _ = driver.close_handle(raw);
                return Err(e.into());
            }
        };
        let send_event = match driver.create_event() {
            Ok(event) => event,
            Err(e) => {
                driver.close_event(recv_event);
                let _ = driver.close_handle(raw);
                return Err(e.into());
            }
        };

        log::debug!(
            "Opened handle {:#x} (layer={}, priority={}, flags={:#x}, filter={:?})",
            raw.0,
            layer,
            priority,
            flags.bits(),
            filter
        );

        Ok(Handle {
            inner: Arc::new(Inner {
                driver,
                raw,
                status: Mutex::new(Status::Open),
                recv_event: Mutex::new(Some(recv_event)),
                send_event: Mutex::new(Some(send_event)),
                filter: filter.to_string(),
                layer,
                priority,
                flags,
            }),
        })
    }

    pub fn status(&self) -> Status {
        *self.inner.status.lock()
    }

    pub fn layer(&self) -> Layer {
        self.inner.layer
    }

    pub fn priority(&self) -> i16 {
        self.inner.priority
    }

    pub fn flags(&self) -> Flags {
        self.inner.flags
    }

    pub fn filter(&self) -> &str {
        &self.inner.filter
    }

    /// Receive one packet into `packet`, filling `addr`. Blocks until a packet
    /// arrives. Returns the number of bytes read.
    pub fn recv(&self, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        self.inner.recv(packet, addr)
    }

    /// Batch receive. Returns bytes read and the number of `addrs` slots the
    /// driver filled, which may be fewer than requested.
    pub fn recv_ex(&self, packet: &mut [u8], addrs: &mut [Address]) -> Result<(usize, usize)> {
        self.inner.recv_ex(packet, addrs)
    }

    /// Inject `packet`. Returns the number of bytes the driver accepted.
    pub fn send(&self, packet: &[u8], addr: &Address) -> Result<usize> {
        self.inner.send_ex(packet, std::slice::from_ref(addr))
    }

    /// Batch send of concatenated packets, one address per packet.
    pub fn send_ex(&self, packet: &[u8], addrs: &[Address]) -> Result<usize> {
        self.inner.send_ex(packet, addrs)
    }

    pub fn get_param(&self, param: Param) -> Result<u64> {
        self.inner.ensure_not_closed()?;
        let mut value = 0u64;
        self.inner.control(Request::GetParam {
            param,
            value: &mut value,
        })?;
        Ok(value)
    }

    /// Set a queue parameter. Out-of-range values and read-only parameters
    /// are rejected without contacting the driver.
    pub fn set_param(&self, param: Param, value: u64) -> Result<()> {
        check_param(param, value)?;
        self.inner.ensure_not_closed()?;
        self.inner.control(Request::SetParam { param, value })?;
        log::debug!("Set {} = {} on handle {:#x}", param, value, self.inner.raw.0);
        Ok(())
    }

    /// Stop receiving, sending or both. Pending packets can still be read;
    /// the driver answers `NO_DATA` once the queue drains.
    pub fn shutdown(&self, how: ShutdownHow) -> Result<()> {
        {
            let mut status = self.inner.status.lock();
            match *status {
                Status::Closed => return Err(DivertError::Closed),
                Status::Shutdown => return Ok(()),
                Status::Open => *status = Status::Shutdown,
            }
        }
        log::debug!("Shutting down handle {:#x} ({})", self.inner.raw.0, how);
        self.inner.control(Request::Shutdown(how))?;
        Ok(())
    }

    /// Close the session. Cancels in-flight requests; a second close fails
    /// with [`DivertError::Closed`].
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    /// Start a background pump that publishes received packets on a bounded
    /// stream. Call at most once per handle: two pumps race on the same
    /// session and their packets are not ordered relative to each other.
    pub fn packets(&self) -> Result<PacketStream> {
        if self.status() != Status::Open {
            return Err(DivertError::NotOpen);
        }
        PacketStream::spawn(Arc::clone(&self.inner))
    }

    /// Stop the driver's service through the OS service manager.
    pub fn stop_service(&self) -> Result<()> {
        self.inner.driver.stop_service(SERVICE_NAME)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.status() == Status::Closed {
            return;
        }
        if let Err(e) = self.inner.close() {
            log::warn!("Failed to close handle {:#x} on drop: {}", self.inner.raw.0, e);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.inner.raw)
            .field("status", &self.status())
            .field("layer", &self.inner.layer)
            .field("priority", &self.inner.priority)
            .field("filter", &self.inner.filter)
            .finish()
    }
}

impl Inner {
    pub(crate) fn status(&self) -> Status {
        *self.status.lock()
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.raw
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if *self.status.lock() == Status::Closed {
            return Err(DivertError::Closed);
        }
        Ok(())
    }

    pub(crate) fn recv(&self, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        let (read, _) = self.recv_ex(packet, std::slice::from_mut(addr))?;
        Ok(read)
    }

    pub(crate) fn recv_ex(
        &self,
        packet: &mut [u8],
        addrs: &mut [Address],
    ) -> Result<(usize, usize)> {
        if addrs.is_empty() {
            return Err(DivertError::InvalidArgument("address slice is empty"));
        }
        self.ensure_not_closed()?;

        let guard = self.recv_event.lock();
        let event = (*guard).ok_or(DivertError::Closed)?;
        let mut addr_len = (addrs.len() * size_of::<Address>()) as u32;
        let read = self.driver.device_control(
            self.raw,
            Request::Recv {
                packet,
                addrs,
                addr_len: &mut addr_len,
            },
            event,
        )?;
        Ok((read as usize, addr_len as usize / size_of::<Address>()))
    }

    fn send_ex(&self, packet: &[u8], addrs: &[Address]) -> Result<usize> {
        if packet.is_empty() {
            return Err(DivertError::InvalidArgument("packet buffer is empty"));
        }
        if addrs.is_empty() {
            return Err(DivertError::InvalidArgument("address slice is empty"));
        }
        if addrs.len() >= BATCH_MAX {
            return Err(DivertError::InvalidArgument("too many addresses in batch"));
        }
        self.ensure_not_closed()?;

        let guard = self.send_event.lock();
        let event = (*guard).ok_or(DivertError::Closed)?;
        let sent = self
            .driver
            .device_control(self.raw, Request::Send { packet, addrs }, event)?;
        Ok(sent as usize)
    }

    /// Issue a request that belongs to neither direction.
    fn control(&self, request: Request<'_>) -> Result<u32> {
        let event = self.driver.create_event()?;
        let result = self.driver.device_control(self.raw, request, event);
        self.driver.close_event(event);
        Ok(result?)
    }

    fn close(&self) -> Result<()> {
        {
            let mut status = self.status.lock();
            if *status == Status::Closed {
                return Err(DivertError::Closed);
            }
            *status = Status::Closed;
        }

        // Closing the device handle cancels requests still holding an event lock.
        let closed = self.driver.close_handle(self.raw);
        for slot in [&self.recv_event, &self.send_event] {
            if let Some(event) = slot.lock().take() {
                self.driver.close_event(event);
            }
        }

        match closed {
            Ok(()) => {
                log::debug!("Closed handle {:#x}", self.raw.0);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn check_param(param: Param, value: u64) -> Result<()> {
    match param {
        Param::QueueLength if !(QUEUE_LENGTH_MIN..=QUEUE_LENGTH_MAX).contains(&value) => {
            Err(DivertError::QueueLength(value))
        }
        Param::QueueTime if !(QUEUE_TIME_MIN..=QUEUE_TIME_MAX).contains(&value) => {
            Err(DivertError::QueueTime(value))
        }
        Param::QueueSize if !(QUEUE_SIZE_MIN..=QUEUE_SIZE_MAX).contains(&value) => {
            Err(DivertError::QueueSize(value))
        }
        Param::QueueLength | Param::QueueTime | Param::QueueSize => Ok(()),
        Param::VersionMajor | Param::VersionMinor => Err(DivertError::UnsupportedParam(param)),
    }
}
