//! Background pump turning a session's receive queue into a stream of packets.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::address::Address;
use crate::error::{DivertError, Result};
use crate::handle::Inner;
use crate::packet::Packet;
use crate::types::Status;

/// Receive buffer allocated per packet.
pub const PUMP_BUFFER_LEN: usize = 1500;

/// Packets buffered between the pump and its consumers.
pub const STREAM_CAPACITY: usize = 256;

/// Events received by a background pump, in the order the pump read them.
/// Every event is published, including flow, socket and reflect events that
/// carry no IP header.
///
/// The stream ends when the pump stops: after a receive error, once the
/// handle is shut down or closed, or when every consumer is gone.
#[derive(Debug)]
pub struct PacketStream {
    rx: Receiver<Packet>,
}

impl PacketStream {
    pub(crate) fn spawn(inner: Arc<Inner>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(STREAM_CAPACITY);
        thread::Builder::new()
            .name(format!("divert-pump-{:x}", inner.raw().0))
            .spawn(move || run_pump(inner, tx))
            .map_err(|e| DivertError::Spawn(e.to_string()))?;
        Ok(Self { rx })
    }

    /// Block for the next packet. `None` once the stream has ended.
    pub fn recv(&self) -> Option<Packet> {
        self.rx.recv().ok()
    }

    /// `Empty` while the pump is alive but has nothing queued,
    /// `Disconnected` once the stream has ended.
    pub fn try_recv(&self) -> std::result::Result<Packet, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<Packet, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Another consumer of the same stream.
    pub fn receiver(&self) -> Receiver<Packet> {
        self.rx.clone()
    }
}

impl Iterator for PacketStream {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        self.recv()
    }
}

fn run_pump(inner: Arc<Inner>, tx: Sender<Packet>) {
    let raw = inner.raw().0;
    log::debug!("Packet pump started for handle {:#x}", raw);

    while inner.status() == Status::Open {
        let mut buf = vec![0u8; PUMP_BUFFER_LEN];
        let mut addr = Address::new();

        let read = match inner.recv(&mut buf, &mut addr) {
            Ok(read) => read,
            Err(e) => {
                log::debug!("Packet pump for handle {:#x} stopped receiving: {}", raw, e);
                break;
            }
        };
        buf.truncate(read);

        if tx.send(Packet::new(buf, addr)).is_err() {
            log::debug!("Packet stream for handle {:#x} has no consumers", raw);
            break;
        }
    }

    log::debug!("Packet pump stopped for handle {:#x}", raw);
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::handle::Handle;
    use crate::header::tests::{ipv6_icmp, IPV4_UDP};
    use crate::types::{Event, Flags, Layer, ShutdownHow};

    fn open_fake() -> (Arc<FakeDriver>, Handle) {
        let _ = env_logger::builder().is_test(true).try_init();
        let fake = Arc::new(FakeDriver::new());
        let handle = Handle::open_raw(fake.clone(), "true", Layer::Network, 0, Flags::DEFAULT)
            .unwrap();
        (fake, handle)
    }

    fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_stream_preserves_order() {
        let (fake, handle) = open_fake();
        fake.push(&IPV4_UDP, Address::new());
        fake.push(&ipv6_icmp(), Address::new());

        let stream = handle.packets().unwrap();
        let first = stream.recv().unwrap();
        assert_eq!(first.raw(), &IPV4_UDP);
        assert_eq!(first.dst_ip(), Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 199))));
        let second = stream.recv().unwrap();
        assert_eq!(second.raw().len(), 40);
        assert_eq!(second.header().map(|h| h.version()), Some(6));

        handle.close().unwrap();
        assert!(stream.recv().is_none());
    }

    #[test]
    fn test_stream_delivers_flow_events() {
        let fake = Arc::new(FakeDriver::new());
        let handle =
            Handle::open_raw(fake.clone(), "true", Layer::Flow, 0, Flags::SNIFF | Flags::RECV_ONLY)
                .unwrap();
        for _ in 0..3 {
            let mut flow = Address::new();
            flow.set_layer(Layer::Flow);
            flow.set_event(Event::FlowEstablished);
            fake.push(&[], flow);
        }

        let stream = handle.packets().unwrap();
        for _ in 0..3 {
            let event = stream.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(event.header().is_none());
            assert!(event.raw().is_empty());
            assert_eq!(event.addr().layer(), Some(Layer::Flow));
            assert_eq!(event.addr().event(), Some(Event::FlowEstablished));
        }
        handle.close().unwrap();
        assert!(stream.recv().is_none());
    }

    #[test]
    fn test_stream_keeps_non_ip_buffers_in_order() {
        let (fake, handle) = open_fake();
        fake.push(&[0x50; 8], Address::new());
        fake.push(&IPV4_UDP, Address::new());

        let stream = handle.packets().unwrap();
        let first = stream.recv().unwrap();
        assert_eq!(first.raw(), &[0x50; 8]);
        assert!(first.header_error().is_some());
        let second = stream.recv().unwrap();
        assert_eq!(second.raw(), &IPV4_UDP);
        handle.close().unwrap();
    }

    #[test]
    fn test_stream_requires_open_handle() {
        let (fake, handle) = open_fake();
        handle.shutdown(ShutdownHow::Recv).unwrap();
        let calls = fake.recv_calls();
        assert_eq!(handle.packets().unwrap_err(), DivertError::NotOpen);
        assert_eq!(fake.recv_calls(), calls);
    }

    #[test]
    fn test_shutdown_ends_stream() {
        let (fake, handle) = open_fake();
        fake.push(&IPV4_UDP, Address::new());
        let stream = handle.packets().unwrap();
        assert!(stream.recv().is_some());

        wait_until(|| fake.recv_waiting() == 1);
        let reads = fake.recv_calls();
        handle.shutdown(ShutdownHow::Both).unwrap();

        assert!(stream.recv().is_none());
        assert!(matches!(stream.try_recv(), Err(TryRecvError::Disconnected)));
        // The read in flight at shutdown was the last one issued.
        assert_eq!(fake.recv_calls(), reads);
    }

    #[test]
    fn test_empty_but_open() {
        let (fake, handle) = open_fake();
        let stream = handle.packets().unwrap();
        wait_until(|| fake.recv_waiting() == 1);
        assert!(matches!(stream.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(5)),
            Err(RecvTimeoutError::Timeout)
        ));
        handle.close().unwrap();
        assert!(stream.recv().is_none());
    }

    #[test]
    fn test_pump_exits_without_consumers() {
        let (fake, handle) = open_fake();
        let stream = handle.packets().unwrap();
        wait_until(|| fake.recv_waiting() == 1);
        drop(stream);

        fake.push(&IPV4_UDP, Address::new());
        wait_until(|| fake.recv_waiting() == 0);
        thread::sleep(Duration::from_millis(10));
        // The pump gave up after failing to publish instead of reading again.
        assert_eq!(fake.recv_calls(), 1);
        handle.close().unwrap();
    }

    #[test]
    fn test_iterator() {
        let (fake, handle) = open_fake();
        for _ in 0..3 {
            fake.push(&IPV4_UDP, Address::new());
        }
        let stream = handle.packets().unwrap();
        let taken: Vec<Packet> = stream.take(3).collect();
        assert_eq!(taken.len(), 3);
        handle.close().unwrap();
    }
}
