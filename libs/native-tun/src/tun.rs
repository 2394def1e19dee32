use std::ffi::CStr;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::cancel::{CancellableSocket, Canceller};
use crate::ioctl::{self, TUNGETIFF, TUNSETIFF};
use crate::monitor::StatusMonitor;
use crate::netlink;
use crate::packet::{Framing, PacketIo};
use crate::poller::Poller;
use crate::shutdown::{self, ShutdownSignal};
use crate::{Device, Error, Event, POLL_INTERVAL, QUEUE_CAPACITY, Result, sys};

const TUN_FILE: &CStr = c"/dev/net/tun";

/// A TUN device backed by a file descriptor.
///
/// Dropping the device performs the same teardown as [`NativeTun::close`] but can only log
/// failures.
pub struct NativeTun {
    // Must be declared before `io`, so the threads are gone before the descriptor is closed.
    status: Status,
    io: PacketIo,
    name: Mutex<String>,
    index: Option<u32>,
    events: flume::Receiver<Event>,
}

enum Status {
    Monitored(Monitoring),
    /// Nothing runs that could close the event queue, so we hold its only sender.
    Unmonitored(flume::Sender<Event>),
}

impl NativeTun {
    /// Creates the TUN interface `name` and starts monitoring it.
    pub fn create(name: &str, mtu: u32) -> Result<Self> {
        let mut req = ioctl::Request::with_name(name).map_err(Error::DeviceCreate)?;
        // Keep the packet-information header, the fallback poller relies on it.
        req.set_flags(libc::IFF_TUN as u16);

        let fd = sys::open(TUN_FILE, libc::O_RDWR).map_err(Error::DeviceCreate)?;

        // Safety: `TUNSETIFF` operates on a `struct ifreq`.
        unsafe { ioctl::exec(fd.as_fd(), TUNSETIFF, &mut req) }.map_err(Error::DeviceCreate)?;
        sys::set_non_blocking(fd.as_fd()).map_err(Error::DeviceCreate)?;

        tracing::debug!(%name, "Created TUN device");

        Self::attach(fd, mtu)
    }

    /// Takes over an attached TUN descriptor, sets its MTU and starts monitoring it.
    ///
    /// The descriptor must carry the packet-information header, i.e. not use `IFF_NO_PI`.
    pub fn attach(fd: OwnedFd, mtu: u32) -> Result<Self> {
        let name = query_name(fd.as_fd())?;
        let index = interface_index(&name)?;
        let socket = netlink::route_socket(netlink::GROUPS)
            .map_err(Error::socket("failed to open netlink socket"))?;

        let tun = Self::monitored(fd, name, index, socket)?;
        tun.set_mtu(mtu)?;

        Ok(tun)
    }

    /// Takes over a TUN descriptor that someone else configured, without monitoring it.
    ///
    /// The descriptor must have been created with `IFF_NO_PI`. The event queue stays empty and is
    /// closed together with the device.
    pub fn attach_unmonitored(fd: OwnedFd) -> Result<Self> {
        sys::set_non_blocking(fd.as_fd()).map_err(Error::DeviceCreate)?;
        let name = query_name(fd.as_fd())?;

        let (events_tx, events_rx) = flume::bounded(QUEUE_CAPACITY);
        let (_, errors_rx) = flume::bounded(QUEUE_CAPACITY);

        tracing::debug!(%name, "Attached to unmonitored TUN device");

        Ok(Self {
            status: Status::Unmonitored(events_tx),
            io: PacketIo::new(Arc::new(fd), Framing::NoPacketInfo, errors_rx),
            name: Mutex::new(name),
            index: None,
            events: events_rx,
        })
    }

    fn monitored(
        fd: OwnedFd,
        name: String,
        index: u32,
        socket: netlink_sys::Socket,
    ) -> Result<Self> {
        let (socket, canceller) =
            CancellableSocket::new(socket).map_err(Error::socket("failed to create eventfd"))?;
        let fd = Arc::new(fd);
        let (events_tx, events_rx) = flume::bounded(QUEUE_CAPACITY);
        let (errors_tx, errors_rx) = flume::bounded(QUEUE_CAPACITY);
        let (signal, listener) = shutdown::signal();
        let (poller_done, completion) = shutdown::completion();

        let mut monitoring = Monitoring {
            signal,
            canceller,
            poller: None,
            monitor: None,
        };

        monitoring.poller = Some(
            Poller {
                fd: fd.clone(),
                events: events_tx.clone(),
                shutdown: listener.clone(),
                interval: POLL_INTERVAL,
                done: poller_done,
            }
            .spawn(&name)?,
        );
        monitoring.monitor = Some(
            StatusMonitor {
                socket,
                index,
                events: events_tx,
                errors: errors_tx,
                shutdown: listener,
                poller_done: completion,
            }
            .spawn(&name)?,
        );

        tracing::debug!(%name, %index, "Monitoring TUN device");

        Ok(Self {
            status: Status::Monitored(monitoring),
            io: PacketIo::new(fd, Framing::PacketInfo, errors_rx),
            name: Mutex::new(name),
            index: Some(index),
            events: events_rx,
        })
    }

    /// Reads one packet into `buf`, the IP header starting at `offset`.
    ///
    /// With packet information enabled, `offset` must leave room for [`crate::PACKET_INFO_LEN`]
    /// bytes in front of it. A pending error of the status monitor is returned first.
    pub fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.io.read(buf, offset)
    }

    /// Writes the IP packet at `buf[offset..]`.
    pub fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        self.io.write(buf, offset)
    }

    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    pub fn framing(&self) -> Framing {
        self.io.framing()
    }

    /// The receiving end of the event queue.
    ///
    /// The queue closes once monitoring has fully stopped.
    pub fn events(&self) -> flume::Receiver<Event> {
        self.events.clone()
    }

    /// Queries the kernel for the current interface name.
    pub fn name(&self) -> Result<String> {
        let name = query_name(self.io.fd())?;
        *self.name.lock() = name.clone();

        Ok(name)
    }

    /// Interface index resolved at creation, `None` for unmonitored devices.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn mtu(&self) -> Result<u32> {
        let mut req = self.request().map_err(Error::MtuQuery)?;

        control(libc::SIOCGIFMTU, &mut req).map_err(Error::MtuQuery)?;

        u32::try_from(req.int()).map_err(|_| {
            Error::MtuQuery(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Kernel reported negative MTU {}", req.int()),
            ))
        })
    }

    pub fn set_mtu(&self, mtu: u32) -> Result<()> {
        let mtu = i32::try_from(mtu).map_err(|_| {
            Error::MtuSet(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("MTU {mtu} is out of range"),
            ))
        })?;
        let mut req = self.request().map_err(Error::MtuSet)?;
        req.set_int(mtu);

        control(libc::SIOCSIFMTU, &mut req).map_err(Error::MtuSet)?;

        tracing::debug!(%mtu, "Set MTU of TUN device");

        Ok(())
    }

    /// Whether the interface is administratively up.
    pub fn is_up(&self) -> Result<bool> {
        let mut req = self.request().map_err(Error::query("flags"))?;

        control(libc::SIOCGIFFLAGS, &mut req).map_err(Error::query("flags"))?;

        Ok(req.flags() & libc::IFF_UP as u16 != 0)
    }

    /// Stops monitoring and closes the descriptor.
    ///
    /// Returns the first failure: not being able to cancel the netlink wait, or else failing to
    /// close the descriptor.
    pub fn close(self) -> Result<()> {
        let Self { status, io, .. } = self;

        let stopped = match status {
            Status::Monitored(mut monitoring) => monitoring.stop(),
            Status::Unmonitored(events) => {
                drop(events);
                Ok(())
            }
        };

        let closed = match Arc::try_unwrap(io.into_fd()) {
            Ok(fd) => sys::close(fd).map_err(Error::Close),
            Err(_) => {
                tracing::debug!("TUN descriptor still shared, closing it with its last user");
                Ok(())
            }
        };

        stopped?;
        closed
    }

    fn request(&self) -> io::Result<ioctl::Request> {
        ioctl::Request::with_name(&self.name.lock())
    }
}

struct Monitoring {
    signal: ShutdownSignal,
    canceller: Canceller,
    poller: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Monitoring {
    fn stop(&mut self) -> Result<()> {
        if self.signal.is_raised() {
            return Ok(());
        }

        self.signal.raise();
        let cancelled = self.canceller.cancel().map_err(Error::Cancellation);

        join(self.poller.take(), "fallback poller");

        // Without a successful cancel the monitor may be stuck in `poll` for good.
        if cancelled.is_ok() {
            join(self.monitor.take(), "status monitor");
        }

        cancelled
    }
}

impl Drop for Monitoring {
    fn drop(&mut self) {
        logging::unwrap_or_warn!(self.stop(), "Failed to stop TUN monitoring: {}");
    }
}

fn join(handle: Option<JoinHandle<()>>, what: &str) {
    let Some(handle) = handle else {
        return;
    };

    if handle.join().is_err() {
        tracing::error!("The {what} thread panicked");
    }
}

fn query_name(fd: BorrowedFd<'_>) -> Result<String> {
    let mut req = ioctl::Request::new();

    // Safety: `TUNGETIFF` operates on a `struct ifreq`.
    unsafe { ioctl::exec(fd, TUNGETIFF, &mut req) }.map_err(Error::query("name"))?;

    Ok(req.name())
}

fn interface_index(name: &str) -> Result<u32> {
    let mut req = ioctl::Request::with_name(name).map_err(Error::query("interface index"))?;

    control(libc::SIOCGIFINDEX, &mut req).map_err(Error::query("interface index"))?;

    u32::try_from(req.int()).map_err(|_| {
        Error::query("interface index")(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Kernel reported negative interface index {}", req.int()),
        ))
    })
}

/// Issues a `SIOC*` request on a throwaway datagram socket.
fn control(code: libc::c_ulong, req: &mut ioctl::Request) -> io::Result<()> {
    let socket = ioctl::control_socket()?;

    // Safety: All `SIOC*` requests we use operate on a `struct ifreq`.
    unsafe { ioctl::exec(socket.as_fd(), code, req) }
}

impl AsFd for NativeTun {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.io.fd()
    }
}

impl AsRawFd for NativeTun {
    fn as_raw_fd(&self) -> RawFd {
        self.io.fd().as_raw_fd()
    }
}

impl std::fmt::Debug for NativeTun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTun")
            .field("name", &*self.name.lock())
            .field("index", &self.index)
            .field("framing", &self.io.framing())
            .finish_non_exhaustive()
    }
}

impl Device for NativeTun {
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        NativeTun::read(self, buf, offset)
    }

    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        NativeTun::write(self, buf, offset)
    }

    fn flush(&self) -> Result<()> {
        NativeTun::flush(self)
    }

    fn mtu(&self) -> Result<u32> {
        NativeTun::mtu(self)
    }

    fn name(&self) -> Result<String> {
        NativeTun::name(self)
    }

    fn events(&self) -> flume::Receiver<Event> {
        NativeTun::events(self)
    }

    fn close(self) -> Result<()> {
        NativeTun::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{new_link, socket_from_fd};
    use netlink_packet_route::link::LinkFlags;
    use std::time::Duration;

    const INDEX: u32 = 4;
    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A monitored device whose descriptor and netlink socket are socketpairs.
    ///
    /// Zero-length writes succeed on a socketpair, so the fallback poller stops right away.
    fn fake_device() -> (NativeTun, OwnedFd, OwnedFd) {
        let (tun, tun_peer) = sys::socketpair(libc::SOCK_SEQPACKET);
        let (netlink, netlink_peer) = sys::socketpair(libc::SOCK_DGRAM);

        let device =
            NativeTun::monitored(tun, "fake0".to_owned(), INDEX, socket_from_fd(netlink)).unwrap();

        (device, tun_peer, netlink_peer)
    }

    #[test]
    fn close_closes_event_queue() {
        let _guard = logging::test("debug");
        let (device, _tun_peer, _netlink_peer) = fake_device();
        let events = device.events();

        device.close().unwrap();

        assert_eq!(
            events.recv_timeout(TIMEOUT),
            Err(flume::RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn reports_link_state_of_own_interface() {
        let (device, _tun_peer, netlink_peer) = fake_device();
        let events = device.events();

        sys::write(
            netlink_peer.as_fd(),
            &new_link(INDEX + 1, LinkFlags::Running),
        )
        .unwrap();
        sys::write(netlink_peer.as_fd(), &new_link(INDEX, LinkFlags::Running)).unwrap();

        assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), Event::Up);
        assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), Event::MtuUpdate);

        device.close().unwrap();
        assert!(events.iter().next().is_none());
    }

    #[test]
    fn close_does_not_hang_on_full_event_queue() {
        let (device, _tun_peer, netlink_peer) = fake_device();
        let events = device.events();

        for _ in 0..QUEUE_CAPACITY {
            sys::write(netlink_peer.as_fd(), &new_link(INDEX, LinkFlags::empty())).unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));

        device.close().unwrap();

        let drained = events.iter().collect::<Vec<_>>();
        assert!(drained.len() <= QUEUE_CAPACITY);
        assert!(events.is_disconnected());
    }

    #[test]
    fn monitor_failure_surfaces_on_next_read() {
        let (tun, tun_peer) = sys::socketpair(libc::SOCK_SEQPACKET);
        let (netlink, netlink_peer) = sys::socketpair(libc::SOCK_SEQPACKET);
        let device =
            NativeTun::monitored(tun, "fake0".to_owned(), INDEX, socket_from_fd(netlink)).unwrap();
        let events = device.events();

        drop(netlink_peer);
        assert_eq!(
            events.recv_timeout(TIMEOUT),
            Err(flume::RecvTimeoutError::Disconnected)
        );

        sys::write(tun_peer.as_fd(), &[0, 0, 0x08, 0x00, 0x45]).unwrap();
        let mut buf = [0u8; 64];
        let error = device.read(&mut buf, 4).unwrap_err();
        assert!(matches!(error, Error::Socket { .. }), "{error:?}");

        assert_eq!(device.read(&mut buf, 4).unwrap(), 1);
        assert_eq!(buf[4], 0x45);

        device.close().unwrap();
    }

    #[test]
    fn packets_are_framed_on_monitored_devices() {
        let (device, tun_peer, _netlink_peer) = fake_device();

        let mut packet = [0u8; 4 + 8];
        packet[4] = 0x60;
        assert_eq!(device.write(&mut packet, 4).unwrap(), 12);

        // Skip the empty records left by the fallback poller's zero-length writes.
        let mut wire = [0u8; 32];
        let n = std::iter::repeat_with(|| sys::read(tun_peer.as_fd(), &mut wire).unwrap())
            .find(|n| *n > 0)
            .unwrap();
        assert_eq!(n, 12);
        assert_eq!(&wire[..4], &[0x00, 0x00, 0x86, 0xdd]);
        assert_eq!(device.framing(), Framing::PacketInfo);
        assert_eq!(device.index(), Some(INDEX));

        device.close().unwrap();
    }

    #[test]
    fn drop_stops_monitoring() {
        let (device, _tun_peer, _netlink_peer) = fake_device();
        let events = device.events();

        drop(device);

        assert_eq!(
            events.recv_timeout(TIMEOUT),
            Err(flume::RecvTimeoutError::Disconnected)
        );
    }
}
