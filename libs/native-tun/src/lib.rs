//! A Linux TUN device with optional packet-information framing and link-state monitoring.
//!
//! [`NativeTun`] owns the kernel descriptor. When created through [`NativeTun::create`] or
//! [`NativeTun::attach`] it also runs two monitoring threads that report [`Event`]s:
//!
//! - a status monitor listening on an rtnetlink socket for link changes of this interface,
//! - a fallback poller probing the device with zero-length writes, for setups where netlink
//!   notifications don't cross a network namespace boundary.
//!
//! Both feed the same bounded queue, see [`NativeTun::events`]. Errors of the monitor are handed
//! to the next [`NativeTun::read`].

#![cfg_attr(test, allow(clippy::unwrap_used))]

#[cfg(target_os = "linux")]
mod cancel;
mod error;
#[cfg(target_os = "linux")]
mod ioctl;
#[cfg(target_os = "linux")]
mod monitor;
#[cfg(target_os = "linux")]
mod netlink;
#[cfg(target_os = "linux")]
mod packet;
#[cfg(target_os = "linux")]
mod poller;
mod shutdown;
#[cfg(target_os = "linux")]
mod sys;
#[cfg(target_os = "linux")]
mod tun;

use std::time::Duration;

pub use error::{Error, Result};
#[cfg(target_os = "linux")]
pub use packet::{Framing, PACKET_INFO_LEN, packet_info_header};
#[cfg(target_os = "linux")]
pub use tun::NativeTun;

/// Capacity of the event queue and of the pending-error queue.
pub const QUEUE_CAPACITY: usize = 5;

/// How long the fallback poller waits between two zero-length writes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A change in the state of a TUN device.
///
/// Events carry no payload, re-query the device (e.g. [`Device::mtu`]) to learn the new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Up,
    Down,
    MtuUpdate,
}

/// Packet I/O and metadata of a TUN device.
pub trait Device: Send + Sync {
    /// Reads one packet into `buf`, placing the IP header at `offset`.
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Writes the packet starting at `offset`, the bytes in front of it may be used for framing.
    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    fn flush(&self) -> Result<()>;

    fn mtu(&self) -> Result<u32>;

    /// The name of the interface as currently reported by the kernel.
    fn name(&self) -> Result<String>;

    /// The receiving end of the event queue.
    ///
    /// The queue is closed once monitoring has fully stopped.
    fn events(&self) -> flume::Receiver<Event>;

    fn close(self) -> Result<()>
    where
        Self: Sized;
}
