//! The rtnetlink socket the status monitor listens on.

mod message;

use std::io;

use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};

pub(crate) use message::{Message, Messages, is_running};

/// Link changes plus IPv4 and IPv6 address changes.
pub(crate) const GROUPS: u32 =
    (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_IFADDR | libc::RTMGRP_IPV6_IFADDR) as u32;

/// Opens a `NETLINK_ROUTE` socket subscribed to the multicast `groups` bitmask.
pub(crate) fn route_socket(groups: u32) -> io::Result<Socket> {
    let mut socket = Socket::new(NETLINK_ROUTE)?;
    socket.bind(&SocketAddr::new(0, groups))?;

    Ok(socket)
}

/// Wraps an arbitrary socket, e.g. one end of a socketpair, as a netlink [`Socket`].
#[cfg(test)]
pub(crate) fn socket_from_fd(fd: std::os::fd::OwnedFd) -> Socket {
    use std::os::fd::{FromRawFd as _, IntoRawFd as _};

    // Safety: We own `fd` and hand it over to the `Socket`, which closes it on drop.
    unsafe { Socket::from_raw_fd(fd.into_raw_fd()) }
}

#[cfg(test)]
pub(crate) use message::{done, new_address, new_link};
