//! A netlink socket whose readiness wait can be interrupted from another thread.
//!
//! The socket is non-blocking. Its owner waits in [`CancellableSocket::ready_read`], which polls
//! the socket together with an eventfd. Signalling the eventfd through a [`Canceller`] makes
//! every current and future wait return `false`.

use std::io;
use std::os::fd::{AsFd as _, AsRawFd as _, BorrowedFd, OwnedFd};
use std::sync::Arc;

use netlink_sys::Socket;

use crate::sys;

pub(crate) struct CancellableSocket {
    socket: Socket,
    cancel: Arc<OwnedFd>,
}

/// The side channel of a [`CancellableSocket`].
#[derive(Debug, Clone)]
pub(crate) struct Canceller {
    cancel: Arc<OwnedFd>,
}

impl CancellableSocket {
    pub(crate) fn new(socket: Socket) -> io::Result<(Self, Canceller)> {
        let cancel = Arc::new(sys::eventfd(libc::EFD_NONBLOCK)?);
        let socket = Self {
            socket,
            cancel: cancel.clone(),
        };
        sys::set_non_blocking(socket.fd())?;

        Ok((socket, Canceller { cancel }))
    }

    fn fd(&self) -> BorrowedFd<'_> {
        // Safety: `self.socket` owns the descriptor and outlives the returned borrow.
        unsafe { BorrowedFd::borrow_raw(self.socket.as_raw_fd()) }
    }

    /// Receives one message without blocking.
    pub(crate) fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        sys::recv(self.fd(), buf)
    }

    /// Blocks until the socket has something to report or the wait got cancelled.
    ///
    /// Returns `false` once cancelled, even if the socket is readable as well.
    pub(crate) fn ready_read(&self) -> io::Result<bool> {
        let mut fds = [
            sys::pollfd(self.fd(), libc::POLLIN),
            sys::pollfd(self.cancel.as_fd(), libc::POLLIN),
        ];

        sys::poll(&mut fds)?;

        let [socket, cancel] = fds;

        Ok(cancel.revents == 0 && socket.revents != 0)
    }
}

impl Canceller {
    pub(crate) fn cancel(&self) -> io::Result<()> {
        match sys::write(self.cancel.as_fd(), &1u64.to_ne_bytes()) {
            Ok(_) => Ok(()),
            // The counter is saturated, so the eventfd is readable already.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Whether a failed receive should be retried after waiting for readiness.
pub(crate) fn retry_after_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
