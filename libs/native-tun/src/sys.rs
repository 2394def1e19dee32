//! Thin wrappers around the libc calls used on TUN and netlink descriptors.

use std::ffi::CStr;
use std::io;
use std::os::fd::{AsRawFd as _, BorrowedFd, FromRawFd as _, IntoRawFd as _, OwnedFd};

pub(crate) fn last_error() -> io::Error {
    io::Error::last_os_error()
}

pub(crate) fn open(path: &CStr, flags: libc::c_int) -> io::Result<OwnedFd> {
    // Safety: `path` is NUL-terminated.
    match unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC) } {
        -1 => Err(last_error()),
        // Safety: `open` just handed us this descriptor.
        fd => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
    }
}

pub(crate) fn socket(
    domain: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
) -> io::Result<OwnedFd> {
    // Safety: `socket` takes no pointers.
    match unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, protocol) } {
        -1 => Err(last_error()),
        // Safety: `socket` just handed us this descriptor.
        fd => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
    }
}

pub(crate) fn eventfd(flags: libc::c_int) -> io::Result<OwnedFd> {
    // Safety: `eventfd` takes no pointers.
    match unsafe { libc::eventfd(0, flags | libc::EFD_CLOEXEC) } {
        -1 => Err(last_error()),
        // Safety: `eventfd` just handed us this descriptor.
        fd => Ok(unsafe { OwnedFd::from_raw_fd(fd) }),
    }
}

pub(crate) fn set_non_blocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let fd = fd.as_raw_fd();

    // Safety: `F_GETFL` takes no argument.
    match unsafe { libc::fcntl(fd, libc::F_GETFL) } {
        -1 => Err(last_error()),
        // Safety: `F_SETFL` takes an integer argument.
        flags => match unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } {
            -1 => Err(last_error()),
            _ => Ok(()),
        },
    }
}

/// Reads from the descriptor once, without waiting for readiness.
pub(crate) fn read(fd: BorrowedFd<'_>, dst: &mut [u8]) -> io::Result<usize> {
    // Safety: `dst` is valid for writes of `dst.len()` bytes.
    match unsafe { libc::read(fd.as_raw_fd(), dst.as_mut_ptr().cast(), dst.len()) } {
        -1 => Err(last_error()),
        n => Ok(n as usize),
    }
}

/// Writes to the descriptor once, without waiting for readiness.
pub(crate) fn write(fd: BorrowedFd<'_>, src: &[u8]) -> io::Result<usize> {
    // Safety: `src` is valid for reads of `src.len()` bytes.
    match unsafe { libc::write(fd.as_raw_fd(), src.as_ptr().cast(), src.len()) } {
        -1 => Err(last_error()),
        n => Ok(n as usize),
    }
}

pub(crate) fn recv(fd: BorrowedFd<'_>, dst: &mut [u8]) -> io::Result<usize> {
    // Safety: `dst` is valid for writes of `dst.len()` bytes.
    match unsafe { libc::recv(fd.as_raw_fd(), dst.as_mut_ptr().cast(), dst.len(), 0) } {
        -1 => Err(last_error()),
        n => Ok(n as usize),
    }
}

/// Blocks until `events` are signalled on `fds`, retrying on `EINTR`.
pub(crate) fn poll(fds: &mut [libc::pollfd]) -> io::Result<()> {
    loop {
        // Safety: `fds` is valid for `fds.len()` entries.
        match unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) } {
            -1 => {
                let error = last_error();

                if error.kind() == io::ErrorKind::Interrupted {
                    continue;
                }

                return Err(error);
            }
            _ => return Ok(()),
        }
    }
}

pub(crate) fn pollfd(fd: BorrowedFd<'_>, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd: fd.as_raw_fd(),
        events,
        revents: 0,
    }
}

/// Runs `op` until it stops returning `WouldBlock`, waiting for `events` in between.
pub(crate) fn blocking<T>(
    fd: BorrowedFd<'_>,
    events: libc::c_short,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                poll(&mut [pollfd(fd, events)])?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

/// Closes the descriptor and reports the result of `close(2)`, unlike dropping an [`OwnedFd`].
pub(crate) fn close(fd: OwnedFd) -> io::Result<()> {
    // Safety: `into_raw_fd` released ownership, so nothing closes the descriptor a second time.
    match unsafe { libc::close(fd.into_raw_fd()) } {
        -1 => Err(last_error()),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn socketpair(ty: libc::c_int) -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];

    // Safety: `fds` has room for the two descriptors.
    let ret =
        unsafe { libc::socketpair(libc::AF_UNIX, ty | libc::SOCK_CLOEXEC, 0, fds.as_mut_ptr()) };
    assert_eq!(ret, 0, "socketpair failed: {}", last_error());

    // Safety: `socketpair` just handed us both descriptors.
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}
