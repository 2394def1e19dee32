//! `ifreq` based control calls.
//!
//! The request is kept as a plain byte array; every field is encoded and decoded explicitly at
//! its kernel offset in native byte order.

use std::{
    io,
    os::fd::{AsRawFd as _, BorrowedFd, OwnedFd},
};

pub(crate) const TUNSETIFF: libc::c_ulong = libc::TUNSETIFF as libc::c_ulong;
pub(crate) const TUNGETIFF: libc::c_ulong = libc::TUNGETIFF as libc::c_ulong;

/// Size of `struct ifreq` on 64-bit targets, large enough for 32-bit ones.
pub(crate) const IFREQ_SIZE: usize = 40;

const NAME_LEN: usize = libc::IFNAMSIZ;

/// Executes the `ioctl` syscall on the given file descriptor with the provided request.
///
/// # Safety
///
/// `code` must be a request that reads and writes at most a `struct ifreq`.
pub(crate) unsafe fn exec(
    fd: BorrowedFd<'_>,
    code: libc::c_ulong,
    req: &mut Request,
) -> io::Result<()> {
    // Safety: `req` is a full `struct ifreq`, which the caller vouches is all `code` touches.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), code as _, req.bytes.as_mut_ptr()) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// A `struct ifreq`: the interface name followed by a request-specific union.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(8))]
pub(crate) struct Request {
    bytes: [u8; IFREQ_SIZE],
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            bytes: [0u8; IFREQ_SIZE],
        }
    }

    /// Creates a request addressed to the interface `name`.
    ///
    /// Fails if the name does not fit into `IFNAMSIZ` including its terminating NUL.
    pub(crate) fn with_name(name: &str) -> io::Result<Self> {
        let name_as_bytes = name.as_bytes();

        if name_as_bytes.len() >= NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Interface name `{name}` is longer than {} bytes",
                    NAME_LEN - 1
                ),
            ));
        }
        if name_as_bytes.contains(&0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Interface name contains a NUL byte",
            ));
        }

        let mut req = Self::new();
        req.bytes[..name_as_bytes.len()].copy_from_slice(name_as_bytes);

        Ok(req)
    }

    /// The interface name, up to the first NUL.
    pub(crate) fn name(&self) -> String {
        let name = &self.bytes[..NAME_LEN];
        let end = name.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);

        String::from_utf8_lossy(&name[..end]).into_owned()
    }

    /// `ifr_flags`
    pub(crate) fn flags(&self) -> u16 {
        u16::from_ne_bytes([self.bytes[NAME_LEN], self.bytes[NAME_LEN + 1]])
    }

    pub(crate) fn set_flags(&mut self, flags: u16) {
        self.bytes[NAME_LEN..NAME_LEN + 2].copy_from_slice(&flags.to_ne_bytes());
    }

    /// `ifr_ifindex` and `ifr_mtu` share this slot.
    pub(crate) fn int(&self) -> i32 {
        let mut int = [0u8; 4];
        int.copy_from_slice(&self.bytes[NAME_LEN..NAME_LEN + 4]);

        i32::from_ne_bytes(int)
    }

    pub(crate) fn set_int(&mut self, value: i32) {
        self.bytes[NAME_LEN..NAME_LEN + 4].copy_from_slice(&value.to_ne_bytes());
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("name", &self.name())
            .field("int", &self.int())
            .finish()
    }
}

/// Opens the throwaway datagram socket the `SIOC*` requests are issued on.
pub(crate) fn control_socket() -> io::Result<OwnedFd> {
    crate::sys::socket(libc::AF_INET, libc::SOCK_DGRAM, 0)
}
