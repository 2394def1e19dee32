//! Packet I/O on the TUN descriptor, including the optional packet-information header.

use std::os::fd::{AsFd as _, BorrowedFd, OwnedFd};
use std::sync::Arc;

use crate::{Error, Result, sys};

/// Length of the `struct tun_pi` header in front of every packet when `IFF_NO_PI` is not set.
pub const PACKET_INFO_LEN: usize = 4;

const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86dd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every packet is prefixed with flags and the EtherType of the payload.
    PacketInfo,
    /// The device was created with `IFF_NO_PI`.
    NoPacketInfo,
}

/// Builds the packet-information header for a packet starting with `first_byte`.
pub fn packet_info_header(first_byte: u8) -> [u8; PACKET_INFO_LEN] {
    let proto = match first_byte >> 4 {
        6 => ETH_P_IPV6,
        _ => ETH_P_IP,
    };
    let [hi, lo] = proto.to_be_bytes();

    [0x00, 0x00, hi, lo]
}

pub(crate) struct PacketIo {
    fd: Arc<OwnedFd>,
    framing: Framing,
    errors: flume::Receiver<Error>,
}

impl PacketIo {
    pub(crate) fn new(fd: Arc<OwnedFd>, framing: Framing, errors: flume::Receiver<Error>) -> Self {
        Self {
            fd,
            framing,
            errors,
        }
    }

    pub(crate) fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub(crate) fn framing(&self) -> Framing {
        self.framing
    }

    pub(crate) fn into_fd(self) -> Arc<OwnedFd> {
        self.fd
    }

    /// Reads one packet so that its first byte lands at `buf[offset]`.
    ///
    /// An error queued by the status monitor is returned instead of reading.
    pub(crate) fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        if let Ok(error) = self.errors.try_recv() {
            return Err(error);
        }

        match self.framing {
            Framing::NoPacketInfo => {
                let dst = buf
                    .get_mut(offset..)
                    .ok_or(Error::InvalidBuffer("offset is past the end of the buffer"))?;

                Ok(self.read_blocking(dst)?)
            }
            Framing::PacketInfo => {
                let start = offset
                    .checked_sub(PACKET_INFO_LEN)
                    .ok_or(Error::InvalidBuffer(
                        "no room for the packet-information header",
                    ))?;
                let dst = buf
                    .get_mut(start..)
                    .ok_or(Error::InvalidBuffer("offset is past the end of the buffer"))?;

                let n = self.read_blocking(dst)?;

                // Anything shorter than the header carries no packet.
                Ok(n.saturating_sub(PACKET_INFO_LEN))
            }
        }
    }

    /// Writes the packet starting at `buf[offset]`.
    ///
    /// With [`Framing::PacketInfo`] the four bytes in front of `offset` are overwritten with the
    /// header. Returns the number of bytes handed to the kernel, header included.
    pub(crate) fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
        match self.framing {
            Framing::NoPacketInfo => {
                let src = buf
                    .get(offset..)
                    .ok_or(Error::InvalidBuffer("offset is past the end of the buffer"))?;

                Ok(self.write_blocking(src)?)
            }
            Framing::PacketInfo => {
                let start = offset
                    .checked_sub(PACKET_INFO_LEN)
                    .ok_or(Error::InvalidBuffer(
                        "no room for the packet-information header",
                    ))?;
                let first_byte = *buf
                    .get(offset)
                    .ok_or(Error::InvalidBuffer("packet is empty"))?;

                let frame = &mut buf[start..];
                frame[..PACKET_INFO_LEN].copy_from_slice(&packet_info_header(first_byte));

                Ok(self.write_blocking(frame)?)
            }
        }
    }

    fn read_blocking(&self, dst: &mut [u8]) -> std::io::Result<usize> {
        let fd = self.fd.as_fd();

        sys::blocking(fd, libc::POLLIN, || sys::read(fd, dst))
    }

    fn write_blocking(&self, src: &[u8]) -> std::io::Result<usize> {
        let fd = self.fd.as_fd();

        sys::blocking(fd, libc::POLLOUT, || sys::write(fd, src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn pair(framing: Framing) -> (PacketIo, PacketIo, flume::Sender<Error>) {
        let (a, b) = sys::socketpair(libc::SOCK_SEQPACKET);
        let (errors_tx, errors_rx) = flume::bounded(crate::QUEUE_CAPACITY);

        (
            PacketIo::new(Arc::new(a), framing, errors_rx),
            PacketIo::new(Arc::new(b), framing, flume::bounded(1).1),
            errors_tx,
        )
    }

    fn ipv6_packet() -> Vec<u8> {
        let mut packet = vec![0x60, 0x00, 0x00, 0x00, 0x00, 0x08, 0x11, 0x40];
        packet.extend((0u8..40).map(|i| i.wrapping_mul(7)));

        packet
    }

    #[test_case(0x45, [0x00, 0x00, 0x08, 0x00]; "ipv4")]
    #[test_case(0x60, [0x00, 0x00, 0x86, 0xdd]; "ipv6")]
    #[test_case(0x00, [0x00, 0x00, 0x08, 0x00]; "unknown version defaults to ipv4")]
    fn header_reflects_ip_version(first_byte: u8, expected: [u8; 4]) {
        assert_eq!(packet_info_header(first_byte), expected);
    }

    #[test]
    fn framed_round_trip_preserves_payload() {
        let (writer, reader, _errors) = pair(Framing::PacketInfo);
        let packet = ipv6_packet();
        let offset = 16;

        let mut out = vec![0xaa; offset + packet.len()];
        out[offset..].copy_from_slice(&packet);
        let written = writer.write(&mut out, offset).unwrap();

        let mut input = vec![0u8; offset + 1500];
        let read = reader.read(&mut input, offset).unwrap();

        assert_eq!(written, packet.len() + PACKET_INFO_LEN);
        assert_eq!(read, packet.len());
        assert_eq!(&input[offset..offset + read], packet.as_slice());
    }

    #[test]
    fn framed_write_puts_header_on_the_wire() {
        let (a, b) = sys::socketpair(libc::SOCK_SEQPACKET);
        let writer = PacketIo::new(Arc::new(a), Framing::PacketInfo, flume::bounded(1).1);
        let raw = PacketIo::new(Arc::new(b), Framing::NoPacketInfo, flume::bounded(1).1);

        let mut out = [0u8; 4 + 20];
        out[4] = 0x45;
        writer.write(&mut out, 4).unwrap();

        let mut wire = [0u8; 64];
        let n = raw.read(&mut wire, 0).unwrap();

        assert_eq!(n, 24);
        assert_eq!(&wire[..4], &[0x00, 0x00, 0x08, 0x00]);
        assert_eq!(wire[4], 0x45);
    }

    #[test]
    fn unframed_io_is_pass_through() {
        let (writer, reader, _errors) = pair(Framing::NoPacketInfo);

        let mut out = *b"xxxxhello";
        assert_eq!(writer.write(&mut out, 4).unwrap(), 5);

        let mut input = [0u8; 16];
        assert_eq!(reader.read(&mut input, 2).unwrap(), 5);
        assert_eq!(&input[2..7], b"hello");
    }

    #[test]
    fn short_frame_reads_as_empty() {
        let (a, b) = sys::socketpair(libc::SOCK_SEQPACKET);
        let reader = PacketIo::new(Arc::new(a), Framing::PacketInfo, flume::bounded(1).1);

        sys::write(b.as_fd(), &[0x00, 0x00]).unwrap();

        let mut input = [0u8; 64];
        assert_eq!(reader.read(&mut input, 4).unwrap(), 0);
    }

    #[test]
    fn pending_error_is_returned_before_reading() {
        let (reader, writer, errors) = pair(Framing::PacketInfo);

        let mut out = ipv6_packet();
        out.splice(0..0, [0u8; 4]);
        writer.write(&mut out, 4).unwrap();
        errors
            .try_send(Error::socket("failed to receive netlink message")(
                std::io::Error::from_raw_os_error(libc::ENOBUFS),
            ))
            .unwrap();

        let mut input = [0u8; 128];
        let error = reader.read(&mut input, 4).unwrap_err();
        assert!(matches!(error, Error::Socket { .. }));
        assert_eq!(input, [0u8; 128], "nothing was read from the device");

        assert_eq!(reader.read(&mut input, 4).unwrap(), ipv6_packet().len());
    }

    #[test_case(0, 10; "offset without header room")]
    #[test_case(3, 10; "offset one short of header room")]
    fn framed_write_rejects_small_offset(offset: usize, len: usize) {
        let (writer, _reader, _errors) = pair(Framing::PacketInfo);

        let error = writer.write(&mut vec![0x45; len], offset).unwrap_err();

        assert!(matches!(error, Error::InvalidBuffer(_)));
    }

    #[test]
    fn framed_write_rejects_empty_packet() {
        let (writer, _reader, _errors) = pair(Framing::PacketInfo);

        let error = writer.write(&mut [0u8; 4], 4).unwrap_err();

        assert!(matches!(error, Error::InvalidBuffer(_)));
    }

    #[test]
    fn read_rejects_offset_past_end() {
        let (_writer, reader, _errors) = pair(Framing::NoPacketInfo);

        let error = reader.read(&mut [0u8; 4], 5).unwrap_err();

        assert!(matches!(error, Error::InvalidBuffer(_)));
    }
}
