//! Decoding of rtnetlink receive buffers.
//!
//! A buffer holds a sequence of `nlmsghdr`-prefixed records. [`Messages`] validates each record's
//! declared length with [`NetlinkBuffer::new_checked`] before it decodes anything, and only
//! decodes the payload of `RTM_NEWLINK` records.

use netlink_packet_core::{DecodeError, NetlinkBuffer, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::{LinkFlags, LinkMessage};

const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
const NLMSG_ALIGNTO: usize = 4;
/// Size of `nlmsghdr`; `netlink_packet_core` keeps its own copy of this constant private.
const NETLINK_HEADER_LEN: usize = size_of::<libc::nlmsghdr>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    /// `NLMSG_DONE`, nothing after it in the buffer is looked at.
    Done,
    NewLink(LinkMessage),
    Other {
        kind: u16,
    },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ParseError {
    #[error("Netlink message declares {0} bytes, less than its own header")]
    LengthUnderflow(usize),
    #[error("Malformed netlink message")]
    Decode(#[from] DecodeError),
}

pub(crate) fn is_running(link: &LinkMessage) -> bool {
    link.header.flags.contains(LinkFlags::Running)
}

/// Cursor over the records of one receive buffer.
///
/// Yields `Err` at most once; iteration stops after an error or after [`Message::Done`].
#[derive(Debug, Clone)]
pub(crate) struct Messages<'a> {
    remaining: &'a [u8],
}

impl<'a> Messages<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { remaining: buf }
    }

    fn next_message(&mut self) -> Result<Message, ParseError> {
        let record = NetlinkBuffer::new_checked(self.remaining)?;
        let len = record.length() as usize;

        if len < NETLINK_HEADER_LEN {
            return Err(ParseError::LengthUnderflow(len));
        }

        let message = match record.message_type() {
            NLMSG_DONE => Message::Done,
            libc::RTM_NEWLINK => {
                match NetlinkMessage::<RouteNetlinkMessage>::deserialize(self.remaining)?.payload {
                    NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                        Message::NewLink(link)
                    }
                    _ => Message::Other {
                        kind: libc::RTM_NEWLINK,
                    },
                }
            }
            kind => Message::Other { kind },
        };

        self.remaining = match message {
            Message::Done => &[],
            Message::NewLink(_) | Message::Other { .. } => {
                self.remaining.get(align(len)..).unwrap_or_default()
            }
        };

        Ok(message)
    }
}

impl Iterator for Messages<'_> {
    type Item = Result<Message, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        let message = self.next_message();

        if message.is_err() {
            self.remaining = &[];
        }

        Some(message)
    }
}

impl std::iter::FusedIterator for Messages<'_> {}

fn align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Encodes an `RTM_NEWLINK` record for interface `index`.
#[cfg(test)]
pub(crate) fn new_link(index: u32, flags: LinkFlags) -> Vec<u8> {
    let mut link = LinkMessage::default();
    link.header.index = index;
    link.header.flags = flags;

    encode(NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(
        link,
    )))
}

/// Encodes an `RTM_NEWADDR` record, which the monitor has no use for.
#[cfg(test)]
pub(crate) fn new_address() -> Vec<u8> {
    encode(NetlinkPayload::InnerMessage(
        RouteNetlinkMessage::NewAddress(Default::default()),
    ))
}

#[cfg(test)]
pub(crate) fn done() -> Vec<u8> {
    encode(NetlinkPayload::Done(Default::default()))
}

#[cfg(test)]
fn encode(payload: NetlinkPayload<RouteNetlinkMessage>) -> Vec<u8> {
    let mut message = NetlinkMessage::new(Default::default(), payload);
    message.finalize();

    let mut buf = vec![0; message.buffer_len()];
    message.serialize(&mut buf);

    buf
}
