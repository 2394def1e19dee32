//! Listens for rtnetlink link changes of one interface and turns them into [`Event`]s.

use std::io;
use std::thread;

use crate::cancel::{self, CancellableSocket};
use crate::netlink::{Message, Messages, is_running};
use crate::shutdown::{Completion, ShutdownListener};
use crate::{Error, Event};

const RECV_BUFFER_SIZE: usize = 1 << 16;

pub(crate) struct StatusMonitor {
    pub(crate) socket: CancellableSocket,
    /// Interface index of our device, messages for any other link are ignored.
    pub(crate) index: u32,
    pub(crate) events: flume::Sender<Event>,
    pub(crate) errors: flume::Sender<Error>,
    pub(crate) shutdown: ShutdownListener,
    pub(crate) poller_done: Completion,
}

impl StatusMonitor {
    pub(crate) fn spawn(self, name: &str) -> Result<thread::JoinHandle<()>, Error> {
        thread::Builder::new()
            .name(format!("tun-monitor {name}"))
            .spawn(move || self.run())
            .map_err(Error::Spawn)
    }

    fn run(self) {
        let Self {
            socket,
            index,
            events,
            errors,
            shutdown,
            poller_done,
        } = self;

        tracing::debug!(%index, "Status monitor started");

        if let Err(e) = receive_loop(&socket, index, &events, &shutdown) {
            tracing::debug!("Status monitor failed: {}", logging::err_with_src(&e));

            shutdown.send(&errors, e);
        }

        drop(socket);
        poller_done.wait();
        // Last sender of the event queue, consumers now see it closed.
        drop(events);

        tracing::debug!(%index, "Status monitor stopped");
    }
}

fn receive_loop(
    socket: &CancellableSocket,
    index: u32,
    events: &flume::Sender<Event>,
    shutdown: &ShutdownListener,
) -> Result<(), Error> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let Some(len) = receive(socket, &mut buf)? else {
            return Ok(());
        };

        if shutdown.is_raised() {
            return Ok(());
        }

        for event in link_events(&buf[..len], index) {
            tracing::debug!(?event, %index, "Link state changed");

            if !shutdown.send(events, event) {
                return Ok(());
            }
        }
    }
}

/// Receives the next buffer of messages, `None` if the wait was cancelled.
fn receive(socket: &CancellableSocket, buf: &mut [u8]) -> Result<Option<usize>, Error> {
    loop {
        match socket.recv(buf) {
            Ok(0) => {
                return Err(Error::socket("netlink socket closed")(io::Error::from(
                    io::ErrorKind::UnexpectedEof,
                )));
            }
            Ok(len) => return Ok(Some(len)),
            Err(e) if cancel::retry_after_error(&e) => {
                if !socket
                    .ready_read()
                    .map_err(Error::socket("failed to wait for netlink socket"))?
                {
                    return Ok(None);
                }
            }
            Err(e) => return Err(Error::socket("failed to receive netlink message")(e)),
        }
    }
}

/// Events for interface `index` contained in one receive buffer.
pub(crate) fn link_events(buf: &[u8], index: u32) -> Vec<Event> {
    let mut events = Vec::new();

    for message in Messages::new(buf) {
        match message {
            Ok(Message::Done) => break,
            Ok(Message::NewLink(link)) if link.header.index != index => {
                tracing::trace!(index = %link.header.index, "Ignoring link message of other interface");
            }
            Ok(Message::NewLink(link)) => {
                events.push(if is_running(&link) {
                    Event::Up
                } else {
                    Event::Down
                });
                events.push(Event::MtuUpdate);
            }
            Ok(Message::Other { kind }) => {
                tracing::trace!(%kind, "Ignoring netlink message");
            }
            Err(e) => {
                tracing::warn!(
                    "Discarding rest of netlink buffer: {}",
                    logging::err_with_src(&e)
                );
                break;
            }
        }
    }

    events
}
