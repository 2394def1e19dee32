//! Fallback link-state detection for when netlink notifications don't reach us.
//!
//! Netlink messages don't cross network namespaces, so a TUN device moved into another
//! namespace goes silent. A zero-length write still tells us its state: the kernel answers
//! `EINVAL` on a running device (the packet-information header is missing) and `EIO` on a
//! device that is down.

use std::io;
use std::os::fd::{AsFd as _, OwnedFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::shutdown::{CompletionGuard, ShutdownListener};
use crate::{Error, Event, sys};

pub(crate) struct Poller {
    pub(crate) fd: Arc<OwnedFd>,
    pub(crate) events: flume::Sender<Event>,
    pub(crate) shutdown: ShutdownListener,
    pub(crate) interval: Duration,
    pub(crate) done: CompletionGuard,
}

impl Poller {
    pub(crate) fn spawn(self, name: &str) -> Result<thread::JoinHandle<()>, Error> {
        thread::Builder::new()
            .name(format!("tun-poller {name}"))
            .spawn(move || self.run())
            .map_err(Error::Spawn)
    }

    fn run(self) {
        let Self {
            fd,
            events,
            shutdown,
            interval,
            done,
        } = self;

        tracing::debug!("Fallback poller started");

        loop {
            let outcome = sys::write(fd.as_fd(), &[]);

            let Some(event) = classify(&outcome) else {
                tracing::debug!(
                    ?outcome,
                    "Unexpected zero-length write result, stopping fallback poller"
                );
                break;
            };

            if !shutdown.send(&events, event) {
                break;
            }
            if shutdown.wait_timeout(interval) {
                break;
            }
        }

        // The status monitor closes the event queue once `done` is gone.
        drop(events);
        drop(done);

        tracing::debug!("Fallback poller stopped");
    }
}

/// Maps the outcome of a zero-length write to the link state it implies.
pub(crate) fn classify(outcome: &io::Result<usize>) -> Option<Event> {
    match outcome.as_ref().err()?.raw_os_error()? {
        libc::EINVAL => Some(Event::Up),
        libc::EIO => Some(Event::Down),
        _ => None,
    }
}
