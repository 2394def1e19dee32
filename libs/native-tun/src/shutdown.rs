//! Cross-thread coordination of the monitoring threads.
//!
//! Both primitives are built from `flume` channels that never carry a message: disconnection is
//! the signal.

use std::convert::Infallible;
use std::time::Duration;

use flume::RecvTimeoutError;

/// Creates a shutdown signal and the listener half handed to the monitoring threads.
pub(crate) fn signal() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = flume::bounded(0);

    (ShutdownSignal { tx: Some(tx) }, ShutdownListener { rx })
}

/// Creates the handle the poller releases on exit and the side that waits for it.
pub(crate) fn completion() -> (CompletionGuard, Completion) {
    let (tx, rx) = flume::bounded(0);

    (CompletionGuard { _tx: tx }, Completion { rx })
}

/// Raising the signal is one-way, every clone of the listener observes it.
#[derive(Debug)]
pub(crate) struct ShutdownSignal {
    tx: Option<flume::Sender<Infallible>>,
}

impl ShutdownSignal {
    pub(crate) fn raise(&mut self) {
        self.tx = None;
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.tx.is_none()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ShutdownListener {
    rx: flume::Receiver<Infallible>,
}

impl ShutdownListener {
    pub(crate) fn is_raised(&self) -> bool {
        self.rx.is_disconnected()
    }

    /// Sleeps for `timeout` and returns `true` if shutdown was raised in the meantime.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Sends `item` on a bounded queue, giving up once shutdown is raised.
    ///
    /// Returns whether `item` got delivered.
    pub(crate) fn send<T>(&self, tx: &flume::Sender<T>, item: T) -> bool {
        if self.is_raised() {
            return false;
        }

        flume::Selector::new()
            .send(tx, item, |result| result.is_ok())
            .recv(&self.rx, |_| false)
            .wait()
    }
}

/// Dropped by the fallback poller when it stops producing events.
#[derive(Debug)]
pub(crate) struct CompletionGuard {
    _tx: flume::Sender<Infallible>,
}

#[derive(Debug)]
pub(crate) struct Completion {
    rx: flume::Receiver<Infallible>,
}

impl Completion {
    /// Blocks until the matching [`CompletionGuard`] is gone.
    pub(crate) fn wait(self) {
        match self.rx.recv() {
            Ok(never) => match never {},
            Err(flume::RecvError::Disconnected) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn raised_signal_is_seen_by_all_listeners() {
        let (mut signal, listener) = signal();
        let other = listener.clone();

        assert!(!listener.is_raised());
        signal.raise();

        assert!(signal.is_raised());
        assert!(listener.is_raised());
        assert!(other.is_raised());
    }

    #[test]
    fn wait_timeout_returns_early_on_shutdown() {
        let (mut signal, listener) = signal();

        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let raised = listener.wait_timeout(Duration::from_secs(30));

            (raised, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        signal.raise();

        let (raised, elapsed) = waiter.join().unwrap();
        assert!(raised);
        assert!(elapsed < Duration::from_secs(30));
    }

    #[test]
    fn wait_timeout_elapses_without_shutdown() {
        let (_signal, listener) = signal();

        assert!(!listener.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn send_delivers_while_running() {
        let (_signal, listener) = signal();
        let (tx, rx) = flume::bounded(1);

        assert!(listener.send(&tx, 42));
        assert_eq!(rx.try_recv().unwrap(), 42);
    }

    #[test]
    fn blocked_send_gives_up_on_shutdown() {
        let (mut signal, listener) = signal();
        let (tx, rx) = flume::bounded(1);
        tx.send(1).unwrap();

        let sender = std::thread::spawn(move || listener.send(&tx, 2));
        std::thread::sleep(Duration::from_millis(20));
        signal.raise();

        assert!(!sender.join().unwrap());
        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn completion_waits_for_guard() {
        let (guard, completion) = completion();

        let waiter = std::thread::spawn(move || completion.wait());
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.join().unwrap();
    }
}
