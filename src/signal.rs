//! One-shot, many-observer termination signals.
//!
//! A signal is a channel on which nothing is ever sent. Firing drops the only
//! sender, which disconnects the channel for every current and future
//! receiver. The [`Trigger`] is not `Clone`, so whoever owns it is the only
//! party able to fire, and firing consumes it.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Create a new unfired signal
pub fn signal() -> (Trigger, Listener) {
    let (tx, rx) = channel::bounded(0);
    (Trigger { _tx: tx }, Listener { rx })
}

/// The firing half of a signal. Dropping it also fires the signal.
#[derive(Debug)]
pub struct Trigger {
    _tx: Sender<()>,
}

impl Trigger {
    /// Fire the signal
    pub fn fire(self) {}
}

/// The observing half of a signal
#[derive(Debug, Clone)]
pub struct Listener {
    rx: Receiver<()>,
}

impl Listener {
    /// Receiver that becomes ready (disconnected) once the signal fires.
    /// Meant for use inside `crossbeam::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until the signal fires
    pub fn wait(&self) {
        // Nothing is ever sent, so recv only returns on disconnect
        let _ = self.rx.recv();
    }

    /// Block until the signal fires or the timeout elapses.
    /// Returns true if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
