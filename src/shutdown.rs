use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Cooperative stop flag shared between the Ctrl+C handler and the loop.
///
/// The flag is what the loop checks between stages; the channel only exists
/// so a sleeping loop wakes up as soon as the operator interrupts.
#[derive(Clone)]
pub struct Shutdown {
    stopped: Arc<AtomicBool>,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Shutdown {
            stopped: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        }
    }

    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // channel full means a wake-up is already pending
        let _ = self.tx.try_send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless stopped first. Returns `true` if the
    /// full interval elapsed without a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        match self.rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_triggered(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
