//! Cooperative cancellation built on a `watch` channel.
//!
//! One [`CancellationSource`] is owned by whoever controls teardown; any number
//! of [`CancellationSignal`]s are handed to the code that must observe it.
//! Cancellation is sticky: once requested it cannot be withdrawn. Dropping the
//! source without cancelling also counts as cancellation, so a signal can never
//! wait forever on an owner that is gone.

use tokio::sync::watch;

/// Owner side of a cancellation pair.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a signal observing this source.
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. Calling this more than once is harmless.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation pair, passed into every suspension point.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
}

impl CancellationSignal {
    /// Non-blocking check, used at loop-body boundaries.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once cancellation has been requested or the source is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the source is gone, which we treat the same as a cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
