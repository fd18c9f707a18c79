use std::sync::Arc;

use tokio::sync::watch;

/// Handle used to request cancellation of one or more runs.
///
/// Clones share the same flag, so one handle can stop several runs at once.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    ///
    /// Cancellation is cooperative: runs observe it at their next suspension
    /// point and finish as aborted.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a signal observing this handle.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of an `AbortHandle`, passed down to transports.
#[derive(Clone, Debug)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Returns true when cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves if every
    /// handle is dropped first.
    pub async fn aborted(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
