use std::sync::Arc;

use tokio::sync::watch;

/// A one-shot cancellation signal.
///
/// Clones share the same signal. Triggering is idempotent and cannot be undone,
/// a new `Interrupt` needs to be created for the next operation.
#[derive(Clone, Debug)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every holder of this interrupt
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the interrupt has been triggered
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self` so the channel cannot close while we wait
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
