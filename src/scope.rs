//! Lifecycle scoping and subscription handles
//!
//! A `Scope` stands in for the hosting lifecycle: cancelling it delivers a
//! cooperative stop signal to every subscription created under it. Producers
//! observe the signal at their next suspension point; there is no preemption.

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct Scope {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Scope {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Cancel every subscription created under this scope.
    pub fn cancel(&self) {
        log::debug!("scope cancelled");
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub(crate) fn signal(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

/// Resolve once the watched signal turns true. If the sender side goes away
/// without cancelling, never resolve: dropping a handle is not a cancel.
pub(crate) async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Handle to one running subscription.
///
/// Cancelling requests the producer stop at its next suspension point; no
/// terminal callback is invoked for a cancelled subscription.
pub struct Subscription {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(cancel: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the driving task to end (completion, failure, or cancellation).
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
