//! One-shot close signal shared between a handle and the tasks watching it.

use tokio::sync::watch;

/// A close flag that flips exactly once and is observable by any number of
/// waiters. `begin` elects the single caller that performs the transition;
/// `wait` is level-triggered, so a waiter arriving after the flip completes
/// immediately.
pub(crate) struct Shutdown {
    closed: watch::Sender<bool>,
}

impl Shutdown {
    pub(crate) fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    /// Flip to closed. Returns `true` only for the call that performed the
    /// transition.
    pub(crate) fn begin(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until closed.
    pub(crate) async fn wait(&self) {
        let mut rx = self.closed.subscribe();
        // The sender half lives in self, so the channel cannot close early.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}
