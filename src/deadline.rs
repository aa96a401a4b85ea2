//! Read/write deadline pair and the timer helpers built on it.

use std::sync::Mutex;
use std::time::Instant;

/// A read/write deadline pair. `None` means no deadline.
///
/// Both the listener and each virtual connection carry one of these; setters
/// and the blocking calls that sample them may run on different tasks, so the
/// fields sit behind short-lived locks.
#[derive(Default)]
pub(crate) struct Deadlines {
    read: Mutex<Option<Instant>>,
    write: Mutex<Option<Instant>>,
}

impl Deadlines {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> Option<Instant> {
        *self.read.lock().unwrap()
    }

    pub(crate) fn write(&self) -> Option<Instant> {
        *self.write.lock().unwrap()
    }

    pub(crate) fn set_read(&self, deadline: Option<Instant>) {
        *self.read.lock().unwrap() = deadline;
    }

    pub(crate) fn set_write(&self, deadline: Option<Instant>) {
        *self.write.lock().unwrap() = deadline;
    }
}

/// True once `deadline` is strictly in the past.
pub(crate) fn elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|t| Instant::now() > t)
}

/// Sleep until `deadline`; never completes when there is none.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(t) => tokio::time::sleep_until(t.into()).await,
        None => std::future::pending().await,
    }
}
