//! Idle-timeout connection decorator.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::conn::Connection;
use crate::mux::MuxError;

/// Wraps a [`Connection`] so activity keeps it alive: every successful read
/// pushes the read deadline out by `timeout`, and every write attempt pushes
/// the write deadline out likewise. A peer that goes quiet times out
/// `timeout` after the last activity.
pub struct IdleTimeout<C> {
    inner: C,
    timeout: Duration,
}

impl<C: Connection> IdleTimeout<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Unwrap the decorated connection.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: Connection> Connection for IdleTimeout<C> {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError> {
        let n = self.inner.read(buf).await?;
        // Extending a concurrently closed connection is a no-op; the
        // completed read stands.
        let _ = self
            .inner
            .set_read_deadline(Some(Instant::now() + self.timeout));
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, MuxError> {
        // A failed write is still activity; the deadline moves either way.
        let result = self.inner.write(buf).await;
        let _ = self
            .inner
            .set_write_deadline(Some(Instant::now() + self.timeout));
        result
    }

    fn close(&self) -> Result<(), MuxError> {
        self.inner.close()
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr()
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.inner.set_read_deadline(deadline)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.inner.set_write_deadline(deadline)
    }
}
