//! Virtual connections: the [`Connection`] contract and [`MuxConn`], the
//! per-peer connection handed out by [`UdpMux`](crate::mux::UdpMux).

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::deadline::{self, Deadlines};
use crate::mux::{MuxError, MuxShared};
use crate::shutdown::Shutdown;

/// Connection-oriented operations over a datagram flow.
///
/// Implemented by [`MuxConn`] and by decorators such as
/// [`IdleTimeout`](crate::timeout::IdleTimeout). All methods take `&self`
/// and synchronize internally, so a connection can be shared across tasks
/// behind an `Arc`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next datagram, copying at most `buf.len()` bytes. The
    /// rest of an oversized datagram is discarded with it.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError>;

    /// Send one datagram to the remote peer.
    async fn write(&self, buf: &[u8]) -> Result<usize, MuxError>;

    /// Close the connection. Exactly one call succeeds; later calls fail
    /// with [`MuxError::Closed`].
    fn close(&self) -> Result<(), MuxError>;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Deadline for reads; `None` lets reads block indefinitely.
    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError>;

    /// Deadline for writes; `None` clears it.
    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError>;

    /// Set both deadlines. The read setter's error wins.
    fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        let read = self.set_read_deadline(deadline);
        let write = self.set_write_deadline(deadline);
        read.and(write)
    }
}

/// Connection state shared with the listener: the peer table keeps a handle
/// so a listener close can cascade without holding the connection itself.
pub(crate) struct ConnState {
    pub(crate) shutdown: Shutdown,
    pub(crate) deadlines: Deadlines,
}

impl ConnState {
    pub(crate) fn new() -> Self {
        Self {
            shutdown: Shutdown::new(),
            deadlines: Deadlines::new(),
        }
    }
}

/// One virtual connection multiplexed over a shared UDP socket.
///
/// Created by [`UdpMux::dial`](crate::mux::UdpMux::dial) or
/// [`UdpMux::accept`](crate::mux::UdpMux::accept). Inbound datagrams arrive
/// through the listener's reader task into a bounded inbox; the connection
/// runs no task of its own. Dropping the handle closes it.
pub struct MuxConn {
    mux: Arc<MuxShared>,
    state: Arc<ConnState>,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    local: SocketAddr,
    remote: SocketAddr,
}

impl MuxConn {
    pub(crate) fn new(
        mux: Arc<MuxShared>,
        state: Arc<ConnState>,
        inbox: mpsc::Receiver<Vec<u8>>,
        remote: SocketAddr,
    ) -> Self {
        let local = mux.local;
        Self {
            mux,
            state,
            inbox: Mutex::new(inbox),
            local,
            remote,
        }
    }

    /// True once closed, whether by [`Connection::close`] or by the
    /// listener's close cascade.
    pub fn is_closed(&self) -> bool {
        self.state.shutdown.is_closed()
    }

    async fn recv_next(&self) -> Option<Vec<u8>> {
        let mut inbox = self.inbox.lock().await;
        inbox.recv().await
    }

    /// Returns `true` for the call that actually closed the connection.
    fn close_inner(&self) -> bool {
        if !self.state.shutdown.begin() {
            return false;
        }
        self.mux.deregister(self.remote);
        log::debug!("[mux] connection to {} closed", self.remote);
        true
    }
}

#[async_trait]
impl Connection for MuxConn {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        // Sampled once; a setter change during a blocked read applies to the
        // next call.
        let read_deadline = self.state.deadlines.read();
        let payload = tokio::select! {
            payload = self.recv_next() => payload.ok_or(MuxError::Closed)?,
            _ = self.state.shutdown.wait() => return Err(MuxError::Closed),
            _ = deadline::sleep_until(read_deadline) => return Err(MuxError::Timeout),
        };
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        if deadline::elapsed(self.state.deadlines.write()) {
            return Err(MuxError::Timeout);
        }
        self.mux.send_raw(buf, self.remote).await
    }

    fn close(&self) -> Result<(), MuxError> {
        if self.close_inner() {
            Ok(())
        } else {
            Err(MuxError::Closed)
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        self.state.deadlines.set_read(deadline);
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        self.state.deadlines.set_write(deadline);
        Ok(())
    }
}

impl Drop for MuxConn {
    fn drop(&mut self) {
        self.close_inner();
    }
}

impl fmt::Debug for MuxConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxConn")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
