//! Datagram multiplexer: one UDP socket, many virtual connections.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ dial(remote) ─────────────────────┐ registers
//!      │ accept() ◀── pending queue ◀──┐   ▼
//!      │                               │  peer table: SocketAddr -> inbox
//!      ▼                               │   │
//!  MuxConn (per peer)                  │   │ reader task
//!      read ◀── bounded inbox ◀────────┴───┤   loop { recv_from; route }
//!      write ──────────────▶ shared UdpSocket ──▶ network
//! ```
//!
//! The listener owns the physical socket and the single reader task. Every
//! inbound datagram is routed by source address: to the matching
//! connection's inbox, or to the pending-accept queue when no connection
//! matches. Both queues are bounded and overflow drops the datagram, which
//! is within UDP's delivery contract.
//!
//! Closing the listener is a cascade: the close signal stops the reader and
//! every registered connection is closed. Blocked reads and accepts observe
//! it through the broadcast half of the signal.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::conn::{ConnState, MuxConn};
use crate::deadline::{self, Deadlines};
use crate::resolve::{ResolveError, Resolver};
use crate::shutdown::Shutdown;

/// Largest datagram the reader accepts (UDP's theoretical maximum).
pub const MAX_DATAGRAM: usize = 65_535;

/// Bound, in datagrams, on each connection inbox and on the pending-accept
/// queue. Overflow drops.
pub const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum MuxError {
    /// The listener or connection is closed, or was closed mid-operation.
    #[error("use of closed connection")]
    Closed,
    /// A deadline elapsed before the operation completed.
    #[error("operation timed out")]
    Timeout,
    /// A connection to that remote is already registered.
    #[error("peer already connected")]
    AlreadyConnected,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

struct PeerEntry {
    tx: mpsc::Sender<Vec<u8>>,
    state: Arc<ConnState>,
}

/// State shared by the listener handle, its connections and the reader task.
pub(crate) struct MuxShared {
    socket: UdpSocket,
    pub(crate) local: SocketAddr,
    shutdown: Shutdown,
    deadlines: Deadlines,
    conns: Mutex<HashMap<SocketAddr, PeerEntry>>,
    pending_tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

impl MuxShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }

    /// The single point of delivery to the physical socket.
    pub(crate) async fn send_raw(
        &self,
        buf: &[u8],
        target: SocketAddr,
    ) -> Result<usize, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        Ok(self.socket.send_to(buf, target).await?)
    }

    pub(crate) fn deregister(&self, remote: SocketAddr) {
        self.conns.lock().unwrap().remove(&remote);
    }
}

/// UDP listener with connection semantics.
///
/// Binds one socket and demultiplexes it into per-peer [`MuxConn`]s.
/// `accept` turns inbound traffic from unknown peers into connections;
/// `dial` registers a peer without sending anything. Dropping the listener
/// closes it.
pub struct UdpMux {
    shared: Arc<MuxShared>,
    pending: AsyncMutex<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
}

impl UdpMux {
    /// Bind the physical socket and start the reader task.
    pub async fn bind(addr: SocketAddr) -> Result<Self, MuxError> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        let (pending_tx, pending_rx) = mpsc::channel(QUEUE_CAPACITY);
        let shared = Arc::new(MuxShared {
            socket,
            local,
            shutdown: Shutdown::new(),
            deadlines: Deadlines::new(),
            conns: Mutex::new(HashMap::new()),
            pending_tx,
        });
        tokio::spawn(recv_loop(shared.clone()));
        log::debug!("[mux] listening on {local}");
        Ok(Self {
            shared,
            pending: AsyncMutex::new(pending_rx),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Register `remote` as a virtual connection. Pure bookkeeping, nothing
    /// is sent.
    ///
    /// Datagrams from `remote` already sitting in the pending queue are not
    /// rerouted; an `accept` that pops one later fails with
    /// [`MuxError::AlreadyConnected`] and the datagram is dropped.
    pub fn dial(&self, remote: SocketAddr) -> Result<MuxConn, MuxError> {
        self.register(remote, None)
    }

    /// Resolve `"host:port"` through the OS resolver (first result) and dial
    /// it.
    pub async fn dial_host(&self, addr: &str) -> Result<MuxConn, MuxError> {
        let mut addrs = tokio::net::lookup_host(addr).await?;
        let remote = addrs
            .next()
            .ok_or_else(|| ResolveError::NoSuchHost(addr.to_string()))?;
        self.dial(remote)
    }

    /// Full resolution (literal, SRV, default port; see
    /// [`Resolver::resolve`]) followed by [`dial`](Self::dial).
    pub async fn dial_resolved(
        &self,
        resolver: &Resolver,
        network: &str,
        address: &str,
        service: &str,
        default_port: Option<u16>,
    ) -> Result<MuxConn, MuxError> {
        let addr = resolver
            .resolve(network, address, service, default_port)
            .await?;
        self.dial(addr.socket_addr())
    }

    /// Wait for a datagram from an unconnected peer and register that peer,
    /// with the datagram preloaded into the new connection's inbox.
    ///
    /// Honors the listener read deadline. If the peer was dialed between the
    /// datagram's arrival and this call, the registration fails with
    /// [`MuxError::AlreadyConnected`] and the datagram is dropped.
    pub async fn accept(&self) -> Result<MuxConn, MuxError> {
        let (payload, from) = self.next_pending().await?;
        self.register(from, Some(payload))
    }

    /// Listener-level read: the next datagram from an unconnected peer,
    /// without creating a connection. Copies at most `buf.len()` bytes.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), MuxError> {
        let (payload, from) = self.next_pending().await?;
        let n = payload.len().min(buf.len());
        buf[..n].copy_from_slice(&payload[..n]);
        Ok((n, from))
    }

    /// Send one datagram to `target`. Honors the listener write deadline as
    /// an already-elapsed check; the call never waits on it.
    pub async fn write_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        if deadline::elapsed(self.shared.deadlines.write()) {
            return Err(MuxError::Timeout);
        }
        self.shared.send_raw(buf, target).await
    }

    /// Close the listener: stop the reader task and cascade the close to
    /// every registered connection. One-shot; later calls fail with
    /// [`MuxError::Closed`].
    pub fn close(&self) -> Result<(), MuxError> {
        if self.close_inner() {
            Ok(())
        } else {
            Err(MuxError::Closed)
        }
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        self.shared.deadlines.set_read(deadline);
        Ok(())
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        self.shared.deadlines.set_write(deadline);
        Ok(())
    }

    /// Set both deadlines. The read setter's error wins.
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        let read = self.set_read_deadline(deadline);
        let write = self.set_write_deadline(deadline);
        read.and(write)
    }

    fn register(&self, remote: SocketAddr, first: Option<Vec<u8>>) -> Result<MuxConn, MuxError> {
        let mut conns = self.shared.conns.lock().unwrap();
        // Close flips the signal before it takes this lock, so a racing
        // registration either fails here or lands in close's snapshot.
        if self.shared.is_closed() {
            return Err(MuxError::Closed);
        }
        if conns.contains_key(&remote) {
            return Err(MuxError::AlreadyConnected);
        }
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        if let Some(payload) = first {
            // Fresh channel, cannot be full.
            let _ = tx.try_send(payload);
        }
        let state = Arc::new(ConnState::new());
        conns.insert(
            remote,
            PeerEntry {
                tx,
                state: state.clone(),
            },
        );
        drop(conns);
        log::debug!("[mux] registered connection to {remote}");
        Ok(MuxConn::new(self.shared.clone(), state, rx, remote))
    }

    async fn next_pending(&self) -> Result<(Vec<u8>, SocketAddr), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        let read_deadline = self.shared.deadlines.read();
        tokio::select! {
            item = self.pop_pending() => item.ok_or(MuxError::Closed),
            _ = self.shared.shutdown.wait() => Err(MuxError::Closed),
            _ = deadline::sleep_until(read_deadline) => Err(MuxError::Timeout),
        }
    }

    // Holding the queue lock inside the select keeps a second caller's
    // deadline and close arms live while the first caller owns the queue.
    async fn pop_pending(&self) -> Option<(Vec<u8>, SocketAddr)> {
        let mut pending = self.pending.lock().await;
        pending.recv().await
    }

    fn close_inner(&self) -> bool {
        if !self.shared.shutdown.begin() {
            return false;
        }
        // Snapshot under the lock, cascade outside it: a connection's own
        // close takes the same lock to deregister.
        let states: Vec<Arc<ConnState>> = {
            let mut conns = self.shared.conns.lock().unwrap();
            conns.drain().map(|(_, entry)| entry.state).collect()
        };
        let cascaded = states.len();
        for state in states {
            state.shutdown.begin();
        }
        log::debug!(
            "[mux] {} closed, cascaded to {cascaded} connections",
            self.shared.local
        );
        true
    }
}

impl Drop for UdpMux {
    fn drop(&mut self) {
        self.close_inner();
    }
}

impl fmt::Debug for UdpMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpMux")
            .field("local", &self.shared.local)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The reader task: routes every inbound datagram to the matching inbox or
/// to the pending-accept queue.
async fn recv_loop(shared: Arc<MuxShared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = tokio::select! {
            _ = shared.shutdown.wait() => break,
            result = shared.socket.recv_from(&mut buf) => match result {
                Ok(inbound) => inbound,
                Err(e) => {
                    if shared.is_closed() {
                        break;
                    }
                    log::debug!("[mux] recv error, continuing: {e}");
                    continue;
                }
            },
        };
        let payload = buf[..len].to_vec();
        let tx = {
            let conns = shared.conns.lock().unwrap();
            conns.get(&from).map(|entry| entry.tx.clone())
        };
        match tx {
            Some(tx) => {
                if let Err(e) = tx.try_send(payload) {
                    log::debug!("[mux] dropping datagram from {from}: {e}");
                }
            }
            None => {
                if let Err(e) = shared.pending_tx.try_send((payload, from)) {
                    log::debug!("[mux] dropping unmatched datagram from {from}: {e}");
                }
            }
        }
    }
    log::debug!("[mux] reader for {} exiting", shared.local);
}
