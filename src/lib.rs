//! Connection-oriented semantics over UDP.
//!
//! UDP is connectionless: one socket, datagrams from anywhere. This crate
//! layers dial/accept/read/write/deadline/close semantics on top of a single
//! socket by keying virtual connections on the remote address, and supplies
//! the address resolution (literals, service names, SRV records) needed to
//! find peers in the first place.
//!
//! ```text
//!  Resolver::resolve ─▶ Addr ─▶ UdpMux::dial ─┐
//!                                             ├─▶ MuxConn ─▶ IdleTimeout
//!                    UdpMux::accept ──────────┘
//! ```
//!
//! # Module map
//!
//! - [`mux`]: [`UdpMux`], the socket owner and reader task; dial, accept,
//!   listener-level reads and writes, close cascade.
//! - [`conn`]: the [`Connection`] trait and [`MuxConn`].
//! - [`timeout`]: [`IdleTimeout`], activity extends deadlines.
//! - [`resolve`]: [`Resolver`] with the literal / SRV / default-port
//!   precedence.
//! - [`lookup`]: the [`Lookup`] backend trait, the system implementation and
//!   its stub DNS client.
//! - [`addr`]: [`Addr`], host:port splitting, `/etc/services` ports.
//! - [`dns`]: the wire codec under the stub client.
//!
//! # Example
//!
//! ```no_run
//! use udp_mux::{Connection, UdpMux};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), udp_mux::MuxError> {
//!     let server = UdpMux::bind("127.0.0.1:0".parse().unwrap()).await?;
//!     let client = UdpMux::bind("127.0.0.1:0".parse().unwrap()).await?;
//!
//!     let conn = client.dial(server.local_addr())?;
//!     conn.write(b"ping").await?;
//!
//!     let peer = server.accept().await?;
//!     let mut buf = [0u8; 1500];
//!     let n = peer.read(&mut buf).await?;
//!     assert_eq!(&buf[..n], b"ping");
//!
//!     peer.write(b"pong").await?;
//!     let n = conn.read(&mut buf).await?;
//!     assert_eq!(&buf[..n], b"pong");
//!     Ok(())
//! }
//! ```

pub mod addr;
pub mod conn;
pub mod dns;
pub mod lookup;
pub mod mux;
pub mod resolve;
pub mod timeout;

mod deadline;
mod shutdown;

pub use addr::{lookup_port, parse_addr, Addr, Transport};
pub use conn::{Connection, MuxConn};
pub use lookup::{Lookup, SrvTarget, SystemLookup};
pub use mux::{MuxError, UdpMux, MAX_DATAGRAM, QUEUE_CAPACITY};
pub use resolve::{ResolveError, Resolver};
pub use timeout::IdleTimeout;
