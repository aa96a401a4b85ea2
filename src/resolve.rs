//! Address resolution: the precedence rules that turn
//! `(network, address, service, default port)` into a concrete endpoint.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::addr::{self, Addr, SplitError, Transport};
use crate::dns::WireError;
use crate::lookup::{Lookup, SystemLookup};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The address is neither `host:port` nor a bare host.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// A literal address carried a port token that does not resolve.
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
    /// The port token is neither numeric nor a known service name.
    #[error("unknown port: {0}")]
    UnknownPort(String),
    /// No port in the address, no SRV record, no default to fall back on.
    #[error("missing port in address or no such SRV record: {0}")]
    MissingPortOrNoSrv(String),
    #[error("no such host: {0}")]
    NoSuchHost(String),
    #[error(transparent)]
    BadPacket(#[from] WireError),
    /// A nameserver answered with a failure rcode other than NXDOMAIN.
    #[error("dns server failure: {0}")]
    ServFail(String),
    /// Every nameserver attempt timed out.
    #[error("dns query timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// SRV-aware address resolver.
///
/// `resolve` decides an endpoint in this order:
///
/// 1. `address` is `host:port`: resolve the host (IP literals pass through)
///    and the port token.
/// 2. No port: look up `_service._network.address` SRV records and take the
///    first target, by priority, whose hostname resolves. Lookup errors fall
///    through.
/// 3. Still nothing, but a default port was supplied: resolve `address` as a
///    hostname and use the default.
/// 4. Fail with [`ResolveError::MissingPortOrNoSrv`].
pub struct Resolver {
    lookup: Arc<dyn Lookup>,
}

impl Resolver {
    /// System-backed resolver (`/etc/hosts`, `/etc/resolv.conf`).
    pub fn new() -> Self {
        Self::with_lookup(Arc::new(SystemLookup::new()))
    }

    /// Resolver over a custom [`Lookup`] backend.
    pub fn with_lookup(lookup: Arc<dyn Lookup>) -> Self {
        Self { lookup }
    }

    pub async fn resolve(
        &self,
        network: &str,
        address: &str,
        service: &str,
        default_port: Option<u16>,
    ) -> Result<Addr, ResolveError> {
        let transport = Transport::from_network(network);
        match addr::split_host_port(address) {
            Ok((host, port)) => {
                let ip = self.resolve_ip(host).await?;
                let port = addr::lookup_port(network, port)
                    .map_err(|_| ResolveError::UnknownPort(address.to_string()))?;
                Ok(Addr {
                    transport,
                    ip,
                    port,
                })
            }
            Err(SplitError::MissingPort) => {
                if let Ok(mut targets) = self.lookup.srv(service, network, address).await {
                    targets.sort_by_key(|t| t.priority);
                    for srv in &targets {
                        match self.resolve_ip(&srv.target).await {
                            Ok(ip) => {
                                return Ok(Addr {
                                    transport,
                                    ip,
                                    port: srv.port,
                                })
                            }
                            Err(e) => {
                                log::debug!(
                                    "[resolve] srv target {} unresolvable: {e}",
                                    srv.target
                                );
                            }
                        }
                    }
                }
                if let Some(port) = default_port {
                    let ip = self.resolve_ip(address).await?;
                    return Ok(Addr {
                        transport,
                        ip,
                        port,
                    });
                }
                Err(ResolveError::MissingPortOrNoSrv(address.to_string()))
            }
            Err(SplitError::Malformed(reason)) => {
                Err(ResolveError::InvalidAddress(format!("{address}: {reason}")))
            }
        }
    }

    /// IP literals pass through; hostnames resolve to their first address.
    pub async fn resolve_ip(&self, host: &str) -> Result<IpAddr, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let ips = self.lookup.host(host).await?;
        ips.into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoSuchHost(host.to_string()))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}
