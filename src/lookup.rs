//! Name-resolution backends: the [`Lookup`] trait seam and the system-backed
//! implementation.
//!
//! Hostname lookups go through the OS resolver so `/etc/hosts` and NSS
//! apply. SRV lookups use a small stub client speaking to the
//! `/etc/resolv.conf` nameservers: UDP first, falling back to TCP when a
//! response comes back truncated.

use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::dns::{self, RData, Response, WireError};
use crate::resolve::ResolveError;

/// Per-attempt timeout for one nameserver query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(4);
/// Passes over the nameserver list before giving up.
const QUERY_RETRIES: u32 = 3;

/// One SRV record target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

/// Name-resolution backend. [`SystemLookup`] is the real one; tests inject
/// scripted implementations to drive the resolver without a network.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// All addresses for `name`, best first.
    async fn host(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError>;

    /// SRV targets for `_service._proto.name`, in server order (the resolver
    /// orders them by priority). When `service` and `proto` are both empty,
    /// `name` is queried as-is.
    async fn srv(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<SrvTarget>, ResolveError>;
}

/// System-backed [`Lookup`].
#[derive(Debug, Clone)]
pub struct SystemLookup {
    servers: Vec<SocketAddr>,
}

impl SystemLookup {
    /// Nameservers from `/etc/resolv.conf`, falling back to localhost.
    pub fn new() -> Self {
        let servers = match std::fs::read_to_string("/etc/resolv.conf") {
            Ok(text) => parse_resolv_conf(&text),
            Err(_) => Vec::new(),
        };
        Self::with_servers(servers)
    }

    /// Use an explicit nameserver list.
    pub fn with_servers(mut servers: Vec<SocketAddr>) -> Self {
        if servers.is_empty() {
            servers.push(SocketAddr::from(([127, 0, 0, 1], 53)));
        }
        Self { servers }
    }

    /// One logical query: every retry pass walks the whole nameserver list.
    async fn query(&self, qname: &str, qtype: u16) -> Result<Response, ResolveError> {
        let mut last_err = ResolveError::Timeout;
        for attempt in 0..QUERY_RETRIES {
            for server in &self.servers {
                let id = rand::rng().random::<u16>();
                let packet = dns::encode_query(id, qname, qtype)?;
                log::debug!("[lookup] query {qname} type {qtype} -> {server} (attempt {attempt})");
                let outcome = match self.query_udp(server, &packet, id).await {
                    Ok(response) if response.header.truncated => {
                        log::debug!("[lookup] truncated response from {server}, retrying over tcp");
                        self.query_tcp(server, &packet, id).await
                    }
                    other => other,
                };
                match outcome.and_then(|response| validate(response, qname)) {
                    Ok(response) => return Ok(response),
                    Err(e) if transient(&e) => {
                        log::debug!("[lookup] {server} failed: {e}");
                        last_err = e;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Err(last_err)
    }

    async fn query_udp(
        &self,
        server: &SocketAddr,
        packet: &[u8],
        id: u16,
    ) -> Result<Response, ResolveError> {
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        socket.send(packet).await?;
        let mut buf = vec![0u8; dns::MAX_RESPONSE];
        let len = timeout(QUERY_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolveError::Timeout)??;
        match_id(Response::parse(&buf[..len])?, id)
    }

    async fn query_tcp(
        &self,
        server: &SocketAddr,
        packet: &[u8],
        id: u16,
    ) -> Result<Response, ResolveError> {
        let mut stream = timeout(QUERY_TIMEOUT, TcpStream::connect(server))
            .await
            .map_err(|_| ResolveError::Timeout)??;
        let len = u16::try_from(packet.len())
            .map_err(|_| ResolveError::BadPacket(WireError::InvalidPacket("query too large")))?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(packet).await?;
        let body = timeout(QUERY_TIMEOUT, async {
            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
            stream.read_exact(&mut body).await?;
            Ok::<Vec<u8>, io::Error>(body)
        })
        .await
        .map_err(|_| ResolveError::Timeout)??;
        match_id(Response::parse(&body)?, id)
    }
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lookup for SystemLookup {
    async fn host(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let addrs = tokio::net::lookup_host((name, 0u16)).await?;
        let ips: Vec<IpAddr> = addrs.map(|sa| sa.ip()).collect();
        if ips.is_empty() {
            return Err(ResolveError::NoSuchHost(name.to_string()));
        }
        Ok(ips)
    }

    async fn srv(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<SrvTarget>, ResolveError> {
        let qname = if service.is_empty() && proto.is_empty() {
            name.to_string()
        } else {
            format!("_{service}._{proto}.{name}")
        };
        let response = self.query(&qname, dns::TYPE_SRV).await?;
        let targets: Vec<SrvTarget> = response
            .answers
            .into_iter()
            .filter_map(|record| match record.data {
                RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                } => Some(SrvTarget {
                    target,
                    port,
                    priority,
                    weight,
                }),
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return Err(ResolveError::NoSuchHost(qname));
        }
        Ok(targets)
    }
}

fn validate(response: Response, qname: &str) -> Result<Response, ResolveError> {
    if !response.header.is_response {
        return Err(ResolveError::BadPacket(WireError::InvalidPacket(
            "not a response",
        )));
    }
    match response.header.rcode {
        0 => Ok(response),
        3 => Err(ResolveError::NoSuchHost(qname.to_string())),
        rcode => Err(ResolveError::ServFail(format!("{qname}: rcode {rcode}"))),
    }
}

fn match_id(response: Response, id: u16) -> Result<Response, ResolveError> {
    if response.header.id != id {
        return Err(ResolveError::BadPacket(WireError::InvalidPacket(
            "response id mismatch",
        )));
    }
    Ok(response)
}

/// Retry-worthy failures: timeouts, connection-level errors, server failures.
fn transient(err: &ResolveError) -> bool {
    match err {
        ResolveError::Timeout | ResolveError::ServFail(_) => true,
        ResolveError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
        ),
        _ => false,
    }
}

/// Extract `nameserver` entries; values that do not parse as IPs are skipped.
fn parse_resolv_conf(text: &str) -> Vec<SocketAddr> {
    let mut servers = Vec::new();
    for line in text.lines() {
        let line = match line.split_once(['#', ';']) {
            Some((head, _)) => head,
            None => line,
        };
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }
        if let Some(ip) = fields.next().and_then(|s| s.parse::<IpAddr>().ok()) {
            servers.push(SocketAddr::new(ip, 53));
        }
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolv_conf_nameservers() {
        let text = "\
# Managed by hand
nameserver 10.0.0.2
nameserver 2001:db8::53 ; secondary
search example.com
nameserver not-an-ip
";
        let servers = parse_resolv_conf(text);
        assert_eq!(
            servers,
            vec![
                "10.0.0.2:53".parse::<SocketAddr>().expect("v4"),
                "[2001:db8::53]:53".parse::<SocketAddr>().expect("v6"),
            ]
        );
    }

    #[test]
    fn empty_resolv_conf_falls_back_to_localhost() {
        let lookup = SystemLookup::with_servers(Vec::new());
        assert_eq!(
            lookup.servers,
            vec!["127.0.0.1:53".parse::<SocketAddr>().expect("loopback")]
        );
    }

    #[test]
    fn transient_classification() {
        assert!(transient(&ResolveError::Timeout));
        assert!(transient(&ResolveError::ServFail("x".into())));
        assert!(!transient(&ResolveError::NoSuchHost("x".into())));
        assert!(transient(&ResolveError::Io(io::Error::from(
            io::ErrorKind::ConnectionRefused
        ))));
        assert!(!transient(&ResolveError::Io(io::Error::from(
            io::ErrorKind::PermissionDenied
        ))));
    }
}
