//! Endpoint addresses: literal parsing, host:port splitting and port-name
//! resolution against `/etc/services`.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;

use crate::resolve::ResolveError;

/// Transport family derived from a dial-style network string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
    Unknown,
}

impl Transport {
    /// Map a network string ("udp", "udp4", "tcp6", ...) to its transport.
    pub fn from_network(network: &str) -> Self {
        match network {
            "udp" | "udp4" | "udp6" => Transport::Udp,
            "tcp" | "tcp4" | "tcp6" => Transport::Tcp,
            _ => Transport::Unknown,
        }
    }

    /// Protocol label as used in `/etc/services`; empty when unknown.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Unknown => "",
        }
    }
}

/// A fully resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub transport: Transport,
    pub ip: IpAddr,
    pub port: u16,
}

impl Addr {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Transport label, for APIs that take a network name.
    pub fn network(&self) -> &'static str {
        self.transport.as_str()
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<Addr> for SocketAddr {
    fn from(addr: Addr) -> Self {
        addr.socket_addr()
    }
}

/// Parse a literal `host:port` address: the host must be an IP literal, the
/// port numeric or a known service name.
pub fn parse_addr(network: &str, address: &str) -> Result<Addr, ResolveError> {
    let (host, port) = split_host_port(address)
        .map_err(|_| ResolveError::InvalidAddress(address.to_string()))?;
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ResolveError::InvalidAddress(address.to_string()))?;
    let port = lookup_port(network, port)
        .map_err(|_| ResolveError::InvalidPort(address.to_string()))?;
    Ok(Addr {
        transport: Transport::from_network(network),
        ip,
        port,
    })
}

/// Resolve a port token: a decimal number in range, or a service name from
/// `/etc/services` matched against the network's protocol.
pub fn lookup_port(network: &str, port: &str) -> Result<u16, ResolveError> {
    if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = port.parse::<u32>() {
            if n <= u16::MAX as u32 {
                return Ok(n as u16);
            }
        }
        return Err(ResolveError::UnknownPort(port.to_string()));
    }
    let proto = Transport::from_network(network).as_str();
    service_port(proto, port).ok_or_else(|| ResolveError::UnknownPort(port.to_string()))
}

/// Why an address failed to split into host and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SplitError {
    /// No port at all; resolution may still derive one (SRV, default).
    MissingPort,
    /// Structurally broken, for example too many colons.
    Malformed(&'static str),
}

/// Split `host:port` or `[host]:port`. Distinguishes a merely missing port
/// from a malformed address so the resolver can fall back on the former.
pub(crate) fn split_host_port(address: &str) -> Result<(&str, &str), SplitError> {
    if let Some(rest) = address.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or(SplitError::Malformed("missing ']' in address"))?;
        let host = &rest[..end];
        let tail = &rest[end + 1..];
        let port = match tail.strip_prefix(':') {
            Some(port) => port,
            None if tail.is_empty() => return Err(SplitError::MissingPort),
            None => return Err(SplitError::Malformed("unexpected text after ']'")),
        };
        if port.contains(':') {
            return Err(SplitError::Malformed("too many colons in address"));
        }
        Ok((host, port))
    } else {
        match address.matches(':').count() {
            0 => Err(SplitError::MissingPort),
            1 => address.split_once(':').ok_or(SplitError::MissingPort),
            _ => Err(SplitError::Malformed("too many colons in address")),
        }
    }
}

static SERVICES: OnceLock<HashMap<(String, String), u16>> = OnceLock::new();

/// Port for a named service, e.g. ("udp", "domain") -> 53. The services file
/// is parsed once per process.
pub(crate) fn service_port(proto: &str, name: &str) -> Option<u16> {
    let table = SERVICES.get_or_init(|| {
        std::fs::read_to_string("/etc/services")
            .map(|text| parse_services(&text))
            .unwrap_or_default()
    });
    table
        .get(&(name.to_ascii_lowercase(), proto.to_string()))
        .copied()
}

/// Parse services lines: `name port/proto [aliases...] [# comment]`. The
/// first definition of a name/proto pair wins.
fn parse_services(text: &str) -> HashMap<(String, String), u16> {
    let mut table = HashMap::new();
    for line in text.lines() {
        let line = match line.split_once('#') {
            Some((head, _)) => head,
            None => line,
        };
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        table
            .entry((name.to_ascii_lowercase(), proto.to_string()))
            .or_insert(port);
        for alias in fields {
            table
                .entry((alias.to_ascii_lowercase(), proto.to_string()))
                .or_insert(port);
        }
    }
    table
}
