//! Resolver precedence tests driven by a scripted lookup backend.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use udp_mux::{
    Connection, Lookup, ResolveError, Resolver, SrvTarget, Transport, UdpMux,
};

/// In-memory [`Lookup`]: answers only what was scripted, everything else is
/// `NoSuchHost`.
#[derive(Default)]
struct ScriptedLookup {
    hosts: HashMap<String, Vec<IpAddr>>,
    srvs: HashMap<String, Vec<SrvTarget>>,
}

impl ScriptedLookup {
    fn new() -> Self {
        Self::default()
    }

    fn with_host(mut self, name: &str, ips: &[&str]) -> Self {
        let ips = ips.iter().map(|s| s.parse().expect("ip literal")).collect();
        self.hosts.insert(name.to_string(), ips);
        self
    }

    fn with_srv(mut self, qname: &str, targets: Vec<SrvTarget>) -> Self {
        self.srvs.insert(qname.to_string(), targets);
        self
    }

    fn resolver(self) -> Resolver {
        Resolver::with_lookup(Arc::new(self))
    }
}

#[async_trait]
impl Lookup for ScriptedLookup {
    async fn host(&self, name: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::NoSuchHost(name.to_string()))
    }

    async fn srv(
        &self,
        service: &str,
        proto: &str,
        name: &str,
    ) -> Result<Vec<SrvTarget>, ResolveError> {
        let qname = format!("_{service}._{proto}.{name}");
        self.srvs
            .get(&qname)
            .cloned()
            .ok_or_else(|| ResolveError::NoSuchHost(qname))
    }
}

fn srv(target: &str, port: u16, priority: u16) -> SrvTarget {
    SrvTarget {
        target: target.to_string(),
        port,
        priority,
        weight: 0,
    }
}

// ---------------------------------------------------------------------------
// 1. host:port addresses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn literal_host_port_needs_no_lookup() {
    let resolver = ScriptedLookup::new().resolver();
    let addr = resolver
        .resolve("udp", "10.1.2.3:4567", "raft", None)
        .await
        .expect("literal resolves");
    assert_eq!(addr.transport, Transport::Udp);
    assert_eq!(addr.ip, "10.1.2.3".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 4567);
    assert_eq!(addr.network(), "udp");
}

#[tokio::test]
async fn hostname_with_port_resolves_the_host() {
    let resolver = ScriptedLookup::new()
        .with_host("db.internal", &["192.0.2.10", "192.0.2.11"])
        .resolver();
    let addr = resolver
        .resolve("udp", "db.internal:9000", "raft", None)
        .await
        .expect("hostname resolves");
    assert_eq!(addr.ip, "192.0.2.10".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 9000);
}

#[tokio::test]
async fn ipv6_literal_with_port() {
    let resolver = ScriptedLookup::new().resolver();
    let addr = resolver
        .resolve("udp", "[2001:db8::1]:9000", "raft", None)
        .await
        .expect("bracketed literal resolves");
    assert_eq!(addr.ip, "2001:db8::1".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.socket_addr().to_string(), "[2001:db8::1]:9000");
}

// ---------------------------------------------------------------------------
// 2. SRV precedence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn srv_targets_tried_in_priority_order() {
    // Scripted out of order; priority 10 must win over 20.
    let resolver = ScriptedLookup::new()
        .with_srv(
            "_raft._udp.cluster.internal",
            vec![srv("b.node", 7001, 20), srv("a.node", 7000, 10)],
        )
        .with_host("a.node", &["192.0.2.1"])
        .with_host("b.node", &["192.0.2.2"])
        .resolver();
    let addr = resolver
        .resolve("udp", "cluster.internal", "raft", None)
        .await
        .expect("srv resolves");
    assert_eq!(addr.ip, "192.0.2.1".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 7000);
}

#[tokio::test]
async fn unresolvable_srv_target_falls_through_to_the_next() {
    let resolver = ScriptedLookup::new()
        .with_srv(
            "_raft._udp.cluster.internal",
            vec![srv("dead.node", 7000, 10), srv("live.node", 7001, 20)],
        )
        .with_host("live.node", &["192.0.2.7"])
        .resolver();
    let addr = resolver
        .resolve("udp", "cluster.internal", "raft", None)
        .await
        .expect("second target resolves");
    assert_eq!(addr.ip, "192.0.2.7".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 7001);
}

#[tokio::test]
async fn srv_target_ips_pass_through_as_literals() {
    let resolver = ScriptedLookup::new()
        .with_srv(
            "_raft._udp.cluster.internal",
            vec![srv("192.0.2.40", 7000, 10)],
        )
        .resolver();
    let addr = resolver
        .resolve("udp", "cluster.internal", "raft", None)
        .await
        .expect("literal target resolves");
    assert_eq!(addr.ip, "192.0.2.40".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 7000);
}

// ---------------------------------------------------------------------------
// 3. Fallbacks and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_srv_falls_back_to_default_port() {
    // No service name, no SRV record scripted: the bare hostname plus the
    // supplied default port wins.
    let resolver = ScriptedLookup::new()
        .with_host("app.internal", &["192.0.2.9"])
        .resolver();
    let addr = resolver
        .resolve("udp", "app.internal", "", Some(8125))
        .await
        .expect("default port applies");
    assert_eq!(addr.ip, "192.0.2.9".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 8125);
}

#[tokio::test]
async fn exhausted_srv_targets_fall_back_to_default_port() {
    // Every target is unresolvable, but the bare hostname is.
    let resolver = ScriptedLookup::new()
        .with_srv(
            "_raft._udp.app.internal",
            vec![srv("gone.node", 7000, 10)],
        )
        .with_host("app.internal", &["192.0.2.44"])
        .resolver();
    let addr = resolver
        .resolve("udp", "app.internal", "raft", Some(9))
        .await
        .expect("default port applies");
    assert_eq!(addr.ip, "192.0.2.44".parse::<IpAddr>().expect("ip"));
    assert_eq!(addr.port, 9);
}

#[tokio::test]
async fn no_port_no_srv_no_default_fails() {
    let resolver = ScriptedLookup::new()
        .with_host("app.internal", &["192.0.2.9"])
        .resolver();
    let err = resolver
        .resolve("udp", "app.internal", "raft", None)
        .await
        .expect_err("nothing supplies a port");
    assert!(matches!(err, ResolveError::MissingPortOrNoSrv(_)));
}

#[tokio::test]
async fn malformed_addresses_are_rejected() {
    let resolver = ScriptedLookup::new().resolver();

    let err = resolver
        .resolve("udp", "1.2.3.4:5:6", "raft", None)
        .await
        .expect_err("too many colons");
    assert!(matches!(err, ResolveError::InvalidAddress(_)));

    // Unbracketed IPv6 is indistinguishable from colon soup.
    let err = resolver
        .resolve("udp", "2001:db8::1", "raft", None)
        .await
        .expect_err("unbracketed ipv6");
    assert!(matches!(err, ResolveError::InvalidAddress(_)));

    let err = resolver
        .resolve("udp", "10.0.0.1:nosuchservice", "raft", None)
        .await
        .expect_err("unresolvable port token");
    assert!(matches!(err, ResolveError::UnknownPort(_)));
}

#[tokio::test]
async fn unknown_host_with_port_fails() {
    let resolver = ScriptedLookup::new().resolver();
    let err = resolver
        .resolve("udp", "ghost.internal:9000", "raft", None)
        .await
        .expect_err("host is not scripted");
    assert!(matches!(err, ResolveError::NoSuchHost(_)));
}

#[tokio::test]
async fn resolve_ip_prefers_literals() {
    let resolver = ScriptedLookup::new()
        .with_host("multi.internal", &["192.0.2.20", "192.0.2.21"])
        .resolver();

    let ip = resolver
        .resolve_ip("2001:db8::7")
        .await
        .expect("literal passes through");
    assert_eq!(ip, "2001:db8::7".parse::<IpAddr>().expect("ip"));

    let ip = resolver
        .resolve_ip("multi.internal")
        .await
        .expect("hostname resolves");
    assert_eq!(ip, "192.0.2.20".parse::<IpAddr>().expect("ip"));
}

// ---------------------------------------------------------------------------
// 4. Resolution feeding the multiplexer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dial_resolved_registers_the_resolved_peer() {
    let server = UdpMux::bind("127.0.0.1:0".parse().expect("loopback addr"))
        .await
        .expect("bind server");
    let client = UdpMux::bind("127.0.0.1:0".parse().expect("loopback addr"))
        .await
        .expect("bind client");

    let resolver = ScriptedLookup::new()
        .with_srv(
            "_echo._udp.echo.internal",
            vec![srv("127.0.0.1", server.local_addr().port(), 10)],
        )
        .resolver();

    let conn = client
        .dial_resolved(&resolver, "udp", "echo.internal", "echo", None)
        .await
        .expect("dial through srv");
    assert_eq!(conn.remote_addr(), server.local_addr());

    conn.write(b"hi").await.expect("write");
    let peer = server.accept().await.expect("accept");
    let mut buf = [0u8; 8];
    let n = peer.read(&mut buf).await.expect("read");
    assert_eq!(&buf[..n], b"hi");
}
