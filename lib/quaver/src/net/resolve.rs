//! Access point discovery: DNS service records first, plain host resolution second.
use hickory_resolver::Resolver;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// A candidate access point host.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceRecord {
    pub priority: u16,
    pub weight: u16,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Name resolution used by the login handshake. Swapped out in tests.
pub trait Resolve: Send {
    /// Looks up the SRV records of the service.
    fn service_records(&self, name: &str) -> io::Result<Vec<ServiceRecord>>;

    /// Resolves a host into socket addresses.
    fn addresses(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system's DNS configuration.
pub struct DnsResolver {
    inner: Resolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> io::Result<DnsResolver> {
        Ok(DnsResolver {
            inner: Resolver::from_system_conf()?,
        })
    }
}

impl Resolve for DnsResolver {
    fn service_records(&self, name: &str) -> io::Result<Vec<ServiceRecord>> {
        let lookup = self.inner.srv_lookup(name).map_err(resolve_error)?;

        let records = lookup
            .iter()
            .map(|srv| ServiceRecord {
                priority: srv.priority(),
                weight: srv.weight(),
                host: srv.target().to_utf8().trim_end_matches('.').to_string(),
                port: srv.port(),
            })
            .collect();

        Ok(sort_records(records))
    }

    fn addresses(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        match self.inner.lookup_ip(host) {
            Ok(lookup) => Ok(lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect()),
            // Hosts file entries and the like are only known to the system resolver
            Err(_) => Ok((host, port).to_socket_addrs()?.collect()),
        }
    }
}

#[inline]
fn resolve_error<E: fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Orders records the way they should be tried: lowest priority first, heavier weight first within
/// the same priority.
pub fn sort_records(mut records: Vec<ServiceRecord>) -> Vec<ServiceRecord> {
    records.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
    records
}

/// Parses an explicitly configured `host:port` access point.
pub fn parse_server(server: &str) -> Option<ServiceRecord> {
    let (host, port) = server.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return None;
    }

    Some(ServiceRecord {
        priority: 0,
        weight: 0,
        host: host.to_string(),
        port: port.parse().ok()?,
    })
}
