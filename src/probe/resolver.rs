//! Hostname resolution with IPv4/IPv6 preference policies.
//!
//! Literal IP addresses short-circuit DNS entirely. For the `*Preferred`
//! and `*Only` policies the resolver stops at the first address family that
//! yields at least one address; `DualStack` returns both families in
//! preference order.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::error::ResolveError;

/// Address family preference for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyPreference {
    Ipv4Only,
    Ipv6Only,
    Ipv4Preferred,
    Ipv6Preferred,
    DualStack,
}

/// Socket type the addresses will be used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

/// Address family of a resolved address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// One resolved endpoint, in the order it should be tried.
#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    pub family: Family,
    pub kind: SocketKind,
    pub addr: SocketAddr,
    pub display: String,
}

impl ResolvedAddress {
    fn new(addr: SocketAddr, kind: SocketKind) -> Self {
        let family = if addr.is_ipv4() { Family::V4 } else { Family::V6 };
        Self {
            family,
            kind,
            addr,
            display: addr.ip().to_string(),
        }
    }
}

/// Resolve `host` to an ordered list of addresses per the preference policy.
pub fn resolve(
    host: &str,
    port: u16,
    kind: SocketKind,
    preference: FamilyPreference,
) -> Result<Vec<ResolvedAddress>, ResolveError> {
    if host.is_empty() {
        return Err(ResolveError::InvalidHostname(host.to_string()));
    }

    // Literal addresses need no DNS.
    if let Ok(ip) = host.parse::<IpAddr>() {
        let matches_preference = match preference {
            FamilyPreference::Ipv4Only => ip.is_ipv4(),
            FamilyPreference::Ipv6Only => ip.is_ipv6(),
            _ => true,
        };
        if !matches_preference {
            return Err(ResolveError::UnsupportedFamily);
        }
        return Ok(vec![ResolvedAddress::new(SocketAddr::new(ip, port), kind)]);
    }

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ResolveError::Timeout,
            _ => ResolveError::DnsFailure(format!("{host}: {e}")),
        })?
        .collect();

    let v4: Vec<SocketAddr> = addrs.iter().copied().filter(SocketAddr::is_ipv4).collect();
    let v6: Vec<SocketAddr> = addrs.iter().copied().filter(SocketAddr::is_ipv6).collect();

    let ordered: Vec<SocketAddr> = match preference {
        FamilyPreference::Ipv4Only => v4,
        FamilyPreference::Ipv6Only => v6,
        FamilyPreference::Ipv4Preferred => {
            if !v4.is_empty() {
                v4
            } else {
                v6
            }
        }
        FamilyPreference::Ipv6Preferred => {
            if !v6.is_empty() {
                v6
            } else {
                v4
            }
        }
        FamilyPreference::DualStack => v6.into_iter().chain(v4).collect(),
    };

    if ordered.is_empty() {
        return Err(ResolveError::NoAddressesFound(host.to_string()));
    }

    Ok(ordered
        .into_iter()
        .map(|addr| ResolvedAddress::new(addr, kind))
        .collect())
}
