//! TCP and UDP connect probes.
//!
//! Both resolve the host with an IPv6-preferred policy and try each address
//! in order; the first address that succeeds wins.

use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

use crate::config::Protocol;
use crate::error::{ProbeError, ResolveError};

use super::resolver::{self, Family, FamilyPreference, SocketKind};

pub fn run(host: &str, port: u16, protocol: Protocol, timeout_ms: u64) -> Result<(), ProbeError> {
    match protocol {
        Protocol::Tcp => tcp_connect(host, port, timeout_ms),
        Protocol::Udp => udp_send(host, port, timeout_ms),
    }
}

/// TCP connect test: non-blocking connect with a writability wait, success
/// iff the socket reports no error within the timeout.
fn tcp_connect(host: &str, port: u16, timeout_ms: u64) -> Result<(), ProbeError> {
    let addrs = resolver::resolve(
        host,
        port,
        SocketKind::Stream,
        FamilyPreference::Ipv6Preferred,
    )?;
    let timeout = Duration::from_millis(timeout_ms);

    let mut last_err = String::new();
    let mut all_unreachable = true;
    for addr in &addrs {
        match TcpStream::connect_timeout(&addr.addr, timeout) {
            Ok(_) => {
                tracing::trace!("TCP connection succeeded to {}", addr.display);
                return Ok(());
            }
            Err(e) => {
                tracing::trace!("TCP connection failed to {}: {e}", addr.display);
                all_unreachable &= matches!(
                    e.raw_os_error(),
                    Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH)
                );
                last_err = e.to_string();
            }
        }
    }

    if all_unreachable {
        return Err(ProbeError::Resolve(ResolveError::NetworkUnreachable));
    }
    Err(ProbeError::ConnectionFailed(format!(
        "connection failed to all resolved addresses: {last_err}"
    )))
}

/// UDP connect test: a zero-length datagram that sends without error counts
/// as success (UDP gives no delivery signal).
fn udp_send(host: &str, port: u16, timeout_ms: u64) -> Result<(), ProbeError> {
    let addrs = resolver::resolve(
        host,
        port,
        SocketKind::Datagram,
        FamilyPreference::Ipv6Preferred,
    )?;
    let timeout = Duration::from_millis(timeout_ms);

    let mut last_err = String::new();
    for addr in &addrs {
        let bind_addr = match addr.family {
            Family::V4 => "0.0.0.0:0",
            Family::V6 => "[::]:0",
        };
        let socket = match UdpSocket::bind(bind_addr) {
            Ok(s) => s,
            Err(e) => {
                last_err = e.to_string();
                continue;
            }
        };
        if let Err(e) = socket.set_write_timeout(Some(timeout)) {
            last_err = e.to_string();
            continue;
        }
        match socket.send_to(&[], addr.addr) {
            Ok(_) => {
                tracing::trace!("UDP send succeeded to {}", addr.display);
                return Ok(());
            }
            Err(e) => {
                tracing::trace!("UDP send failed to {}: {e}", addr.display);
                last_err = e.to_string();
            }
        }
    }

    Err(ProbeError::SendFailed(format!(
        "UDP send failed to all resolved addresses: {last_err}"
    )))
}
