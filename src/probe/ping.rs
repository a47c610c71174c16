//! ICMP echo probe with a three-stage fallback chain.
//!
//! Tries an unprivileged ICMP datagram socket first, then a raw socket
//! (needs CAP_NET_RAW), and finally shells out to the system `ping`
//! command. The first implementation to report success wins; otherwise the
//! last error is returned.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Command;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};

use super::resolver::{self, FamilyPreference, SocketKind};
use crate::error::ProbeError;

/// Ping sequence counter so concurrent pings can be told apart.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Process-wide echo identifier, generated once.
static PING_IDENTIFIER: OnceLock<u16> = OnceLock::new();

fn ping_id() -> (u16, u16) {
    let identifier = *PING_IDENTIFIER.get_or_init(rand::random);
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

/// Run a ping probe against `host` with the given timeout.
pub fn run(host: &str, timeout_ms: u64) -> Result<(), ProbeError> {
    let timeout = Duration::from_millis(timeout_ms);

    let last_err = match resolver::resolve(
        host,
        0,
        SocketKind::Datagram,
        FamilyPreference::Ipv6Preferred,
    ) {
        Ok(addrs) => {
            let ip = addrs[0].addr.ip();
            match datagram_ping(ip, timeout) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("datagram ping to {host} failed: {e}");
                    match raw_ping(ip, timeout) {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            tracing::debug!("raw-socket ping to {host} failed: {e}");
                            e
                        }
                    }
                }
            }
        }
        Err(e) => ProbeError::Resolve(e),
    };

    system_ping(host, timeout_ms).map_err(|e| {
        tracing::debug!("system ping to {host} failed: {e} (previous error: {last_err})");
        e
    })
}

fn icmp_socket(ip: IpAddr, kind: Type, timeout: Duration) -> Result<Socket, ProbeError> {
    let (domain, proto) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, kind, Some(proto))
        .map_err(|e| ProbeError::ConnectionFailed(format!("ICMP socket: {e}")))?;
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::ConnectionFailed(format!("set timeout: {e}")))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::ConnectionFailed(format!("set timeout: {e}")))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::ConnectionFailed(format!("connect: {e}")))?;

    Ok(socket)
}

fn send_echo_request(
    socket: &Socket,
    ip: IpAddr,
    identifier: u16,
    sequence: u16,
) -> Result<(), ProbeError> {
    let packet = match ip {
        IpAddr::V4(_) => build_icmp_echo_request(identifier, sequence),
        IpAddr::V6(_) => build_icmpv6_echo_request(identifier, sequence),
    };
    socket
        .send(&packet)
        .map_err(|e| ProbeError::SendFailed(e.to_string()))?;
    Ok(())
}

fn recv_reply(socket: &Socket, buf: &mut [MaybeUninit<u8>; 1500]) -> Result<usize, ProbeError> {
    socket.recv(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
            ProbeError::TimeoutExceeded
        } else {
            ProbeError::ConnectionFailed(format!("recv: {e}"))
        }
    })
}

/// Unprivileged ICMP datagram ping. Success iff any reply byte arrives.
fn datagram_ping(ip: IpAddr, timeout: Duration) -> Result<(), ProbeError> {
    let socket = icmp_socket(ip, Type::DGRAM, timeout)?;
    let (identifier, sequence) = ping_id();
    send_echo_request(&socket, ip, identifier, sequence)?;

    let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
    let len = recv_reply(&socket, &mut buf)?;
    if len > 0 {
        Ok(())
    } else {
        Err(ProbeError::ConnectionFailed("empty ICMP reply".into()))
    }
}

/// Raw-socket ping. Loops until a matching echo reply arrives or the
/// deadline passes.
fn raw_ping(ip: IpAddr, timeout: Duration) -> Result<(), ProbeError> {
    let socket = icmp_socket(ip, Type::RAW, timeout)?;
    let (identifier, sequence) = ping_id();
    send_echo_request(&socket, ip, identifier, sequence)?;

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(ProbeError::TimeoutExceeded)?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::ConnectionFailed(format!("set timeout: {e}")))?;

        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = recv_reply(&socket, &mut buf)?;
        // SAFETY: recv initialized `len` bytes
        let data: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let matched = match ip {
            IpAddr::V4(_) => is_echo_reply_v4(data, identifier),
            IpAddr::V6(_) => is_echo_reply_v6(data, identifier),
        };
        if matched {
            return Ok(());
        }
        // Someone else's packet, keep waiting for ours.
    }
}

/// Check a raw IPv4 reply: skip the IP header, then type 0 with our id.
fn is_echo_reply_v4(data: &[u8], expected_id: u16) -> bool {
    if data.len() < 20 + 8 {
        return false;
    }
    let ip_header_len = ((data[0] & 0x0f) as usize) * 4;
    if data.len() < ip_header_len + 8 {
        return false;
    }
    let icmp = &data[ip_header_len..];
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    icmp[0] == 0 && reply_id == expected_id
}

/// Check an ICMPv6 reply (type 129); the kernel strips the IPv6 header.
fn is_echo_reply_v6(data: &[u8], expected_id: u16) -> bool {
    if data.len() < 8 {
        return false;
    }
    let reply_id = u16::from_be_bytes([data[4], data[5]]);
    data[0] == 129 && reply_id == expected_id
}

/// Build an ICMP Echo Request packet (type 8, code 0).
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 8];

    packet[0] = 8; // Type: Echo Request
    packet[1] = 0; // Code: 0
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0). The checksum is
/// filled in by the kernel.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 8];

    packet[0] = 128; // Type: Echo Request
    packet[1] = 0; // Code: 0
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    packet
}

/// 16-bit ones'-complement checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }

    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

fn hostname_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._:-]{1,255}$").unwrap())
}

fn success_patterns() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"\d+ bytes from").unwrap(),
            Regex::new(r"\d+ packets transmitted, \d+ received").unwrap(),
            Regex::new(r"time=\d+(\.\d+)?\s*ms").unwrap(),
        ]
    })
}

/// Shell out to the system `ping`. The hostname is validated against a
/// strict character set before ever reaching a command line.
fn system_ping(host: &str, timeout_ms: u64) -> Result<(), ProbeError> {
    if !hostname_pattern().is_match(host) {
        return Err(ProbeError::InvalidConfig(format!(
            "invalid characters in hostname: {host}"
        )));
    }

    let wait_secs = timeout_ms.div_ceil(1000) + 1;
    let output = Command::new("ping")
        .args(["-c", "1", "-W", &wait_secs.to_string(), host])
        .output()
        .map_err(|e| ProbeError::ConnectionFailed(format!("failed to execute ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if output.status.success() && success_patterns().iter().any(|re| re.is_match(&stdout)) {
        Ok(())
    } else {
        Err(ProbeError::ConnectionFailed(
            "ping failed or host unreachable".into(),
        ))
    }
}
