//! systemd readiness and watchdog notifications over `NOTIFY_SOCKET`.

use std::os::unix::net::UnixDatagram;
use std::time::Duration;

/// Whether we were started by systemd with a notification socket.
pub fn is_systemd_service() -> bool {
    std::env::var_os("NOTIFY_SOCKET").is_some()
}

/// Tell systemd the service finished starting up.
pub fn notify_ready() {
    match notify("READY=1") {
        Ok(()) => tracing::info!("notified systemd of service readiness"),
        Err(e) => tracing::warn!("failed to notify systemd of readiness: {e}"),
    }
}

/// Send a watchdog keep-alive ping.
pub fn notify_watchdog() {
    if std::env::var_os("WATCHDOG_USEC").is_none() {
        return;
    }
    if let Err(e) = notify("WATCHDOG=1") {
        tracing::warn!("failed to send systemd watchdog ping: {e}");
    }
}

/// Recommended ping interval: half the configured watchdog timeout.
pub fn watchdog_interval() -> Option<Duration> {
    let usec: u64 = std::env::var("WATCHDOG_USEC").ok()?.parse().ok()?;
    if usec == 0 {
        return None;
    }
    Some(Duration::from_micros(usec / 2))
}

fn notify(message: &str) -> std::io::Result<()> {
    let Some(socket_path) = std::env::var_os("NOTIFY_SOCKET") else {
        return Ok(());
    };

    let socket = UnixDatagram::unbound()?;
    let path = socket_path.to_string_lossy();

    if let Some(abstract_name) = path.strip_prefix('@') {
        // Abstract namespace socket (leading NUL on the wire).
        #[cfg(target_os = "linux")]
        {
            use std::os::linux::net::SocketAddrExt;
            let addr =
                std::os::unix::net::SocketAddr::from_abstract_name(abstract_name.as_bytes())?;
            socket.send_to_addr(message.as_bytes(), &addr)?;
            return Ok(());
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = abstract_name;
            return Err(std::io::Error::other("abstract sockets are Linux-only"));
        }
    }

    socket.send_to(message.as_bytes(), path.as_ref())?;
    Ok(())
}
