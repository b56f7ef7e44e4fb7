//! Listening socket creation.
//!
//! # Responsibilities
//! - Create, configure, bind and listen a TCP socket within a startup timeout
//!   (setup runs on the blocking pool so the event loop never stalls)
//! - Classify failures as retryable (address in use, timeout) or fatal
//!
//! # Design Decisions
//! - `SO_REUSEADDR` so TIME_WAIT remnants of a previous instance do not block us;
//!   a live listener still yields `EADDRINUSE`
//! - `TCP_NODELAY` and `SO_KEEPALIVE` on the listener (inherited by accepted
//!   sockets on Linux, re-applied per stream by `ServerHandle::accept`)

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::net::listener::ServerHandle;

/// Error type for bind attempts.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("port {port} is already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("listener on port {port} not ready within {timeout:?}")]
    Timeout { port: u16, timeout: Duration },

    #[error("failed to bind port {port}: {source}")]
    Other {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl BindError {
    /// Classify an I/O failure from socket setup.
    pub fn from_io(port: u16, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            BindError::PortInUse { port, source }
        } else {
            BindError::Other { port, source }
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BindError::PortInUse { .. } | BindError::Timeout { .. })
    }

    pub fn port(&self) -> u16 {
        match self {
            BindError::PortInUse { port, .. }
            | BindError::Timeout { port, .. }
            | BindError::Other { port, .. } => *port,
        }
    }
}

/// Capability: produce a listening `ServerHandle` for an address.
pub trait Binder: Send + Sync {
    fn bind(&self, addr: SocketAddr) -> impl Future<Output = Result<ServerHandle, BindError>> + Send;
}

/// Binds real TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpBinder {
    startup_timeout: Duration,
    backlog: i32,
    max_connections: usize,
}

impl TcpBinder {
    pub fn new(startup_timeout: Duration, backlog: i32, max_connections: usize) -> Self {
        Self {
            startup_timeout,
            backlog,
            max_connections,
        }
    }
}

impl Default for TcpBinder {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), 1024, 10_000)
    }
}

impl Binder for TcpBinder {
    async fn bind(&self, addr: SocketAddr) -> Result<ServerHandle, BindError> {
        let port = addr.port();
        let backlog = self.backlog;

        let std_listener =
            within_startup_timeout(port, self.startup_timeout, move || open_listener(addr, backlog))
                .await?;
        let listening =
            TcpListener::from_std(std_listener).map_err(|e| BindError::Other { port, source: e })?;

        let handle = ServerHandle::new(listening, self.max_connections)
            .map_err(|e| BindError::Other { port, source: e })?;

        tracing::info!(
            address = %handle.local_addr(),
            max_connections = self.max_connections,
            "Listener bound"
        );

        Ok(handle)
    }
}

/// Run blocking socket setup off the event loop, bounded by `timeout`.
///
/// On timeout the setup keeps running on the blocking pool; whatever it
/// produces is dropped there, releasing the socket.
async fn within_startup_timeout<F>(
    port: u16,
    timeout: Duration,
    setup: F,
) -> Result<std::net::TcpListener, BindError>
where
    F: FnOnce() -> std::io::Result<std::net::TcpListener> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(setup);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result.map_err(|e| BindError::from_io(port, e)),
        Ok(Err(join)) => Err(BindError::Other {
            port,
            source: std::io::Error::other(join),
        }),
        Err(_) => {
            tracing::warn!(
                port,
                timeout_ms = timeout.as_millis() as u64,
                "Socket setup did not finish within the startup timeout"
            );
            Err(BindError::Timeout { port, timeout })
        }
    }
}

fn open_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::listener::HandleState;

    #[tokio::test]
    async fn binds_free_port() {
        let binder = TcpBinder::default();
        let handle = binder.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_eq!(handle.state(), HandleState::Listening);
    }

    #[tokio::test]
    async fn occupied_port_is_retryable() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();

        let err = TcpBinder::default().bind(addr).await.unwrap_err();
        assert!(matches!(err, BindError::PortInUse { .. }), "got {err:?}");
        assert!(err.is_retryable());
        assert_eq!(err.port(), addr.port());
    }

    #[tokio::test]
    async fn unassigned_address_is_fatal() {
        // TEST-NET-1 is never assigned to a local interface.
        let err = TcpBinder::default()
            .bind("192.0.2.1:4011".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, BindError::Other { .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn slow_setup_times_out() {
        let err = within_startup_timeout(4011, Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            std::net::TcpListener::bind("127.0.0.1:0")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BindError::Timeout { port: 4011, .. }), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn setup_panic_is_fatal() {
        let err = within_startup_timeout(4011, Duration::from_secs(5), || {
            panic!("socket setup exploded")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BindError::Other { .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn classifies_io_errors() {
        let in_use = BindError::from_io(1, std::io::ErrorKind::AddrInUse.into());
        let denied = BindError::from_io(1, std::io::ErrorKind::PermissionDenied.into());
        let timeout = BindError::Timeout {
            port: 1,
            timeout: Duration::from_secs(10),
        };

        assert!(in_use.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!denied.is_retryable());
    }
}
