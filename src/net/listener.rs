//! The bound listening socket handed to the application.
//!
//! # Responsibilities
//! - Own the listening socket produced by a successful acquisition
//! - Accept incoming TCP connections until told to stop
//! - Enforce max_connections limit via semaphore
//! - Expose a cloneable `HandleControl` so the shutdown path can stop
//!   accepting and drain without owning the socket

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::net::connection::{ConnectionGuard, ConnectionTracker};

/// Lifecycle of a `ServerHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Socket created, not yet listening.
    Starting,
    /// Accepting connections.
    Listening,
    /// No longer accepting; in-flight connections finishing.
    Draining,
    /// Socket released.
    Closed,
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandleState::Starting => "starting",
            HandleState::Listening => "listening",
            HandleState::Draining => "draining",
            HandleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared control surface of a `ServerHandle`.
///
/// Cloning is cheap. Holding a control does not keep the socket open.
#[derive(Debug, Clone)]
pub struct HandleControl {
    state: Arc<watch::Sender<HandleState>>,
    stop: CancellationToken,
    connections: ConnectionTracker,
    local_addr: SocketAddr,
}

impl HandleControl {
    fn new(local_addr: SocketAddr) -> Self {
        let (state, _) = watch::channel(HandleState::Starting);
        Self {
            state: Arc::new(state),
            stop: CancellationToken::new(),
            connections: ConnectionTracker::new(),
            local_addr,
        }
    }

    pub fn state(&self) -> HandleState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<HandleState> {
        self.state.subscribe()
    }

    /// Token cancelled once accepting stops.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    pub(crate) fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    /// Stop accepting new connections. Idempotent.
    pub fn stop_accepting(&self) {
        self.advance(HandleState::Listening, HandleState::Draining);
        self.advance(HandleState::Starting, HandleState::Draining);
        self.stop.cancel();
    }

    /// Stop accepting and wait up to `grace` for in-flight connections.
    ///
    /// Returns `true` if every connection finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.stop_accepting();
        tokio::time::timeout(grace, self.connections.wait_idle())
            .await
            .is_ok()
    }

    fn advance(&self, from: HandleState, to: HandleState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }

    fn mark_closed(&self) {
        self.state.send_replace(HandleState::Closed);
    }
}

/// A bound, listening TCP socket with a connection limit.
///
/// Exactly one exists per successful acquisition. Dropping it releases the port.
#[derive(Debug)]
pub struct ServerHandle {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    control: HandleControl,
}

impl ServerHandle {
    /// Wrap a listening socket; the handle starts in `Listening`.
    pub fn new(listener: TcpListener, max_connections: usize) -> std::io::Result<Self> {
        let control = HandleControl::new(listener.local_addr()?);
        control.advance(HandleState::Starting, HandleState::Listening);
        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            control,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns `Ok(None)` once accepting has been stopped. The returned permit
    /// must be held for the connection's lifetime; it counts towards drain.
    pub async fn accept(
        &self,
    ) -> std::io::Result<Option<(TcpStream, SocketAddr, ConnectionPermit)>> {
        let stop = &self.control.stop;

        let slot = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(None),
            slot = self.connection_limit.clone().acquire_owned() => slot,
        };
        let slot = slot.map_err(|_| std::io::Error::other("connection limit closed"))?;

        let (stream, addr) = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(None),
            accepted = self.inner.accept() => accepted?,
        };

        tune_stream(&stream)?;
        let guard = self.control.connections().track();

        tracing::debug!(
            peer_addr = %addr,
            connection_id = %guard.id(),
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok(Some((
            stream,
            addr,
            ConnectionPermit {
                _slot: slot,
                guard,
            },
        )))
    }

    pub fn control(&self) -> HandleControl {
        self.control.clone()
    }

    pub fn state(&self) -> HandleState {
        self.control.state()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.control.local_addr
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.control.mark_closed();
        tracing::debug!(address = %self.control.local_addr, "Listening socket released");
    }
}

/// Low latency and dead-peer detection for accepted streams.
fn tune_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_keepalive(true)
}

/// A connection slot plus drain accounting.
///
/// When dropped, the slot is released and the connection stops counting
/// towards drain, even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
    guard: ConnectionGuard,
}

impl ConnectionPermit {
    pub fn connection_id(&self) -> crate::net::connection::ConnectionId {
        self.guard.id()
    }
}
