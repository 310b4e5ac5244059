//! Listening endpoint with a scoped socket lifecycle.
//!
//! `ConnectionEndpoint` owns one listening socket and a reference on the
//! networking subsystem. The lifecycle is strictly ordered:
//!
//! ```text
//! create -> bind -> listen -> accept* -> close
//! ```
//!
//! A failed bind or listen leaves the endpoint in `Failed` with the socket
//! already released. `close` runs on drop, so every exit path releases the
//! socket and the subsystem reference exactly once.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::EndpointError;
use crate::runtime::peer::PeerConnection;
use crate::runtime::subsystem::{NetworkSubsystem, SubsystemGuard};

/// Lifecycle position of a `ConnectionEndpoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Socket allocated, not yet bound.
    Created,
    /// Bound to the local address.
    Bound,
    /// Accepting connections.
    Listening,
    /// Bind or listen failed. Terminal.
    Failed,
    /// Explicitly closed or dropped. Terminal.
    Closed,
}

/// Socket options applied at creation and to accepted peers.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_address: bool,
    /// Read timeout for accepted peers (`None` blocks forever).
    pub read_timeout: Option<Duration>,
    /// Write timeout for accepted peers (`None` blocks forever).
    pub write_timeout: Option<Duration>,
}

/// Owner of a single listening socket.
pub struct ConnectionEndpoint {
    addr: SocketAddr,
    /// `None` before creation succeeds and after release.
    socket: Option<Socket>,
    /// `Some` while this endpoint holds the subsystem.
    subsystem: Option<SubsystemGuard>,
    state: EndpointState,
    options: EndpointOptions,
}

impl ConnectionEndpoint {
    /// Create an endpoint for `port` on every local IPv4 address.
    pub fn create(port: u16) -> Result<Self, EndpointError> {
        Self::create_on(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            EndpointOptions::default(),
        )
    }

    /// Create an endpoint for an explicit address.
    pub fn create_on(addr: SocketAddr, options: EndpointOptions) -> Result<Self, EndpointError> {
        let mut endpoint = Self::create_with(addr, NetworkSubsystem::acquire, stream_socket)?;
        endpoint.configure(options)?;
        Ok(endpoint)
    }

    /// The subsystem reference is taken first. If socket allocation fails
    /// the reference is dropped before the error is returned.
    fn create_with<A, S>(addr: SocketAddr, acquire: A, make_socket: S) -> Result<Self, EndpointError>
    where
        A: FnOnce() -> Result<SubsystemGuard, EndpointError>,
        S: FnOnce(SocketAddr) -> io::Result<Socket>,
    {
        let subsystem = acquire()?;
        let socket = make_socket(addr).map_err(EndpointError::SocketCreation)?;

        debug!(addr = %addr, "Endpoint socket created");

        Ok(Self {
            addr,
            socket: Some(socket),
            subsystem: Some(subsystem),
            state: EndpointState::Created,
            options: EndpointOptions::default(),
        })
    }

    /// Apply socket options. Only valid before `bind`.
    pub fn configure(&mut self, options: EndpointOptions) -> Result<(), EndpointError> {
        let socket = self.socket_in("configure", EndpointState::Created)?;

        if options.reuse_address {
            socket
                .set_reuse_address(true)
                .map_err(EndpointError::SocketCreation)?;
        }

        self.options = options;
        Ok(())
    }

    /// Bind the socket to the configured address.
    ///
    /// On failure the socket is closed and the endpoint becomes `Failed`.
    /// A failed bind cannot be retried on the same endpoint.
    pub fn bind(&mut self) -> Result<(), EndpointError> {
        let socket = self.socket_in("bind", EndpointState::Created)?;

        if let Err(source) = socket.bind(&self.addr.into()) {
            self.socket = None;
            self.state = EndpointState::Failed;
            return Err(EndpointError::Bind {
                addr: self.addr,
                source,
            });
        }

        self.state = EndpointState::Bound;
        debug!(addr = %self.addr, "Endpoint bound");
        Ok(())
    }

    /// Activate the listen queue with the platform's maximum backlog.
    ///
    /// On failure both the socket and the subsystem reference are released.
    pub fn listen(&mut self) -> Result<(), EndpointError> {
        let socket = self.socket_in("listen", EndpointState::Bound)?;

        if let Err(e) = socket.listen(max_backlog()) {
            self.socket = None;
            self.subsystem = None;
            self.state = EndpointState::Failed;
            return Err(EndpointError::Listen(e));
        }

        self.state = EndpointState::Listening;
        debug!(addr = %self.addr, backlog = max_backlog(), "Endpoint listening");
        Ok(())
    }

    /// Block until a peer connects.
    ///
    /// Failures are per-attempt; the endpoint keeps listening.
    pub fn accept(&mut self) -> Result<PeerConnection, EndpointError> {
        let socket = self.socket_in("accept", EndpointState::Listening)?;

        let (peer, peer_addr) = socket.accept().map_err(EndpointError::Accept)?;
        let stream: TcpStream = peer.into();

        stream
            .set_read_timeout(self.options.read_timeout)
            .map_err(EndpointError::Accept)?;
        stream
            .set_write_timeout(self.options.write_timeout)
            .map_err(EndpointError::Accept)?;

        Ok(PeerConnection::new(stream, peer_addr.as_socket()))
    }

    /// Release the socket and the subsystem reference. Idempotent.
    pub fn close(&mut self) {
        let had_socket = self.socket.take().is_some();
        self.subsystem = None;
        if had_socket {
            debug!(
                addr = %self.addr,
                subsystem_users = NetworkSubsystem::active_users(),
                "Endpoint socket closed"
            );
        }
        self.state = EndpointState::Closed;
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Whether the listening handle is live.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Whether the endpoint still holds the networking subsystem.
    pub fn is_initialized(&self) -> bool {
        self.subsystem.is_some()
    }

    /// Address the socket is actually bound to.
    ///
    /// Differs from the configured address when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .and_then(|a| a.as_socket())
    }

    fn socket_in(
        &self,
        op: &'static str,
        expected: EndpointState,
    ) -> Result<&Socket, EndpointError> {
        match &self.socket {
            Some(socket) if self.state == expected => Ok(socket),
            _ => Err(EndpointError::InvalidState {
                op,
                state: self.state,
            }),
        }
    }
}

impl Drop for ConnectionEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEndpoint")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("open", &self.is_open())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn stream_socket(addr: SocketAddr) -> io::Result<Socket> {
    Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
}

#[cfg(unix)]
fn max_backlog() -> i32 {
    libc::SOMAXCONN
}

#[cfg(not(unix))]
fn max_backlog() -> i32 {
    0x7fff_ffff
}
