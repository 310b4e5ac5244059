//! Error types for endpoint and peer operations.
//!
//! Setup-time errors (initialization, socket creation, bind, listen) are
//! fatal to the endpoint. Accept and transfer errors only affect a single
//! connection attempt and the accept loop keeps going.

use std::io;
use std::net::SocketAddr;

use crate::runtime::EndpointState;

/// Errors raised by `ConnectionEndpoint` and `PeerConnection`.
#[derive(Debug)]
pub enum EndpointError {
    /// The platform networking subsystem could not start.
    Initialization(io::Error),
    /// The listening socket could not be allocated.
    SocketCreation(io::Error),
    /// The configured address could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
    /// The listen queue could not be activated.
    Listen(io::Error),
    /// A single accept attempt failed.
    Accept(io::Error),
    /// Receive or send on a peer connection failed.
    Transfer(io::Error),
    /// Operation called out of lifecycle order.
    InvalidState {
        op: &'static str,
        state: EndpointState,
    },
}

impl EndpointError {
    /// Whether the error ends the endpoint's useful life.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EndpointError::Accept(_) | EndpointError::Transfer(_))
    }

    /// Whether a blocking call gave up because its timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind(),
            Some(io::ErrorKind::WouldBlock) | Some(io::ErrorKind::TimedOut)
        )
    }

    /// The underlying OS error kind, if any.
    pub fn kind(&self) -> Option<io::ErrorKind> {
        match self {
            EndpointError::Initialization(e)
            | EndpointError::SocketCreation(e)
            | EndpointError::Listen(e)
            | EndpointError::Accept(e)
            | EndpointError::Transfer(e) => Some(e.kind()),
            EndpointError::Bind { source, .. } => Some(source.kind()),
            EndpointError::InvalidState { .. } => None,
        }
    }
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::Initialization(e) => {
                write!(f, "Networking subsystem initialization failed: {}", e)
            }
            EndpointError::SocketCreation(e) => write!(f, "Socket creation failed: {}", e),
            EndpointError::Bind { addr, source } => {
                write!(f, "Bind to {} failed: {}", addr, source)
            }
            EndpointError::Listen(e) => write!(f, "Listen failed: {}", e),
            EndpointError::Accept(e) => write!(f, "Accept failed: {}", e),
            EndpointError::Transfer(e) => write!(f, "Transfer failed: {}", e),
            EndpointError::InvalidState { op, state } => {
                write!(f, "Cannot {} while endpoint is {:?}", op, state)
            }
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EndpointError::Initialization(e)
            | EndpointError::SocketCreation(e)
            | EndpointError::Listen(e)
            | EndpointError::Accept(e)
            | EndpointError::Transfer(e) => Some(e),
            EndpointError::Bind { source, .. } => Some(source),
            EndpointError::InvalidState { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_fatality() {
        let io_err = || io::Error::new(io::ErrorKind::Other, "boom");

        assert!(EndpointError::Initialization(io_err()).is_fatal());
        assert!(EndpointError::SocketCreation(io_err()).is_fatal());
        assert!(EndpointError::Listen(io_err()).is_fatal());
        assert!(EndpointError::Bind {
            addr: "0.0.0.0:8080".parse().unwrap(),
            source: io_err(),
        }
        .is_fatal());

        assert!(!EndpointError::Accept(io_err()).is_fatal());
        assert!(!EndpointError::Transfer(io_err()).is_fatal());
    }

    #[test]
    fn test_timeout_detection() {
        let err = |kind| EndpointError::Transfer(io::Error::new(kind, "x"));

        assert!(err(io::ErrorKind::WouldBlock).is_timeout());
        assert!(err(io::ErrorKind::TimedOut).is_timeout());
        assert!(!err(io::ErrorKind::ConnectionReset).is_timeout());
    }

    #[test]
    fn test_display_and_source() {
        let err = EndpointError::Bind {
            addr: "0.0.0.0:8080".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Bind to 0.0.0.0:8080 failed: in use");
        assert_eq!(err.kind(), Some(io::ErrorKind::AddrInUse));
        assert!(err.source().is_some());

        let err = EndpointError::InvalidState {
            op: "accept",
            state: EndpointState::Created,
        };
        assert_eq!(err.to_string(), "Cannot accept while endpoint is Created");
        assert!(err.source().is_none());
        assert!(err.kind().is_none());
    }
}
