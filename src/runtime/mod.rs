//! Blocking socket runtime.
//!
//! Connections are served strictly one at a time on the calling thread:
//! - `NetworkSubsystem`: process-wide, reference-counted platform setup
//! - `ConnectionEndpoint`: the listening socket and its lifecycle
//! - `PeerConnection`: one accepted connection, closed after one exchange

mod endpoint;
mod peer;
mod subsystem;

pub use endpoint::{ConnectionEndpoint, EndpointOptions, EndpointState};
pub use peer::PeerConnection;
