//! Sequential accept loop.
//!
//! Accepts one peer at a time, reads whatever it sends, writes the fixed
//! response and closes it before accepting the next. Setup errors are
//! returned to the caller; per-connection errors are logged and the loop
//! carries on.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, ExchangeMode};
use crate::error::EndpointError;
use crate::protocols::http::{request_line, response};
use crate::runtime::{ConnectionEndpoint, PeerConnection};

/// Outcome of one peer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Response written; carries bytes received and sent.
    Answered { received: usize, sent: usize },
    /// Exchange abandoned after a transfer error.
    Abandoned,
}

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server { config }
    }

    /// Open the endpoint and serve connections forever.
    pub fn run(&self) -> Result<(), EndpointError> {
        let mut endpoint = self.open()?;

        info!(
            address = %endpoint.local_addr().unwrap_or_else(|| self.config.listen_addr()),
            port = endpoint.port(),
            "Server listening"
        );

        self.serve(&mut endpoint, None);
        Ok(())
    }

    /// Create, bind and listen on the configured address.
    pub fn open(&self) -> Result<ConnectionEndpoint, EndpointError> {
        let mut endpoint = match self.config.host {
            IpAddr::V4(host) if host.is_unspecified() => {
                let mut endpoint = ConnectionEndpoint::create(self.config.port)?;
                endpoint.configure(self.config.endpoint_options())?;
                endpoint
            }
            _ => ConnectionEndpoint::create_on(
                self.config.listen_addr(),
                self.config.endpoint_options(),
            )?,
        };
        endpoint.bind()?;
        endpoint.listen()?;
        Ok(endpoint)
    }

    /// Accept loop. With a `limit`, returns after that many peers.
    ///
    /// Returns the number of peers accepted.
    pub fn serve(&self, endpoint: &mut ConnectionEndpoint, limit: Option<usize>) -> usize {
        let payload = response();
        let mut accepted = 0;

        while limit.map_or(true, |max| accepted < max) {
            let peer = match endpoint.accept() {
                Ok(peer) => peer,
                Err(e) if e.is_fatal() => {
                    // Only reachable if the endpoint was closed underneath us.
                    warn!(error = %e, state = ?endpoint.state(), "Endpoint unusable, stopping accept loop");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, kind = ?e.kind(), "Failed to accept connection");
                    continue;
                }
            };

            accepted += 1;
            let outcome = serve_peer(
                peer,
                &payload,
                self.config.exchange,
                self.config.buffer_size,
                self.config.header_grace,
            );
            match outcome {
                Exchange::Answered { received, sent } => {
                    trace!(received, sent, "Exchange complete");
                }
                Exchange::Abandoned => {}
            }
        }

        accepted
    }
}

/// Handle a single peer: receive, respond, close.
///
/// The peer is consumed, so it is closed on every path out of here. In
/// `Complete` mode a peer that stops sending mid-request for longer than
/// `header_grace` is answered with what arrived so far.
pub fn serve_peer(
    mut peer: PeerConnection,
    payload: &Bytes,
    mode: ExchangeMode,
    buffer_size: usize,
    header_grace: Duration,
) -> Exchange {
    let peer_addr = peer.peer_addr();
    debug!(peer = ?peer_addr, "New connection");

    let mut buffer = vec![0u8; buffer_size];
    let received = match mode {
        ExchangeMode::Single => peer.receive(&mut buffer),
        ExchangeMode::Complete => peer.receive_request(&mut buffer, header_grace),
    };

    let received = match received {
        Ok(n) => n,
        Err(e) => {
            debug!(peer = ?peer_addr, error = %e, "Receive failed, abandoning exchange");
            peer.close();
            return Exchange::Abandoned;
        }
    };

    if received > 0 {
        trace!(peer = ?peer_addr, request = %request_line(&buffer[..received]), "Received request");
    } else {
        trace!(peer = ?peer_addr, "Peer sent no data");
    }

    let sent = match mode {
        ExchangeMode::Single => peer.send(payload),
        ExchangeMode::Complete => peer.send_all(payload),
    };

    let outcome = match sent {
        Ok(sent) => {
            if sent < payload.len() {
                debug!(peer = ?peer_addr, sent, total = payload.len(), "Partial response written");
            }
            Exchange::Answered { received, sent }
        }
        Err(e) => {
            debug!(peer = ?peer_addr, error = %e, "Send failed");
            Exchange::Abandoned
        }
    };

    peer.close();
    debug!(peer = ?peer_addr, "Connection closed");
    outcome
}
