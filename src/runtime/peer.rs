//! A single accepted peer connection.
//!
//! Peers live for exactly one request/response exchange and are closed
//! afterwards. Nothing is pooled or reused.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::trace;

use crate::error::EndpointError;
use crate::protocols::http::find_header_end;

/// Connection handed out by `ConnectionEndpoint::accept`.
#[derive(Debug)]
pub struct PeerConnection {
    /// `None` once the connection has been closed.
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
}

impl PeerConnection {
    pub(crate) fn new(stream: TcpStream, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            stream: Some(stream),
            peer_addr,
        }
    }

    /// Remote address, if the platform reported one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the handle is still open.
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Single read attempt of at most `buf.len()` bytes.
    ///
    /// Returns 0 when the peer closed its side.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, EndpointError> {
        let stream = self.stream_mut()?;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EndpointError::Transfer(e)),
            }
        }
    }

    /// Read until the header block is complete, `buf` is full, the peer
    /// closes, or the peer goes quiet for `grace` after sending something.
    /// Returns the number of bytes filled.
    ///
    /// The first read blocks under the connection's own read timeout. Once
    /// data has arrived, each further read is bounded by `grace`, so a peer
    /// that never sends a header terminator still gets answered. The
    /// original read timeout is restored before returning.
    pub fn receive_request(
        &mut self,
        buf: &mut [u8],
        grace: Duration,
    ) -> Result<usize, EndpointError> {
        let mut filled = 0;
        let mut saved_timeout = None;

        let result = loop {
            if filled == buf.len() {
                break Ok(filled);
            }

            let n = match self.receive(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if filled > 0 && e.is_timeout() => {
                    trace!(filled, "Peer idle before end of headers");
                    break Ok(filled);
                }
                Err(e) => break Err(e),
            };
            if n == 0 {
                trace!(filled, "Peer closed before end of headers");
                break Ok(filled);
            }
            filled += n;

            if find_header_end(&buf[..filled]).is_some() {
                break Ok(filled);
            }

            if saved_timeout.is_none() {
                match self.bound_read_timeout(grace) {
                    Ok(previous) => saved_timeout = Some(previous),
                    Err(e) => break Err(e),
                }
            }
        };

        if let (Some(previous), Some(stream)) = (saved_timeout, self.stream.as_ref()) {
            // Best effort; the stream is about to be closed.
            let _ = stream.set_read_timeout(previous);
        }

        result
    }

    /// Cap the read timeout at `grace`, returning the previous setting.
    fn bound_read_timeout(&mut self, grace: Duration) -> Result<Option<Duration>, EndpointError> {
        let stream = self.stream_mut()?;
        let previous = stream.read_timeout().map_err(EndpointError::Transfer)?;

        let grace = grace.max(Duration::from_millis(1));
        let bounded = previous.map_or(grace, |t| t.min(grace));
        stream
            .set_read_timeout(Some(bounded))
            .map_err(EndpointError::Transfer)?;

        Ok(previous)
    }

    /// Single write attempt. May write fewer bytes than `data.len()`.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, EndpointError> {
        let stream = self.stream_mut()?;
        loop {
            match stream.write(data) {
                Ok(n) => return Ok(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EndpointError::Transfer(e)),
            }
        }
    }

    /// Write every byte of `data`, retrying partial writes.
    pub fn send_all(&mut self, data: &[u8]) -> Result<usize, EndpointError> {
        let mut written = 0;

        while written < data.len() {
            match self.send(&data[written..])? {
                0 => {
                    return Err(EndpointError::Transfer(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    )));
                }
                n => written += n,
            }
        }

        Ok(written)
    }

    /// Release the handle. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone; the handle is released either way.
            let _ = stream.shutdown(Shutdown::Both);
            trace!(peer = ?self.peer_addr, "Peer closed");
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, EndpointError> {
        self.stream.as_mut().ok_or_else(|| {
            EndpointError::Transfer(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer connection already closed",
            ))
        })
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    const GRACE: Duration = Duration::from_secs(5);

    fn pair() -> (PeerConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer_addr) = listener.accept().unwrap();
        (PeerConnection::new(server, Some(peer_addr)), client)
    }

    #[test]
    fn test_receive_single_attempt() {
        let (mut peer, mut client) = pair();
        client.write_all(b"hello").unwrap();

        let mut buf = [0u8; 3];
        let n = peer.receive(&mut buf).unwrap();
        assert!(n >= 1 && n <= 3);
        assert_eq!(&buf[..n], &b"hello"[..n]);
    }

    #[test]
    fn test_receive_zero_on_orderly_close() {
        let (mut peer, client) = pair();
        drop(client);

        let mut buf = [0u8; 16];
        assert_eq!(peer.receive(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_receive_request_stops_at_header_end() {
        let (mut peer, mut client) = pair();

        let writer = thread::spawn(move || {
            client.write_all(b"GET / HTTP/1.1\r\n").unwrap();
            client.write_all(b"Host: x\r\n\r\n").unwrap();
            client
        });

        let mut buf = [0u8; 1024];
        let n = peer.receive_request(&mut buf, GRACE).unwrap();
        assert_eq!(&buf[..n], b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_receive_request_stops_when_buffer_full() {
        let (mut peer, mut client) = pair();
        client.write_all(&[b'a'; 64]).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(peer.receive_request(&mut buf, GRACE).unwrap(), 16);
    }

    #[test]
    fn test_receive_request_returns_after_idle_peer() {
        let (mut peer, mut client) = pair();
        client.write_all(&[0x00, 0xff, 0x13, 0x37]).unwrap();

        let mut buf = [0u8; 1024];
        let n = peer
            .receive_request(&mut buf, Duration::from_millis(50))
            .unwrap();
        assert_eq!(&buf[..n], &[0x00, 0xff, 0x13, 0x37]);

        // The connection's own timeout setting is put back.
        let stream = peer.stream.as_ref().unwrap();
        assert_eq!(stream.read_timeout().unwrap(), None);
        drop(client);
    }

    #[test]
    fn test_receive_request_keeps_shorter_timeout() {
        let (mut peer, mut client) = pair();
        let configured = Some(Duration::from_millis(20));
        peer.stream.as_ref().unwrap().set_read_timeout(configured).unwrap();
        client.write_all(b"GET").unwrap();

        let mut buf = [0u8; 64];
        let n = peer.receive_request(&mut buf, Duration::from_secs(30)).unwrap();
        assert_eq!(&buf[..n], b"GET");
        assert_eq!(peer.stream.as_ref().unwrap().read_timeout().unwrap(), configured);
    }

    #[test]
    fn test_send_all_then_close() {
        let (mut peer, mut client) = pair();

        assert_eq!(peer.send_all(b"payload").unwrap(), 7);
        peer.close();
        assert!(!peer.is_open());

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"payload");
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut peer, _client) = pair();
        peer.close();
        peer.close();
        assert!(!peer.is_open());

        let err = peer.send(b"late").unwrap_err();
        assert_eq!(err.kind(), Some(io::ErrorKind::NotConnected));
        assert!(!err.is_fatal());
    }
}
