//! The static response written to every peer.

use bytes::Bytes;

/// Response body.
pub const RESPONSE_BODY: &str = "Hello, World!";

/// Complete response, byte-exact.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 13\r\n\
Connection: close\r\n\
\r\n\
Hello, World!";

const _: () = assert!(ends_with(RESPONSE, RESPONSE_BODY.as_bytes()));

const fn ends_with(haystack: &[u8], suffix: &[u8]) -> bool {
    if suffix.len() > haystack.len() {
        return false;
    }
    let offset = haystack.len() - suffix.len();
    let mut i = 0;
    while i < suffix.len() {
        if haystack[offset + i] != suffix[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Shared handle to the response bytes.
pub fn response() -> Bytes {
    Bytes::from_static(RESPONSE)
}
