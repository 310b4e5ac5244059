//! Fixed-response HTTP surface.
//!
//! Requests are never parsed. The only inspection is finding where the
//! header block ends so reads can stop, plus a lossy request line for logs.
//! Every connection gets the same response:
//!
//! ```text
//! HTTP/1.1 200 OK
//! Content-Type: text/plain
//! Content-Length: 13
//! Connection: close
//!
//! Hello, World!
//! ```

pub mod request;
pub mod response;

pub use request::{find_header_end, request_line};
pub use response::response;
