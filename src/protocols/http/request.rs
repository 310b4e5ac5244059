//! Request framing helpers.

/// Blank line terminating an HTTP header block.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Find the end of the header block, returning the offset just past it.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// First line of the received bytes, lossily decoded, for logging.
pub fn request_line(buffer: &[u8]) -> String {
    let end = buffer
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}
