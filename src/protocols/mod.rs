//! Protocol implementations.
//!
//! - `http`: static `200 OK` response and request framing helpers

pub mod http;
